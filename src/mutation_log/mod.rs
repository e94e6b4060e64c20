mod log_block;
mod log_file;
mod log_utils;
mod log_writer;
mod mutation_log;

pub use log_writer::LogAppendCallback;
pub use log_writer::LogWriter;
pub use mutation_log::LogAppendResult;
pub use mutation_log::LogError;
pub use mutation_log::LogLearnState;
pub use mutation_log::MutationLog;
