mod prepare_list;

pub use prepare_list::CommitMode;
pub use prepare_list::PrepareList;
pub use prepare_list::PrepareListError;
pub use prepare_list::PreparedMutation;
