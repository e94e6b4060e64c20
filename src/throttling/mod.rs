mod throttling_controller;
mod token_bucket;

pub use throttling_controller::EnvChange;
pub use throttling_controller::ThrottlingController;
pub use throttling_controller::ThrottlingDecision;
pub use throttling_controller::ThrottlingParseError;
pub(crate) use token_bucket::TokenBucket;
