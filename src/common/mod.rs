mod error_code;
mod mutation;
mod types;

pub use error_code::ErrorCode;
pub use mutation::Mutation;
pub use mutation::MutationDecodeError;
pub use mutation::MutationHeader;
pub use mutation::UpdateRecord;
pub use types::AppInfo;
pub use types::Ballot;
pub use types::Decree;
pub use types::Gpid;
pub use types::LearnerStatus;
pub use types::NodeAddress;
pub use types::PartitionConfiguration;
pub use types::PartitionStatus;
pub use types::ReplicaConfiguration;
pub use types::SplitStatus;
pub use types::INVALID_BALLOT;
pub use types::INVALID_DECREE;
pub use types::INVALID_OFFSET;
