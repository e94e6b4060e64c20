//! This mod is meant to hold most of the code for the library's client-facing API.
mod node;
mod options;

pub use node::try_create_node;
pub use node::NodeCreationError;
pub use node::NodeTransport;
pub use node::ReplicaNode;
pub use node::ReplicaNodeConfig;
pub use options::ReplicationOptions;

// So the replica stub and replicas can read the validated options.
pub(crate) use options::ReplicationOptionsValidated;
