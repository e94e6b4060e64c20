mod replica_stub;
mod service;

pub(crate) use replica_stub::ReplicaStub;
pub(crate) use replica_stub::ReplicaStubConfig;
