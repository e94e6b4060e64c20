mod server;

pub(crate) use server::RpcServer;
pub(crate) use server::RpcServerHandle;
