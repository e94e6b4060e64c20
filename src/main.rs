use replication::{
    try_create_node, AppInfo, GrpcTransport, LocalMetaServer, NodeAddress, NodeTransport, ReplicaNodeConfig,
    ReplicationOptions, SIMPLE_KV_APP_TYPE,
};
use slog::Drain;
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs a single replica server with an in-memory meta server next to it, hosting one
/// `simple_kv` table whose partitions all have this node as primary.
///
/// Usage: `replica-node [root_dir] [listen_addr] [partition_count]`
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = root_logger();

    let mut args = std::env::args().skip(1);
    let root_dir = PathBuf::from(args.next().unwrap_or_else(|| "./replica-data".to_string()));
    let listen_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:34801".to_string()).parse()?;
    let partition_count: i32 = args.next().unwrap_or_else(|| "4".to_string()).parse()?;

    let address = NodeAddress::new(listen_addr.to_string());
    let meta = LocalMetaServer::new(
        logger.new(slog::o!("Component" => "meta")),
        Arc::new(GrpcTransport::new(logger.clone(), RPC_TIMEOUT)),
    );

    let node = try_create_node(ReplicaNodeConfig {
        address: address.clone(),
        root_dir,
        info_logger: logger.clone(),
        options: ReplicationOptions::default(),
        transport: NodeTransport::Grpc {
            listen_addr,
            rpc_timeout: RPC_TIMEOUT,
        },
        meta: meta.clone(),
        engines: None,
    })
    .await?;

    // Give the server a moment to bind before the meta server pushes configurations to it.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let app = AppInfo::new(1, "demo", SIMPLE_KV_APP_TYPE, partition_count, 1);
    meta.create_app(app, address).await?;
    slog::info!(logger, "Serving {} partitions, ctrl-c to stop", partition_count);

    tokio::signal::ctrl_c().await?;
    node.shutdown().await;
    Ok(())
}

fn root_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
