use bytes::{BufMut, Bytes};
use replication::{
    put_update, try_create_node, AppInfo, ClientWriteError, Gpid, InProcessNetwork, LocalMetaServer, MutationLog,
    NodeAddress, NodeTransport, PartitionStatus, ReplicaInitInfo, ReplicaNode, ReplicaNodeConfig, ReplicaStateSnapshot,
    ReplicationOptions, SplitStatus, INIT_INFO_FILE_NAME, LEGACY_INIT_INFO_FILE_NAME, SIMPLE_KV_APP_TYPE,
    WRITE_THROTTLING_ENV_KEY,
};
use slog::Drain;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

const APP_ID: i32 = 1;
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn secondary_catches_up_after_restart() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let gpid = Gpid::new(APP_ID, 0);
    let n1 = node(&network, &meta, "n1", &data.path().join("n1")).await?;
    let mut n2 = node(&network, &meta, "n2", &data.path().join("n2")).await?;

    meta.create_app(kv_app(1, 2), n1.address().clone()).await?;
    wait_for(&n1, gpid, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;
    for i in 0..5 {
        n1.client_write(gpid, vec![put_update(&format!("before-{}", i), "1")]).await?;
    }

    meta.add_secondary(gpid, n2.address().clone()).await?;
    wait_for(&n2, gpid, "n2 to become secondary", |s| s.status == PartitionStatus::Secondary).await;
    wait_for(&n1, gpid, "n1 to see n2 as secondary", |s| s.secondaries.len() == 1).await;
    let value = n2.local_read(gpid, Bytes::from("before-4")).await?;
    assert_eq!(value.value, Some(Bytes::from("1")));

    // With n2 gone, the primary drops it from the group and keeps committing alone.
    n2.shutdown().await;
    for i in 0..5 {
        let output = n1.client_write(gpid, vec![put_update(&format!("during-{}", i), "2")]).await?;
        assert!(output.ballot > 2);
    }
    let config = meta.partition_config(gpid).expect("partition exists");
    assert!(config.secondaries.is_empty());
    assert!(config.last_drops.contains(&NodeAddress::new("n2")));

    // Same directory, so n2 reopens its replica and only learns what it missed.
    n2 = node(&network, &meta, "n2", &data.path().join("n2")).await?;
    assert_eq!(n2.replicas(), vec![gpid]);
    let reopened = n2.query_replica_state(gpid).await.expect("replica reopened");
    assert_eq!(reopened.status, PartitionStatus::Inactive);
    assert!(reopened.ballot >= 2);

    meta.add_secondary(gpid, n2.address().clone()).await?;
    wait_for(&n2, gpid, "n2 to rejoin as secondary", |s| s.status == PartitionStatus::Secondary).await;
    for i in 0..5 {
        let value = n2.local_read(gpid, Bytes::from(format!("during-{}", i))).await?;
        assert_eq!(value.value, Some(Bytes::from("2")));
    }

    // And it takes part in 2PC again.
    let output = n1.client_write(gpid, vec![put_update("after", "3")]).await?;
    wait_for(&n2, gpid, "n2 to commit the last write", |s| {
        s.last_committed_decree >= output.decree - 1
    })
    .await;

    n1.shutdown().await;
    n2.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn partition_split_waits_for_registration() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let parent = Gpid::new(APP_ID, 0);
    let child = Gpid::new(APP_ID, 1);
    let n1 = node(&network, &meta, "n1", &data.path().join("n1")).await?;

    meta.create_app(kv_app(1, 1), n1.address().clone()).await?;
    wait_for(&n1, parent, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;
    for i in 0..10 {
        n1.client_write(parent, vec![put_update(&format!("key-{}", i), "v")]).await?;
    }

    meta.set_hold_child_registration(true);
    meta.start_partition_split(APP_ID).await?;
    wait_for(&n1, parent, "parent to start splitting", |s| s.split_status == SplitStatus::Splitting).await;

    // Writes keep flowing until the child caught up, then the parent blocks them until the
    // meta server took the child.
    let deadline = Instant::now() + WAIT_TIMEOUT;
    let mut accepted = 0;
    loop {
        assert!(Instant::now() < deadline, "Timeout waiting for writes to be blocked");
        match n1.client_write(parent, vec![put_update(&format!("late-{}", accepted), "v")]).await {
            Ok(_) => accepted += 1,
            Err(ClientWriteError::Splitting) => break,
            Err(e) => panic!("Unexpected write error during split: {:?}", e),
        }
    }
    let state = n1.query_replica_state(parent).await.expect("parent exists");
    assert_eq!(state.partition_count, 1);
    assert_eq!(meta.app_info(APP_ID).map(|app| app.partition_count), Some(1));

    meta.set_hold_child_registration(false);
    wait_for(&n1, parent, "split to finish", |s| {
        s.split_status == SplitStatus::NotSplit && s.partition_count == 2
    })
    .await;
    wait_for(&n1, child, "child to be primary", |s| s.status == PartitionStatus::Primary).await;
    assert_eq!(n1.replicas(), vec![parent, child]);
    assert_eq!(meta.app_info(APP_ID).map(|app| app.partition_count), Some(2));

    for key in (0..10).map(|i| format!("key-{}", i)).chain((0..accepted).map(|i| format!("late-{}", i))) {
        let value = n1.local_read(child, Bytes::from(key.clone())).await?;
        assert_eq!(value.value, Some(Bytes::from("v")), "child misses {}", key);
    }

    n1.client_write(parent, vec![put_update("parent-only", "p")]).await?;
    n1.client_write(child, vec![put_update("child-only", "c")]).await?;
    let on_child = n1.local_read(child, Bytes::from("parent-only")).await?;
    assert_eq!(on_child.value, None);

    n1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn backup_restores_on_another_node() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let backup_dir = data.path().join("backup");
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let gpid = Gpid::new(APP_ID, 0);
    let n1 = node(&network, &meta, "n1", &data.path().join("n1")).await?;
    let n2 = node(&network, &meta, "n2", &data.path().join("n2")).await?;

    let app = kv_app(1, 1);
    meta.create_app(app.clone(), n1.address().clone()).await?;
    wait_for(&n1, gpid, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;
    for i in 0..6 {
        n1.client_write(gpid, vec![put_update(&format!("key-{}", i), &i.to_string())]).await?;
    }

    let metadata = n1.backup_checkpoint(gpid, &backup_dir).await?;
    assert_eq!(metadata.checkpoint_decree, 6);

    let restored = n2.restore_replica(app, gpid, &backup_dir)?;
    assert_eq!(restored, 6);
    let state = n2.query_replica_state(gpid).await.expect("restored replica exists");
    assert_eq!(state.app_last_committed_decree, 6);
    for i in 0..6 {
        let value = n2.local_read(gpid, Bytes::from(format!("key-{}", i))).await?;
        assert_eq!(value.value, Some(Bytes::from(i.to_string())));
    }

    n1.shutdown().await;
    n2.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn legacy_init_info_is_upgraded_on_open() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let root_dir = data.path().join("n1");
    let replica_dir = root_dir.join(format!("{}.0.{}", APP_ID, SIMPLE_KV_APP_TYPE));
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let gpid = Gpid::new(APP_ID, 0);

    let n1 = node(&network, &meta, "n1", &root_dir).await?;
    meta.create_app(kv_app(1, 1), n1.address().clone()).await?;
    wait_for(&n1, gpid, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;
    for i in 0..3 {
        n1.client_write(gpid, vec![put_update(&format!("key-{}", i), "v")]).await?;
    }
    n1.shutdown().await;

    // Rewrite the init info the way older versions stored it.
    let logger = slog::Logger::root(slog::Discard, slog::o!());
    let info = ReplicaInitInfo::load(&logger, &replica_dir)?;
    std::fs::write(replica_dir.join(LEGACY_INIT_INFO_FILE_NAME), legacy_init_info(&info))?;
    std::fs::remove_file(replica_dir.join(INIT_INFO_FILE_NAME))?;

    let n1 = node(&network, &meta, "n1", &root_dir).await?;
    let state = n1.query_replica_state(gpid).await.expect("replica reopened");
    assert_eq!(state.ballot, info.init_ballot);
    assert!(!replica_dir.join(LEGACY_INIT_INFO_FILE_NAME).exists());
    assert!(replica_dir.join(INIT_INFO_FILE_NAME).exists());
    assert_eq!(ReplicaInitInfo::load(&logger, &replica_dir)?.init_ballot, info.init_ballot);
    for i in 0..2 {
        let value = n1.local_read(gpid, Bytes::from(format!("key-{}", i))).await?;
        assert_eq!(value.value, Some(Bytes::from("v")));
    }

    n1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn write_throttling_follows_app_envs() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let gpid = Gpid::new(APP_ID, 0);
    let n1 = node(&network, &meta, "n1", &data.path().join("n1")).await?;

    meta.create_app(kv_app(1, 1), n1.address().clone()).await?;
    wait_for(&n1, gpid, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;

    // Two writes per second per partition, rejected after 10ms.
    let mut envs = BTreeMap::new();
    envs.insert(WRITE_THROTTLING_ENV_KEY.to_string(), "1*reject*10".to_string());
    n1.apply_envs(APP_ID, envs).await;
    let state = n1.query_replica_state(gpid).await.expect("replica exists");
    assert!(state.write_throttling_enabled);

    let mut busy = 0;
    for i in 0..5 {
        match n1.client_write(gpid, vec![put_update(&format!("key-{}", i), "v")]).await {
            Ok(_) => {}
            Err(ClientWriteError::Busy) => busy += 1,
            Err(e) => panic!("Unexpected write error: {:?}", e),
        }
    }
    assert!(busy >= 2, "only {} of 5 writes were rejected", busy);

    n1.apply_envs(APP_ID, BTreeMap::new()).await;
    let state = n1.query_replica_state(gpid).await.expect("replica exists");
    assert!(!state.write_throttling_enabled);
    for i in 0..5 {
        n1.client_write(gpid, vec![put_update(&format!("free-{}", i), "v")]).await?;
    }

    n1.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_flushes_shared_log() -> Result<(), Box<dyn Error>> {
    let data = tempfile::tempdir()?;
    let network = InProcessNetwork::new();
    let meta = LocalMetaServer::new(create_root_logger_for_stdout("meta"), network.clone());
    let gpid = Gpid::new(APP_ID, 0);
    let root_dir = data.path().join("n1");
    let n1 = node(&network, &meta, "n1", &root_dir).await?;

    meta.create_app(kv_app(1, 1), n1.address().clone()).await?;
    wait_for(&n1, gpid, "n1 to be primary", |s| s.status == PartitionStatus::Primary).await;
    let updates: Vec<_> = (0..3).map(|i| put_update(&format!("key-{}", i), "v")).collect();
    for update in updates.iter() {
        n1.client_write(gpid, vec![update.clone()]).await?;
    }
    n1.shutdown().await;

    let log = MutationLog::open(create_root_logger_for_stdout("slog"), &root_dir.join("slog"), 64 << 20)?;
    let mut logged = Vec::new();
    log.replay(|mutation| {
        if mutation.pid() == gpid {
            logged.extend(mutation.updates);
        }
    })?;
    for update in updates.iter() {
        assert!(logged.contains(update), "{:?} missing from the shared log", update);
    }
    Ok(())
}

async fn node(
    network: &Arc<InProcessNetwork>,
    meta: &Arc<LocalMetaServer>,
    name: &str,
    root_dir: &Path,
) -> Result<ReplicaNode, Box<dyn Error>> {
    let node = try_create_node(ReplicaNodeConfig {
        address: NodeAddress::new(name),
        root_dir: root_dir.to_path_buf(),
        info_logger: create_root_logger_for_stdout(name),
        options: options(),
        transport: NodeTransport::InProcess(network.clone()),
        meta: meta.clone(),
        engines: None,
    })
    .await?;

    Ok(node)
}

fn options() -> ReplicationOptions {
    ReplicationOptions {
        group_check_interval: Some(Duration::from_millis(100)),
        prepare_timeout: Some(Duration::from_millis(500)),
        register_child_retry_interval: Some(Duration::from_millis(100)),
        ..ReplicationOptions::default()
    }
}

fn kv_app(partition_count: i32, max_replica_count: u32) -> AppInfo {
    AppInfo::new(APP_ID, "test", SIMPLE_KV_APP_TYPE, partition_count, max_replica_count)
}

fn legacy_init_info(info: &ReplicaInitInfo) -> Vec<u8> {
    let encode = |crc: u32| {
        let mut buf = Vec::with_capacity(40);
        buf.put_u32_le(0xdead_beef);
        buf.put_u32_le(crc);
        buf.put_i64_le(info.init_ballot);
        buf.put_i64_le(info.init_durable_decree);
        buf.put_i64_le(info.init_offset_in_shared_log);
        buf.put_i64_le(info.init_offset_in_private_log);
        buf
    };

    encode(crc32fast::hash(&encode(0)))
}

async fn wait_for<F>(node: &ReplicaNode, gpid: Gpid, what: &str, condition: F)
where
    F: Fn(&ReplicaStateSnapshot) -> bool,
{
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(state) = node.query_replica_state(gpid).await {
            if condition(&state) {
                return;
            }
        }
        if Instant::now() >= deadline {
            panic!(
                "Timeout waiting for {}, last state: {:?}",
                what,
                node.query_replica_state(gpid).await
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn create_root_logger_for_stdout(node: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Test" => node.to_string()))
}
