use crate::actor::Callback;
use crate::common::{Ballot, Decree, Gpid, LearnerStatus, NodeAddress, PartitionConfiguration, INVALID_DECREE};
use crate::replica::replica_api::{ChildSyncMessage, ClientWriteError, ClientWriteOutput};
use crate::replica::replica::{READ_THROTTLING_ENV_KEY, WRITE_SIZE_THROTTLING_ENV_KEY, WRITE_THROTTLING_ENV_KEY};
use crate::throttling::ThrottlingController;
use crate::timers::PeriodicTimerHandle;
use crate::transport::{PrepareAck, PrepareRequest, RpcError};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tokio::sync::mpsc;
use tokio::time::Instant;

// -- Primary --

#[derive(Debug)]
pub(crate) struct RemoteLearner {
    pub(crate) signature: u64,
    /// Decrees at or above this are prepared on the learner too. `INVALID_DECREE` until the
    /// learner learned from our prepare list.
    pub(crate) prepare_start_decree: Decree,
}

/// Ack progress of one uncommitted decree on the primary.
#[derive(Debug)]
pub(crate) struct PendingMutation {
    pub(crate) ballot: Ballot,
    pub(crate) acked: HashSet<NodeAddress>,
    pub(crate) callbacks: Vec<Callback<ClientWriteOutput, ClientWriteError>>,
}

pub(crate) struct PrimaryContext {
    pub(crate) membership: PartitionConfiguration,
    pub(crate) learners: HashMap<NodeAddress, RemoteLearner>,
    pub(crate) pending: BTreeMap<Decree, PendingMutation>,
    // We're just going to allow 1 outstanding prepare per peer; no pipelining. Each peer gets a
    // sender task that drains this queue in order.
    pub(crate) prepare_senders: HashMap<NodeAddress, mpsc::UnboundedSender<PrepareRequest>>,
    pub(crate) reconfiguration_in_flight: bool,
    // Set while the write queue is being turned into mutations, so commits made along the way
    // don't drain it again.
    pub(crate) preparing: bool,
    pub(crate) last_prepare_decree_on_new_primary: Decree,
    pub(crate) group_check_timer: Option<PeriodicTimerHandle>,
    next_learning_version: u64,
}

impl PrimaryContext {
    pub(crate) fn new(membership: PartitionConfiguration) -> Self {
        PrimaryContext {
            membership,
            learners: HashMap::new(),
            pending: BTreeMap::new(),
            prepare_senders: HashMap::new(),
            reconfiguration_in_flight: false,
            preparing: false,
            last_prepare_decree_on_new_primary: INVALID_DECREE,
            group_check_timer: None,
            next_learning_version: (chrono::Utc::now().timestamp_millis() as u64) << 20,
        }
    }

    pub(crate) fn is_secondary(&self, node: &NodeAddress) -> bool {
        self.membership.secondaries.contains(node)
    }

    pub(crate) fn new_learning_version(&mut self) -> u64 {
        self.next_learning_version += 1;
        self.next_learning_version
    }

    /// Drops everything the primary role owned and hands back the writes still waiting on a
    /// commit.
    pub(crate) fn reset(&mut self) -> Vec<Callback<ClientWriteOutput, ClientWriteError>> {
        self.learners.clear();
        self.prepare_senders.clear();
        self.reconfiguration_in_flight = false;
        self.preparing = false;
        self.group_check_timer = None;
        let pending = std::mem::take(&mut self.pending);
        pending.into_iter().flat_map(|(_, p)| p.callbacks).collect()
    }
}

// -- Potential secondary (learner) --

pub(crate) struct PotentialSecondaryContext {
    pub(crate) learning_version: u64,
    pub(crate) learner_status: LearnerStatus,
    pub(crate) learning_round_in_flight: bool,
    pub(crate) learning_round: u64,
    pub(crate) learning_started: Option<Instant>,
    /// Prepares that arrived while a learn round was in flight.
    pub(crate) held_prepares: Vec<(PrepareRequest, Callback<PrepareAck, RpcError>)>,
}

impl PotentialSecondaryContext {
    pub(crate) fn new() -> Self {
        PotentialSecondaryContext {
            learning_version: 0,
            learner_status: LearnerStatus::LearningWithoutPrepare,
            learning_round_in_flight: false,
            learning_round: 0,
            learning_started: None,
            held_prepares: Vec::new(),
        }
    }

    pub(crate) fn start(&mut self, signature: u64) {
        self.learning_version = signature;
        self.learner_status = LearnerStatus::LearningWithoutPrepare;
        self.learning_round_in_flight = false;
        self.learning_round = 0;
        self.learning_started = Some(Instant::now());
    }

    pub(crate) fn accepts_prepares(&self) -> bool {
        matches!(
            self.learner_status,
            LearnerStatus::LearningWithPrepare | LearnerStatus::LearningSucceeded
        )
    }

    pub(crate) fn reset(&mut self) -> Vec<(PrepareRequest, Callback<PrepareAck, RpcError>)> {
        let held = std::mem::take(&mut self.held_prepares);
        *self = PotentialSecondaryContext::new();
        held
    }
}

// -- Partition split --

#[derive(Default)]
pub(crate) struct SplitContext {
    // Parent side.
    pub(crate) child_gpid: Option<Gpid>,
    pub(crate) child_sender: Option<mpsc::UnboundedSender<ChildSyncMessage>>,
    pub(crate) child_caught_up: bool,
    pub(crate) sync_point: Option<Decree>,
    pub(crate) block_writes: bool,
    pub(crate) registering: bool,
    pub(crate) partition_count_before: i32,

    // Child side.
    pub(crate) parent_gpid: Option<Gpid>,
    pub(crate) parent_state_applied: bool,
}

impl SplitContext {
    pub(crate) fn is_splitting(&self) -> bool {
        self.child_gpid.is_some()
    }

    pub(crate) fn clear_parent_side(&mut self) {
        self.child_gpid = None;
        self.child_sender = None;
        self.child_caught_up = false;
        self.sync_point = None;
        self.block_writes = false;
        self.registering = false;
    }
}

// -- Checkpoint --

pub(crate) struct CheckpointContext {
    pub(crate) checkpoint_is_running: bool,
    /// Sync-only engine checkpointing on a blocking thread: commits are applied once it ends.
    pub(crate) apply_deferred: bool,
    pub(crate) copy_in_flight: bool,
    pub(crate) last_checkpoint_time: Instant,
}

impl CheckpointContext {
    pub(crate) fn new() -> Self {
        CheckpointContext {
            checkpoint_is_running: false,
            apply_deferred: false,
            copy_in_flight: false,
            last_checkpoint_time: Instant::now(),
        }
    }
}

// -- Log writes --

#[derive(Default)]
pub(crate) struct LogWriteContext {
    /// Mutations handed to the log writers whose outcome has not come back.
    pub(crate) in_flight: usize,
    /// Secondary: acks that go out once their decree is logged, with the ballot they were
    /// prepared under.
    pub(crate) waiting_acks: BTreeMap<Decree, Vec<(Ballot, Callback<PrepareAck, RpcError>)>>,
    /// Secondary: prepares whose piggybacked commit reaches decrees still being logged.
    pub(crate) deferred_prepares: VecDeque<(PrepareRequest, Callback<PrepareAck, RpcError>)>,
}

// -- Throttling --

/// Throttling of one partition. Each controller is configured by its own app env.
#[derive(Debug, Default)]
pub(crate) struct ThrottlingContext {
    /// Writes per second.
    pub(crate) write_qps: ThrottlingController,
    /// Update bytes written per second.
    pub(crate) write_size: ThrottlingController,
    /// Reads per second.
    pub(crate) read_qps: ThrottlingController,
}

impl ThrottlingContext {
    /// Applies the throttling envs in `envs`. A missing env disables its controller; a bad one
    /// leaves it as it was.
    pub(crate) fn apply_envs(&mut self, logger: &slog::Logger, envs: &BTreeMap<String, String>, partition_count: i32) {
        let controllers = vec![
            (WRITE_THROTTLING_ENV_KEY, &mut self.write_qps),
            (WRITE_SIZE_THROTTLING_ENV_KEY, &mut self.write_size),
            (READ_THROTTLING_ENV_KEY, &mut self.read_qps),
        ];
        for (key, controller) in controllers {
            match envs.get(key) {
                Some(env) => match controller.parse_from_env(env, partition_count) {
                    Ok(change) if change.changed => {
                        slog::info!(logger, "Env {} changed from {:?} to {:?}", key, change.old_value, env)
                    }
                    Ok(_) => {}
                    Err(e) => slog::warn!(logger, "Keeping {}, bad env {:?}: {}", key, env, e),
                },
                None => {
                    let change = controller.reset();
                    if change.changed {
                        slog::info!(logger, "Env {} {:?} removed, throttling disabled", key, change.old_value);
                    }
                }
            }
        }
    }
}
