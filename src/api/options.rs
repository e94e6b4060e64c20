use crate::replica::{AllSecondaries, QuorumPolicy};
use std::convert::TryFrom;
use std::sync::Arc;
use tokio::time::Duration;

/// Tunables of the replication core. Every field is optional; unset fields take the defaults
/// listed next to them.
#[derive(Clone, Default)]
pub struct ReplicationOptions {
    /// 110
    pub max_mutation_count_in_prepare_list: Option<usize>,
    /// 10. Most decrees a primary lets run ahead of its committed decree.
    pub staleness_for_commit: Option<usize>,
    /// false
    pub batch_write_disabled: Option<bool>,
    /// 1s
    pub prepare_timeout: Option<Duration>,
    /// 10s
    pub group_check_interval: Option<Duration>,
    /// 100s
    pub checkpoint_interval: Option<Duration>,
    /// 1
    pub checkpoint_max_interval_hours: Option<u64>,
    /// 10s
    pub checkpoint_try_again_delay: Option<Duration>,
    /// true
    pub log_shared_enabled: Option<bool>,
    /// true
    pub log_private_enabled: Option<bool>,
    /// 32
    pub log_file_size_mb: Option<u64>,
    /// 0
    pub log_private_reserve_max_size_mb: Option<u64>,
    /// 0
    pub log_private_reserve_max_time_seconds: Option<u64>,
    /// 0
    pub log_shared_reserve_max_size_mb: Option<u64>,
    /// 0
    pub log_shared_reserve_max_time_seconds: Option<u64>,
    /// 30s
    pub learn_timeout: Option<Duration>,
    /// 30s
    pub copy_checkpoint_timeout: Option<Duration>,
    /// 1s
    pub register_child_retry_interval: Option<Duration>,
    /// false. Open a restored replica empty instead of failing when its backup is damaged.
    pub skip_bad_partition: Option<bool>,
    /// All secondaries must ack.
    pub quorum: Option<Arc<dyn QuorumPolicy>>,
    /// 1024
    pub actor_queue_size: Option<usize>,
}

#[derive(Clone, Debug)]
pub(crate) struct ReplicationOptionsValidated {
    pub(crate) max_mutation_count_in_prepare_list: usize,
    pub(crate) staleness_for_commit: usize,
    pub(crate) batch_write_disabled: bool,
    pub(crate) prepare_timeout: Duration,
    pub(crate) group_check_interval: Duration,
    pub(crate) checkpoint_interval: Duration,
    pub(crate) checkpoint_max_interval: Duration,
    pub(crate) checkpoint_try_again_delay: Duration,
    pub(crate) log_shared_enabled: bool,
    pub(crate) log_private_enabled: bool,
    pub(crate) log_file_size_bytes: u64,
    pub(crate) log_private_reserve_max_size_bytes: u64,
    pub(crate) log_private_reserve_max_time: Duration,
    pub(crate) log_shared_reserve_max_size_bytes: u64,
    pub(crate) log_shared_reserve_max_time: Duration,
    pub(crate) learn_timeout: Duration,
    pub(crate) copy_checkpoint_timeout: Duration,
    pub(crate) register_child_retry_interval: Duration,
    pub(crate) skip_bad_partition: bool,
    pub(crate) quorum: Arc<dyn QuorumPolicy>,
    pub(crate) actor_queue_size: usize,
}

const MB: u64 = 1024 * 1024;

impl ReplicationOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if !self.log_shared_enabled && !self.log_private_enabled {
            return Err("At least one of the shared and private logs must be enabled");
        }
        if self.max_mutation_count_in_prepare_list <= self.staleness_for_commit {
            return Err("Prepare list capacity must be greater than staleness for commit");
        }
        if self.staleness_for_commit == 0 {
            return Err("Staleness for commit must be positive");
        }
        if self.log_file_size_bytes == 0 {
            return Err("Log file size must be positive");
        }
        // Block headers record their position inside the file in 32 bits.
        if self.log_file_size_bytes >= u64::from(u32::MAX) {
            return Err("Log file size must stay below 4 GiB");
        }
        if self.prepare_timeout == Duration::from_millis(0)
            || self.group_check_interval == Duration::from_millis(0)
            || self.checkpoint_interval == Duration::from_millis(0)
            || self.learn_timeout == Duration::from_millis(0)
            || self.copy_checkpoint_timeout == Duration::from_millis(0)
            || self.register_child_retry_interval == Duration::from_millis(0)
        {
            return Err("Timeouts and intervals must be non-zero");
        }
        if self.actor_queue_size == 0 {
            return Err("Actor queue size must be positive");
        }

        Ok(())
    }
}

impl TryFrom<ReplicationOptions> for ReplicationOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ReplicationOptions) -> Result<Self, Self::Error> {
        let values = ReplicationOptionsValidated {
            max_mutation_count_in_prepare_list: options.max_mutation_count_in_prepare_list.unwrap_or(110),
            staleness_for_commit: options.staleness_for_commit.unwrap_or(10),
            batch_write_disabled: options.batch_write_disabled.unwrap_or(false),
            prepare_timeout: options.prepare_timeout.unwrap_or(Duration::from_secs(1)),
            group_check_interval: options.group_check_interval.unwrap_or(Duration::from_secs(10)),
            checkpoint_interval: options.checkpoint_interval.unwrap_or(Duration::from_secs(100)),
            checkpoint_max_interval: Duration::from_secs(options.checkpoint_max_interval_hours.unwrap_or(1) * 3600),
            checkpoint_try_again_delay: options.checkpoint_try_again_delay.unwrap_or(Duration::from_secs(10)),
            log_shared_enabled: options.log_shared_enabled.unwrap_or(true),
            log_private_enabled: options.log_private_enabled.unwrap_or(true),
            log_file_size_bytes: options.log_file_size_mb.unwrap_or(32).saturating_mul(MB),
            log_private_reserve_max_size_bytes: options.log_private_reserve_max_size_mb.unwrap_or(0).saturating_mul(MB),
            log_private_reserve_max_time: Duration::from_secs(
                options.log_private_reserve_max_time_seconds.unwrap_or(0),
            ),
            log_shared_reserve_max_size_bytes: options.log_shared_reserve_max_size_mb.unwrap_or(0).saturating_mul(MB),
            log_shared_reserve_max_time: Duration::from_secs(options.log_shared_reserve_max_time_seconds.unwrap_or(0)),
            learn_timeout: options.learn_timeout.unwrap_or(Duration::from_secs(30)),
            copy_checkpoint_timeout: options.copy_checkpoint_timeout.unwrap_or(Duration::from_secs(30)),
            register_child_retry_interval: options
                .register_child_retry_interval
                .unwrap_or(Duration::from_secs(1)),
            skip_bad_partition: options.skip_bad_partition.unwrap_or(false),
            quorum: options.quorum.unwrap_or_else(|| Arc::new(AllSecondaries)),
            actor_queue_size: options.actor_queue_size.unwrap_or(1024),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::Majority;

    fn run(expected: Result<(), &'static str>, options: ReplicationOptions) {
        assert_eq!(ReplicationOptionsValidated::try_from(options).map(|_| ()), expected);
    }

    #[test]
    fn defaults() {
        let options = ReplicationOptionsValidated::try_from(ReplicationOptions::default()).unwrap();
        assert_eq!(options.max_mutation_count_in_prepare_list, 110);
        assert_eq!(options.staleness_for_commit, 10);
        assert_eq!(options.checkpoint_max_interval, Duration::from_secs(3600));
        assert_eq!(options.log_file_size_bytes, 32 * MB);
        assert_eq!(options.quorum.required_acks(2), 2);
    }

    #[test]
    fn validation() {
        run(Ok(()), ReplicationOptions::default());
        run(
            Ok(()),
            ReplicationOptions {
                quorum: Some(Arc::new(Majority)),
                log_shared_enabled: Some(false),
                ..Default::default()
            },
        );
        run(
            Err("At least one of the shared and private logs must be enabled"),
            ReplicationOptions {
                log_shared_enabled: Some(false),
                log_private_enabled: Some(false),
                ..Default::default()
            },
        );
        run(
            Err("Prepare list capacity must be greater than staleness for commit"),
            ReplicationOptions {
                max_mutation_count_in_prepare_list: Some(10),
                ..Default::default()
            },
        );
        run(
            Err("Timeouts and intervals must be non-zero"),
            ReplicationOptions {
                group_check_interval: Some(Duration::from_millis(0)),
                ..Default::default()
            },
        );
        run(
            Ok(()),
            ReplicationOptions {
                log_file_size_mb: Some(4095),
                ..Default::default()
            },
        );
        run(
            Err("Log file size must stay below 4 GiB"),
            ReplicationOptions {
                log_file_size_mb: Some(4096),
                ..Default::default()
            },
        );
        run(
            Err("Log file size must stay below 4 GiB"),
            ReplicationOptions {
                log_file_size_mb: Some(u64::MAX),
                ..Default::default()
            },
        );
    }
}
