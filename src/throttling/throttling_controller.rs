use crate::throttling::TokenBucket;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThrottlingParseError {
    #[error("empty env value")]
    EmptyEnv,
    #[error("invalid field count in clause {0:?}, should be 3")]
    InvalidFieldCount(String),
    #[error("invalid units {0:?}, should be non-negative int with optional K or M suffix")]
    InvalidUnits(String),
    #[error("invalid delay ms {0:?}, should be non-negative int")]
    InvalidDelayMs(String),
    #[error("invalid throttling type {0:?}")]
    InvalidType(String),
    #[error("duplicate delay config")]
    DuplicateDelay,
    #[error("duplicate reject config")]
    DuplicateReject,
    #[error("invalid partition count {0}")]
    InvalidPartitionCount(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlingDecision {
    Pass,
    Delay(Duration),
    /// The request is refused; the reply is held back for the given duration.
    Reject(Duration),
}

/// What a parse or reset did to the active configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvChange {
    pub changed: bool,
    pub old_value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Threshold {
    units: u64,
    ms: u64,
}

/// ThrottlingController admits, delays or rejects requests for one partition. A request costs
/// one unit when throttling by count, or its size in bytes when throttling by size.
///
/// Configured from an app env of the form `<units>[K|M]*<delay|reject>*<ms>[,...]`. `units` is
/// the app-wide budget per second and each partition gets `units / partition_count + 1`.
#[derive(Debug)]
pub struct ThrottlingController {
    enabled: bool,
    env_value: String,
    partition_count: i32,
    delay: Option<Threshold>,
    reject: Option<Threshold>,
    delay_bucket: TokenBucket,
    reject_bucket: TokenBucket,
}

impl Default for ThrottlingController {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottlingController {
    pub fn new() -> Self {
        ThrottlingController {
            enabled: false,
            env_value: String::new(),
            partition_count: 0,
            delay: None,
            reject: None,
            delay_bucket: TokenBucket::new_at(u64::MAX, u64::MAX, Instant::now()),
            reject_bucket: TokenBucket::new_at(u64::MAX, u64::MAX, Instant::now()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Parses and applies `env_value`. On error the active configuration is left untouched.
    pub fn parse_from_env(
        &mut self,
        env_value: &str,
        partition_count: i32,
    ) -> Result<EnvChange, ThrottlingParseError> {
        if self.enabled && env_value == self.env_value && partition_count == self.partition_count {
            return Ok(EnvChange::default());
        }
        if partition_count <= 0 {
            return Err(ThrottlingParseError::InvalidPartitionCount(partition_count));
        }

        let (delay, reject) = parse_env(env_value)?;
        let per_partition = |t: Threshold| Threshold {
            units: t.units / partition_count as u64 + 1,
            ms: t.ms,
        };
        let delay = delay.map(per_partition);
        let reject = reject.map(per_partition);

        let now = Instant::now();
        if let Some(t) = delay {
            self.delay_bucket.reset_at(t.units, t.units, now);
        }
        if let Some(t) = reject {
            self.reject_bucket.reset_at(t.units, t.units, now);
        }

        let old_value = std::mem::replace(&mut self.env_value, env_value.to_string());
        self.enabled = true;
        self.partition_count = partition_count;
        self.delay = delay;
        self.reject = reject;

        Ok(EnvChange {
            changed: true,
            old_value,
        })
    }

    /// Disables throttling.
    pub fn reset(&mut self) -> EnvChange {
        if !self.enabled {
            return EnvChange::default();
        }

        let old_value = std::mem::take(&mut self.env_value);
        self.enabled = false;
        self.partition_count = 0;
        self.delay = None;
        self.reject = None;

        EnvChange {
            changed: true,
            old_value,
        }
    }

    pub fn control(&mut self, request_units: u64) -> ThrottlingDecision {
        self.control_at(request_units, Instant::now())
    }

    /// Reject is checked before delay, so an exhausted reject bucket always wins.
    pub fn control_at(&mut self, request_units: u64, now: Instant) -> ThrottlingDecision {
        if !self.enabled {
            return ThrottlingDecision::Pass;
        }

        if let Some(t) = self.reject {
            if !self.reject_bucket.consume_at(request_units, now) {
                return ThrottlingDecision::Reject(Duration::from_millis(t.ms));
            }
        }

        if let Some(t) = self.delay {
            if !self.delay_bucket.consume_at(request_units, now) {
                return ThrottlingDecision::Delay(Duration::from_millis(t.ms));
            }
        }

        ThrottlingDecision::Pass
    }
}

#[cfg(test)]
impl ThrottlingController {
    fn env_value(&self) -> &str {
        &self.env_value
    }

    fn partition_count(&self) -> i32 {
        self.partition_count
    }

    fn delay_units(&self) -> u64 {
        self.delay.map(|t| t.units).unwrap_or(0)
    }

    fn delay_ms(&self) -> u64 {
        self.delay.map(|t| t.ms).unwrap_or(0)
    }

    fn reject_units(&self) -> u64 {
        self.reject.map(|t| t.units).unwrap_or(0)
    }

    fn reject_delay_ms(&self) -> u64 {
        self.reject.map(|t| t.ms).unwrap_or(0)
    }
}

fn parse_env(
    env_value: &str,
) -> Result<(Option<Threshold>, Option<Threshold>), ThrottlingParseError> {
    let clauses: Vec<&str> = env_value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if clauses.is_empty() {
        return Err(ThrottlingParseError::EmptyEnv);
    }

    let mut delay = None;
    let mut reject = None;
    for clause in clauses {
        let fields: Vec<&str> = clause.split('*').map(str::trim).collect();
        if fields.len() != 3 {
            return Err(ThrottlingParseError::InvalidFieldCount(clause.to_string()));
        }

        let units = parse_units(fields[0])?;
        let ms = fields[2]
            .parse::<u64>()
            .map_err(|_| ThrottlingParseError::InvalidDelayMs(fields[2].to_string()))?;
        let threshold = Threshold { units, ms };

        match fields[1] {
            "delay" => {
                if delay.replace(threshold).is_some() {
                    return Err(ThrottlingParseError::DuplicateDelay);
                }
            }
            "reject" => {
                if reject.replace(threshold).is_some() {
                    return Err(ThrottlingParseError::DuplicateReject);
                }
            }
            other => return Err(ThrottlingParseError::InvalidType(other.to_string())),
        }
    }

    Ok((delay, reject))
}

fn parse_units(s: &str) -> Result<u64, ThrottlingParseError> {
    let invalid = || ThrottlingParseError::InvalidUnits(s.to_string());
    let (digits, multiplier) = match s.strip_suffix('M') {
        Some(d) => (d, 1_000_000),
        None => match s.strip_suffix('K') {
            Some(d) => (d, 1_000),
            None => (s, 1),
        },
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}
