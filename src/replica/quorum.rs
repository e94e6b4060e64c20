use std::fmt::Debug;

/// QuorumPolicy decides how many secondary acks a primary needs before a prepared mutation may
/// commit. The primary's own log write is always required on top. Learner acks never count.
pub trait QuorumPolicy: Send + Sync + Debug {
    fn required_acks(&self, secondary_count: usize) -> usize;
}

/// Every secondary must ack.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllSecondaries;

impl QuorumPolicy for AllSecondaries {
    fn required_acks(&self, secondary_count: usize) -> usize {
        secondary_count
    }
}

/// A majority of the whole group (primary included) must have the mutation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Majority;

impl QuorumPolicy for Majority {
    fn required_acks(&self, secondary_count: usize) -> usize {
        (secondary_count + 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(expected: usize, policy: &dyn QuorumPolicy, secondary_count: usize) {
        assert_eq!(policy.required_acks(secondary_count), expected, "{:?} with {}", policy, secondary_count);
    }

    #[test]
    fn required_acks() {
        run(0, &AllSecondaries, 0);
        run(2, &AllSecondaries, 2);
        run(4, &AllSecondaries, 4);

        run(0, &Majority, 0);
        run(1, &Majority, 1);
        run(1, &Majority, 2);
        run(2, &Majority, 3);
        run(2, &Majority, 4);
    }
}
