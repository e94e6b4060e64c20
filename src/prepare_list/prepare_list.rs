use crate::common::{Ballot, Decree, Mutation, PartitionStatus};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Every decree up to the target must be present and logged.
    Hard,
    /// Commit up to the target, stopping at the first mutation that is not ready.
    Soft,
    /// Commit the ready run starting right after the last committed decree.
    AllReady,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PrepareListError {
    #[error("Decree {decree} is not above last committed decree {last_committed}")]
    AlreadyCommitted { decree: Decree, last_committed: Decree },
    #[error("Decree {decree} is too far ahead of min decree {min_decree} (capacity {capacity})")]
    CapacityExceeded {
        decree: Decree,
        min_decree: Decree,
        capacity: usize,
    },
    #[error("Decree {decree} is below min decree {min_decree}")]
    BelowWindow { decree: Decree, min_decree: Decree },
    #[error("Mutation {0} is missing or not logged")]
    MissingMutation(Decree),
    #[error("Mutation {decree} has ballot {ballot}, lower than previous ballot {previous}")]
    BallotDecreased {
        decree: Decree,
        ballot: Ballot,
        previous: Ballot,
    },
    #[error("Cannot prepare mutations while {0:?}")]
    InvalidStatus(PartitionStatus),
}

/// A mutation inside the prepare list along with its pipeline progress.
#[derive(Debug, Clone)]
pub struct PreparedMutation {
    pub mutation: Arc<Mutation>,
    pub logged: bool,
    /// Primary: enough acks arrived. Everyone else sets this on insertion.
    pub quorum_reached: bool,
}

impl PreparedMutation {
    pub fn new(mutation: Arc<Mutation>, logged: bool, quorum_reached: bool) -> Self {
        PreparedMutation {
            mutation,
            logged,
            quorum_reached,
        }
    }

    pub fn decree(&self) -> Decree {
        self.mutation.decree()
    }

    pub fn ballot(&self) -> Ballot {
        self.mutation.ballot()
    }

    pub fn is_ready_for_commit(&self) -> bool {
        self.logged && self.quorum_reached
    }
}

/// PrepareList is the bounded window of prepared mutations of one replica, indexed by decree.
///
/// Invariant: `min_decree <= last_committed_decree + 1` while non-empty, and the window never
/// spans more than `capacity` decrees. Commits always hand back mutations in increasing decree
/// order and never hand back the same decree twice.
pub struct PrepareList {
    capacity: usize,
    start_decree: Decree,
    end_decree: Decree,
    // entries[i] holds decree `start_decree + i`. Gaps are `None`.
    entries: VecDeque<Option<PreparedMutation>>,
    last_committed_decree: Decree,
}

impl PrepareList {
    pub fn new(init_decree: Decree, capacity: usize) -> Self {
        PrepareList {
            capacity,
            start_decree: init_decree + 1,
            end_decree: init_decree,
            entries: VecDeque::with_capacity(capacity),
            last_committed_decree: init_decree,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_decree(&self) -> Decree {
        self.start_decree
    }

    pub fn max_decree(&self) -> Decree {
        self.end_decree
    }

    pub fn last_committed_decree(&self) -> Decree {
        self.last_committed_decree
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, decree: Decree) -> Option<&PreparedMutation> {
        if decree < self.start_decree || decree > self.end_decree {
            return None;
        }
        self.entries
            .get((decree - self.start_decree) as usize)
            .and_then(|e| e.as_ref())
    }

    pub fn get_mut(&mut self, decree: Decree) -> Option<&mut PreparedMutation> {
        if decree < self.start_decree || decree > self.end_decree {
            return None;
        }
        self.entries
            .get_mut((decree - self.start_decree) as usize)
            .and_then(|e| e.as_mut())
    }

    pub fn get_mutation_by_decree(&self, decree: Decree) -> Option<Arc<Mutation>> {
        self.get(decree).map(|e| e.mutation.clone())
    }

    /// Every present mutation with decree `>= decree`, in decree order.
    pub fn mutations_from(&self, decree: Decree) -> Vec<Arc<Mutation>> {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref())
            .filter(|e| e.decree() >= decree)
            .map(|e| e.mutation.clone())
            .collect()
    }

    /// Highest decree reachable from the committed point through logged mutations whose ballots
    /// never decrease.
    pub fn last_prepared_decree(&self) -> Decree {
        let mut last_ballot = 0;
        let mut decree = self.last_committed_decree + 1;
        while let Some(entry) = self.get(decree) {
            if !entry.logged || entry.ballot() < last_ballot {
                break;
            }
            last_ballot = entry.ballot();
            decree += 1;
        }

        decree - 1
    }

    /// Drops every mutation and restarts the window right after `init_decree`.
    pub fn reset(&mut self, init_decree: Decree) {
        self.entries.clear();
        self.start_decree = init_decree + 1;
        self.end_decree = init_decree;
        self.last_committed_decree = init_decree;
    }

    /// Drops every mutation at or below `init_decree` and treats it as committed.
    pub fn truncate(&mut self, init_decree: Decree) {
        while self.start_decree <= init_decree && !self.entries.is_empty() {
            self.pop_min();
        }
        if self.entries.is_empty() {
            self.start_decree = init_decree + 1;
            self.end_decree = init_decree;
        }

        self.last_committed_decree = init_decree;
    }

    /// Inserts `entry` following the rules of the replica's `status`. Secondaries and replaying
    /// replicas first hard-commit up to the mutation's piggybacked committed decree; whatever that
    /// commits is returned in order for the caller to execute.
    pub fn prepare(
        &mut self,
        entry: PreparedMutation,
        status: PartitionStatus,
    ) -> Result<Vec<Arc<Mutation>>, PrepareListError> {
        let decree = entry.decree();
        if decree <= self.last_committed_decree {
            return Err(PrepareListError::AlreadyCommitted {
                decree,
                last_committed: self.last_committed_decree,
            });
        }

        let mut committed = Vec::new();
        match status {
            PartitionStatus::Primary => {}
            PartitionStatus::Secondary
            | PartitionStatus::PotentialSecondary
            | PartitionStatus::PartitionSplit => {
                committed = self.commit(entry.mutation.last_committed_decree(), CommitMode::Hard)?;
            }
            PartitionStatus::Inactive => {
                let piggybacked = entry.mutation.last_committed_decree();
                if piggybacked > self.end_decree {
                    self.reset(piggybacked);
                } else if piggybacked > self.last_committed_decree {
                    committed = self.commit(piggybacked, CommitMode::Hard)?;
                }
            }
            PartitionStatus::Error => return Err(PrepareListError::InvalidStatus(status)),
        }

        while decree - self.start_decree >= self.capacity as Decree
            && self.last_committed_decree > self.start_decree
        {
            self.pop_min();
        }
        self.put(entry)?;

        Ok(committed)
    }

    /// Commits up to `decree` and returns the newly committed mutations in decree order. A hard
    /// commit that cannot reach `decree` fails without committing anything.
    pub fn commit(&mut self, decree: Decree, mode: CommitMode) -> Result<Vec<Arc<Mutation>>, PrepareListError> {
        if decree <= self.last_committed_decree {
            return Ok(Vec::new());
        }

        let mut committed = Vec::new();
        let mut last_ballot = 0;
        match mode {
            CommitMode::Hard => {
                for d in (self.last_committed_decree + 1)..=decree {
                    match self.get(d) {
                        Some(entry) if entry.logged => {
                            if entry.ballot() < last_ballot {
                                return Err(PrepareListError::BallotDecreased {
                                    decree: d,
                                    ballot: entry.ballot(),
                                    previous: last_ballot,
                                });
                            }
                            last_ballot = entry.ballot();
                            committed.push(entry.mutation.clone());
                        }
                        _ => return Err(PrepareListError::MissingMutation(d)),
                    }
                }
            }
            CommitMode::Soft => {
                for d in (self.last_committed_decree + 1)..=decree {
                    match self.get(d) {
                        Some(entry) if entry.is_ready_for_commit() && entry.ballot() >= last_ballot => {
                            last_ballot = entry.ballot();
                            committed.push(entry.mutation.clone());
                        }
                        _ => break,
                    }
                }
            }
            CommitMode::AllReady => {
                if decree != self.last_committed_decree + 1 {
                    return Ok(committed);
                }
                let mut d = decree;
                while let Some(entry) = self.get(d) {
                    if !entry.is_ready_for_commit() || entry.ballot() < last_ballot {
                        break;
                    }
                    last_ballot = entry.ballot();
                    committed.push(entry.mutation.clone());
                    d += 1;
                }
            }
        }

        self.last_committed_decree += committed.len() as Decree;
        Ok(committed)
    }

    fn put(&mut self, entry: PreparedMutation) -> Result<(), PrepareListError> {
        let decree = entry.decree();
        if self.entries.is_empty() {
            self.start_decree = decree;
            self.end_decree = decree;
            self.entries.push_back(Some(entry));
            return Ok(());
        }

        if decree < self.start_decree {
            return Err(PrepareListError::BelowWindow {
                decree,
                min_decree: self.start_decree,
            });
        }
        if decree - self.start_decree >= self.capacity as Decree {
            return Err(PrepareListError::CapacityExceeded {
                decree,
                min_decree: self.start_decree,
                capacity: self.capacity,
            });
        }

        while self.end_decree < decree {
            self.entries.push_back(None);
            self.end_decree += 1;
        }
        let index = (decree - self.start_decree) as usize;
        self.entries[index] = Some(entry);

        Ok(())
    }

    fn pop_min(&mut self) {
        if self.entries.pop_front().is_some() {
            self.start_decree += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Gpid;

    fn entry(decree: Decree, ballot: Ballot, last_committed: Decree) -> PreparedMutation {
        let mutation = Mutation::new(Gpid::new(1, 0), ballot, decree, last_committed, Vec::new());
        PreparedMutation::new(Arc::new(mutation), true, true)
    }

    fn decrees(mutations: &[Arc<Mutation>]) -> Vec<Decree> {
        mutations.iter().map(|m| m.decree()).collect()
    }

    #[test]
    fn primary_commits_in_order() {
        let mut plist = PrepareList::new(0, 10);
        for d in 1..=5 {
            let mut e = entry(d, 1, 0);
            e.quorum_reached = false;
            plist.prepare(e, PartitionStatus::Primary).unwrap();
        }

        // Acks arrive out of order.
        for d in [3, 1, 2].iter() {
            plist.get_mut(*d).unwrap().quorum_reached = true;
        }
        let committed = plist.commit(5, CommitMode::Soft).unwrap();
        assert_eq!(decrees(&committed), vec![1, 2, 3]);
        assert_eq!(plist.last_committed_decree(), 3);

        // Nothing is committed twice.
        assert!(plist.commit(3, CommitMode::Soft).unwrap().is_empty());

        plist.get_mut(5).unwrap().quorum_reached = true;
        assert!(plist.commit(5, CommitMode::Soft).unwrap().is_empty());
        plist.get_mut(4).unwrap().quorum_reached = true;
        let committed = plist.commit(4, CommitMode::AllReady).unwrap();
        assert_eq!(decrees(&committed), vec![4, 5]);
        assert_eq!(plist.last_committed_decree(), 5);
    }

    #[test]
    fn all_ready_only_starts_after_committed_point() {
        let mut plist = PrepareList::new(0, 10);
        plist.prepare(entry(1, 1, 0), PartitionStatus::Primary).unwrap();
        plist.prepare(entry(2, 1, 0), PartitionStatus::Primary).unwrap();

        assert!(plist.commit(2, CommitMode::AllReady).unwrap().is_empty());
        assert_eq!(decrees(&plist.commit(1, CommitMode::AllReady).unwrap()), vec![1, 2]);
    }

    #[test]
    fn secondary_prepare_commits_piggybacked_decree() {
        let mut plist = PrepareList::new(0, 10);
        assert!(plist.prepare(entry(1, 1, 0), PartitionStatus::Secondary).unwrap().is_empty());
        assert!(plist.prepare(entry(2, 1, 0), PartitionStatus::Secondary).unwrap().is_empty());

        let committed = plist.prepare(entry(3, 1, 2), PartitionStatus::Secondary).unwrap();
        assert_eq!(decrees(&committed), vec![1, 2]);
        assert_eq!(plist.last_committed_decree(), 2);
        assert_eq!(plist.max_decree(), 3);
    }

    #[test]
    fn hard_commit_fails_without_side_effects() {
        let mut plist = PrepareList::new(0, 10);
        plist.prepare(entry(1, 1, 0), PartitionStatus::Secondary).unwrap();
        plist.prepare(entry(3, 1, 0), PartitionStatus::Secondary).unwrap();

        assert_eq!(
            plist.commit(3, CommitMode::Hard),
            Err(PrepareListError::MissingMutation(2))
        );
        assert_eq!(plist.last_committed_decree(), 0);

        assert_eq!(
            plist.prepare(entry(4, 1, 3), PartitionStatus::Secondary).unwrap_err(),
            PrepareListError::MissingMutation(2)
        );
    }

    #[test]
    fn hard_commit_rejects_decreasing_ballot() {
        let mut plist = PrepareList::new(0, 10);
        plist.prepare(entry(1, 2, 0), PartitionStatus::Secondary).unwrap();
        plist.prepare(entry(2, 1, 0), PartitionStatus::Secondary).unwrap();

        assert!(matches!(
            plist.commit(2, CommitMode::Hard),
            Err(PrepareListError::BallotDecreased { decree: 2, .. })
        ));
    }

    #[test]
    fn capacity_bounds_the_window() {
        let mut plist = PrepareList::new(0, 3);
        for d in 1..=3 {
            plist.prepare(entry(d, 1, 0), PartitionStatus::Primary).unwrap();
        }
        assert!(matches!(
            plist.prepare(entry(4, 1, 0), PartitionStatus::Primary),
            Err(PrepareListError::CapacityExceeded { decree: 4, .. })
        ));

        // Committed heads are evicted to make room.
        plist.commit(2, CommitMode::Soft).unwrap();
        plist.prepare(entry(4, 1, 0), PartitionStatus::Primary).unwrap();
        assert_eq!(plist.min_decree(), 2);
        assert_eq!(plist.max_decree(), 4);
        assert_eq!(plist.count(), 3);
        assert!(plist.get(1).is_none());
    }

    #[test]
    fn prepare_rejects_committed_decrees() {
        let mut plist = PrepareList::new(5, 10);
        assert_eq!(
            plist.prepare(entry(5, 1, 4), PartitionStatus::Primary).unwrap_err(),
            PrepareListError::AlreadyCommitted {
                decree: 5,
                last_committed: 5
            }
        );
        assert!(matches!(
            plist.prepare(entry(6, 1, 5), PartitionStatus::Error),
            Err(PrepareListError::InvalidStatus(PartitionStatus::Error))
        ));
    }

    #[test]
    fn inactive_replay_resets_to_piggybacked_decree() {
        let mut plist = PrepareList::new(0, 10);
        // Log replay starting at a decree above anything known resets the window.
        plist.prepare(entry(8, 1, 7), PartitionStatus::Inactive).unwrap();
        assert_eq!(plist.last_committed_decree(), 7);
        assert_eq!(plist.min_decree(), 8);

        let committed = plist.prepare(entry(9, 1, 8), PartitionStatus::Inactive).unwrap();
        assert_eq!(decrees(&committed), vec![8]);
        assert_eq!(plist.last_committed_decree(), 8);
    }

    #[test]
    fn last_prepared_decree_stops_at_gaps_and_unlogged() {
        let mut plist = PrepareList::new(0, 10);
        plist.prepare(entry(1, 1, 0), PartitionStatus::Primary).unwrap();
        plist.prepare(entry(2, 1, 0), PartitionStatus::Primary).unwrap();
        plist.prepare(entry(4, 1, 0), PartitionStatus::Primary).unwrap();
        assert_eq!(plist.last_prepared_decree(), 2);

        plist.prepare(entry(3, 1, 0), PartitionStatus::Primary).unwrap();
        assert_eq!(plist.last_prepared_decree(), 4);

        plist.get_mut(2).unwrap().logged = false;
        assert_eq!(plist.last_prepared_decree(), 1);
    }

    #[test]
    fn truncate_and_reset() {
        let mut plist = PrepareList::new(0, 10);
        for d in 1..=4 {
            plist.prepare(entry(d, 1, 0), PartitionStatus::Primary).unwrap();
        }

        plist.truncate(2);
        assert_eq!(plist.last_committed_decree(), 2);
        assert_eq!(plist.min_decree(), 3);
        assert_eq!(decrees(&plist.mutations_from(0)), vec![3, 4]);

        plist.truncate(9);
        assert_eq!(plist.count(), 0);
        assert_eq!(plist.min_decree(), 10);
        assert_eq!(plist.max_decree(), 9);

        plist.reset(20);
        assert_eq!(plist.last_committed_decree(), 20);
        assert!(plist.get_mutation_by_decree(20).is_none());
    }
}
