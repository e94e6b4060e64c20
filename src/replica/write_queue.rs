use crate::actor::Callback;
use crate::replica::replica_api::{ClientWriteError, ClientWriteInput, ClientWriteOutput};
use std::collections::VecDeque;

/// Most client writes folded into one mutation.
const MAX_BATCH_SIZE: usize = 64;

#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) input: ClientWriteInput,
    pub(crate) callback: Callback<ClientWriteOutput, ClientWriteError>,
}

/// WriteQueue holds client writes a primary accepted but cannot prepare yet because too many
/// decrees are already in flight.
pub(crate) struct WriteQueue {
    pending: VecDeque<PendingWrite>,
    batch_disabled: bool,
}

impl WriteQueue {
    pub(crate) fn new(batch_disabled: bool) -> Self {
        WriteQueue {
            pending: VecDeque::new(),
            batch_disabled,
        }
    }

    pub(crate) fn push(&mut self, write: PendingWrite) {
        self.pending.push_back(write);
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Next batch to turn into a mutation, if `in_flight` leaves room under `staleness`.
    pub(crate) fn check_possible_work(&mut self, in_flight: usize, staleness: usize) -> Option<Vec<PendingWrite>> {
        if in_flight >= staleness || self.pending.is_empty() {
            return None;
        }

        let batch_size = if self.batch_disabled {
            1
        } else {
            self.pending.len().min(MAX_BATCH_SIZE)
        };
        Some(self.pending.drain(..batch_size).collect())
    }

    pub(crate) fn drain_all(&mut self) -> Vec<PendingWrite> {
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::put_update;
    use tokio::sync::oneshot;

    fn write(key: &str) -> PendingWrite {
        let (tx, _rx) = oneshot::channel();
        PendingWrite {
            input: ClientWriteInput {
                updates: vec![put_update(key, "v")],
            },
            callback: Callback(tx),
        }
    }

    #[test]
    fn batches_until_staleness() {
        let mut queue = WriteQueue::new(false);
        for i in 0..3 {
            queue.push(write(&i.to_string()));
        }

        assert!(queue.check_possible_work(10, 10).is_none());
        assert_eq!(queue.len(), 3);

        let batch = queue.check_possible_work(9, 10).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(queue.len(), 0);
        assert!(queue.check_possible_work(0, 10).is_none());
    }

    #[test]
    fn one_write_per_mutation_when_batching_is_off() {
        let mut queue = WriteQueue::new(true);
        queue.push(write("a"));
        queue.push(write("b"));

        assert_eq!(queue.check_possible_work(0, 10).unwrap().len(), 1);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all().len(), 1);
        assert_eq!(queue.len(), 0);
    }
}
