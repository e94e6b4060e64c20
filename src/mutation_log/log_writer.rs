use crate::common::Mutation;
use crate::mutation_log::{LogAppendResult, LogError, MutationLog};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub type LogAppendCallback = oneshot::Receiver<Result<LogAppendResult, LogError>>;

enum WriteRequest {
    Append {
        mutation: Mutation,
        done: oneshot::Sender<Result<LogAppendResult, LogError>>,
    },
    Flush(oneshot::Sender<()>),
}

/// LogWriter moves appends to a mutation log off the caller's thread. Appends are written in the
/// order they were submitted; whatever queues up while one write is on disk goes out next as a
/// single batch with a single sync.
#[derive(Clone)]
pub struct LogWriter {
    sender: mpsc::UnboundedSender<WriteRequest>,
}

impl LogWriter {
    /// Must be called inside a tokio runtime. The writer task ends once every handle is dropped.
    pub fn spawn(logger: slog::Logger, log: Arc<MutationLog>) -> LogWriter {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::task::spawn(run_writer(logger, log, receiver));
        LogWriter { sender }
    }

    /// Queues `mutation`. The returned receiver resolves once it is durable (or failed to be).
    pub fn submit(&self, mutation: Mutation) -> LogAppendCallback {
        let (done, receiver) = oneshot::channel();
        // A stopped writer drops `done`, which the caller sees as a failed append.
        let _ = self.sender.send(WriteRequest::Append { mutation, done });
        receiver
    }

    /// Resolves after everything submitted before it was written.
    pub async fn flush(&self) {
        let (done, receiver) = oneshot::channel();
        if self.sender.send(WriteRequest::Flush(done)).is_ok() {
            let _ = receiver.await;
        }
    }
}

async fn run_writer(logger: slog::Logger, log: Arc<MutationLog>, mut receiver: mpsc::UnboundedReceiver<WriteRequest>) {
    while let Some(first) = receiver.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = receiver.try_recv() {
            batch.push(next);
        }

        let mut mutations = Vec::new();
        let mut appends = Vec::new();
        let mut flushes = Vec::new();
        for request in batch {
            match request {
                WriteRequest::Append { mutation, done } => {
                    mutations.push(mutation);
                    appends.push(done);
                }
                WriteRequest::Flush(done) => flushes.push(done),
            }
        }

        if !mutations.is_empty() {
            let count = mutations.len();
            let log = log.clone();
            let written = tokio::task::spawn_blocking(move || log.append_batch(&mutations))
                .await
                .unwrap_or_else(|e| Err(LogError::AppendFailed(e.to_string())));
            match written {
                Ok(results) => {
                    for (done, result) in appends.into_iter().zip(results) {
                        let _ = done.send(Ok(result));
                    }
                }
                Err(e) => {
                    slog::error!(logger, "Writing a batch of {} mutations failed: {}", count, e);
                    let reason = e.to_string();
                    for done in appends {
                        let _ = done.send(Err(LogError::AppendFailed(reason.clone())));
                    }
                }
            }
        }
        for done in flushes {
            let _ = done.send(());
        }
    }

    slog::debug!(logger, "Log writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Decree, Gpid, UpdateRecord};
    use bytes::Bytes;

    fn mutation(decree: Decree) -> Mutation {
        Mutation::new(
            Gpid::new(1, 0),
            1,
            decree,
            decree - 1,
            vec![UpdateRecord {
                code: 1,
                data: Bytes::from(format!("value-{}", decree)),
            }],
        )
    }

    fn test_logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn appends_land_in_submit_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MutationLog::open(test_logger(), dir.path(), 256).unwrap());
        let writer = LogWriter::spawn(test_logger(), log.clone());

        let pending: Vec<_> = (1..=20).map(|d| writer.submit(mutation(d))).collect();
        let mut last_offset = -1;
        for done in pending {
            let result = done.await.unwrap().unwrap();
            assert!(result.offset > last_offset);
            last_offset = result.offset;
        }

        let mut replayed = Vec::new();
        log.replay(|mu| replayed.push(mu.decree())).unwrap();
        assert_eq!(replayed, (1..=20).collect::<Vec<_>>());
        assert!(log.file_count() > 1);
    }

    #[tokio::test]
    async fn flush_waits_for_earlier_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap());
        let writer = LogWriter::spawn(test_logger(), log.clone());

        for decree in 1..=5 {
            let _ = writer.submit(mutation(decree));
        }
        writer.flush().await;
        assert_eq!(log.max_decree(Gpid::new(1, 0)), 5);
    }

    #[tokio::test]
    async fn failed_batch_fails_every_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(MutationLog::open(test_logger(), dir.path(), 1 << 20).unwrap());
        let writer = LogWriter::spawn(test_logger(), log);
        writer.submit(mutation(1)).await.unwrap().unwrap();
        // The open segment keeps taking writes, but the next one can't be created.
        std::fs::remove_dir_all(dir.path()).unwrap();

        let big = Mutation::new(
            Gpid::new(1, 0),
            1,
            2,
            1,
            vec![UpdateRecord {
                code: 1,
                data: Bytes::from(vec![0u8; 2 << 20]),
            }],
        );
        writer.submit(big).await.unwrap().unwrap();
        let result = writer.submit(mutation(3)).await.unwrap();
        assert!(matches!(result, Err(LogError::AppendFailed(_))));
    }
}
