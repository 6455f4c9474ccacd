use tokio::sync::{mpsc, oneshot};

use shiori_core::error::ShioriError;
use shiori_core::models::{PositionUpdate, ProgressCollection, ProgressRecord};
use shiori_core::storage::KeyValueBackend;
use shiori_core::store::ProgressStore;

use crate::RuntimeError;

/// Cloneable handle to the thread that owns the progress store.
///
/// Every read-modify-write runs to completion on that thread before the next
/// command is taken, so concurrent callers never interleave inside one.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

enum StoreCommand {
    IsAvailable {
        reply: oneshot::Sender<bool>,
    },
    Load {
        reply: oneshot::Sender<ProgressCollection>,
    },
    Upsert {
        record: Box<ProgressRecord>,
        reply: oneshot::Sender<Result<ProgressRecord, ShioriError>>,
    },
    UpdatePosition {
        update: PositionUpdate,
        reply: oneshot::Sender<Result<ProgressRecord, ShioriError>>,
    },
    Remove {
        manga_id: String,
        reply: oneshot::Sender<Result<bool, ShioriError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), ShioriError>>,
    },
    MergeMetadata {
        records: Vec<ProgressRecord>,
        reply: oneshot::Sender<Result<usize, ShioriError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl StoreHandle {
    /// Move `store` onto its own thread and return a handle to it.
    pub fn spawn<B>(store: ProgressStore<B>) -> Result<Self, RuntimeError>
    where
        B: KeyValueBackend + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("store-actor".into())
            .spawn(move || actor_loop(store, rx))
            .map_err(|e| {
                tracing::error!("Failed to spawn store thread: {e}");
                RuntimeError::Storage(ShioriError::Io(e))
            })?;

        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> StoreCommand,
    ) -> Result<T, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    pub async fn is_available(&self) -> Result<bool, RuntimeError> {
        self.request(|reply| StoreCommand::IsAvailable { reply }).await
    }

    pub async fn load(&self) -> Result<ProgressCollection, RuntimeError> {
        self.request(|reply| StoreCommand::Load { reply }).await
    }

    pub async fn upsert(&self, record: ProgressRecord) -> Result<ProgressRecord, RuntimeError> {
        self.request(|reply| StoreCommand::Upsert {
            record: Box::new(record),
            reply,
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn update_position(
        &self,
        update: PositionUpdate,
    ) -> Result<ProgressRecord, RuntimeError> {
        self.request(|reply| StoreCommand::UpdatePosition { update, reply })
            .await?
            .map_err(Into::into)
    }

    pub async fn remove(&self, manga_id: &str) -> Result<bool, RuntimeError> {
        let manga_id = manga_id.to_string();
        self.request(|reply| StoreCommand::Remove { manga_id, reply })
            .await?
            .map_err(Into::into)
    }

    pub async fn clear(&self) -> Result<(), RuntimeError> {
        self.request(|reply| StoreCommand::Clear { reply })
            .await?
            .map_err(Into::into)
    }

    pub async fn merge_metadata(&self, records: Vec<ProgressRecord>) -> Result<usize, RuntimeError> {
        self.request(|reply| StoreCommand::MergeMetadata { records, reply })
            .await?
            .map_err(Into::into)
    }

    /// Stop the actor once the commands already queued have run.
    /// Later calls on any clone fail with [`RuntimeError::Closed`].
    pub async fn shutdown(&self) {
        if self
            .request(|reply| StoreCommand::Shutdown { reply })
            .await
            .is_err()
        {
            tracing::debug!("store actor already stopped");
        }
    }
}

fn actor_loop<B: KeyValueBackend>(
    mut store: ProgressStore<B>,
    mut rx: mpsc::UnboundedReceiver<StoreCommand>,
) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StoreCommand::IsAvailable { reply } => {
                let _ = reply.send(store.is_available());
            }
            StoreCommand::Load { reply } => {
                let _ = reply.send(store.load());
            }
            StoreCommand::Upsert { record, reply } => {
                let _ = reply.send(store.upsert(*record));
            }
            StoreCommand::UpdatePosition { update, reply } => {
                let _ = reply.send(store.update_position(&update));
            }
            StoreCommand::Remove { manga_id, reply } => {
                let _ = reply.send(store.remove(&manga_id));
            }
            StoreCommand::Clear { reply } => {
                let _ = reply.send(store.clear());
            }
            StoreCommand::MergeMetadata { records, reply } => {
                let _ = reply.send(store.merge_metadata(&records));
            }
            StoreCommand::Shutdown { reply } => {
                rx.close();
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("store actor stopped");
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shiori_core::models::ProgressParams;
    use shiori_core::storage::MemoryBackend;

    use super::*;

    fn record(id: &str) -> ProgressRecord {
        ProgressParams {
            manga_id: id.into(),
            manga_title: format!("Series {id}"),
            manga_slug: format!("series-{id}"),
            current_chapter_number: 1,
            current_page: 1,
            total_pages_in_chapter: 4,
            ..Default::default()
        }
        .into_record(Utc::now())
    }

    fn spawn_memory() -> StoreHandle {
        StoreHandle::spawn(ProgressStore::new(MemoryBackend::new(), "continueReading")).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_upserts_are_serialised() {
        let store = spawn_memory();
        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.upsert(record(&i.to_string())).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.load().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = spawn_memory();
        store.upsert(record("1")).await.unwrap();
        store.upsert(record("2")).await.unwrap();

        assert!(store.remove("1").await.unwrap());
        assert!(!store.remove("1").await.unwrap());
        assert_eq!(store.load().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let store = spawn_memory();
        let other = store.clone();
        store.shutdown().await;

        assert!(matches!(other.load().await, Err(RuntimeError::Closed)));
        assert!(matches!(
            other.upsert(record("1")).await,
            Err(RuntimeError::Closed)
        ));
        // Shutting down twice is harmless.
        other.shutdown().await;
    }
}
