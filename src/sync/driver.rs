use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use super::fetch::DocumentFetcher;
use super::reconciler::{PassResult, PreviewReconciler};
use super::types::*;
use crate::excel::SheetDecoder;

/// External events that drive reconciliation
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A new upload started a document session
    Load {
        local: Option<FileHandle>,
        filename: CanonicalFilename,
    },
    Filename(CanonicalFilename),
    /// An edit was acknowledged; carries the new revision
    Revision(u64),
    /// Manual reload with the unchanged key
    Reload,
    Close,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("sync driver has shut down")]
    Closed,
}

/// Handle to a reconciler running on its own task
pub struct SyncHandle {
    events: mpsc::UnboundedSender<SyncEvent>,
    snapshots: watch::Receiver<SyncSnapshot>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn send(&self, event: SyncEvent) -> Result<(), DriverError> {
        self.events.send(event).map_err(|_| DriverError::Closed)
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshots.clone()
    }

    /// Snapshots as a stream, starting with the current one
    pub fn stream(&self) -> WatchStream<SyncSnapshot> {
        WatchStream::new(self.snapshots.clone())
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SyncSnapshot) -> bool,
    ) -> Result<SyncSnapshot, DriverError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|s| predicate(s))
            .await
            .map_err(|_| DriverError::Closed)?;
        Ok(snapshot.clone())
    }

    /// Stop accepting events and wait for the driver task to finish
    pub async fn shutdown(self) {
        drop(self.events);
        let _ = self.task.await;
    }
}

/// Run `reconciler` as the single owner of the session state.
///
/// Each event that changes the key (or asks for a reload) starts a pass on
/// its own task. Passes are not cancelled; results whose key has been
/// superseded by the time they finish are dropped on commit.
pub fn spawn_driver<F, D>(reconciler: PreviewReconciler<F, D>) -> SyncHandle
where
    F: DocumentFetcher + 'static,
    D: SheetDecoder + 'static,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let snapshots = reconciler.subscribe();
    let task = tokio::spawn(drive(reconciler, events_rx));

    SyncHandle {
        events: events_tx,
        snapshots,
        task,
    }
}

async fn drive<F, D>(
    mut reconciler: PreviewReconciler<F, D>,
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
) where
    F: DocumentFetcher + 'static,
    D: SheetDecoder + 'static,
{
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<PassResult>();
    let mut in_flight = 0usize;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if !apply(&mut reconciler, event) {
                    continue;
                }
                if let Some(pass) = reconciler.begin_pass() {
                    in_flight += 1;
                    debug!(key = %pass.key(), in_flight, "spawning pass");
                    let done = done_tx.clone();
                    tokio::spawn(async move {
                        let _ = done.send(pass.run().await);
                    });
                }
            }
            Some(result) = done_rx.recv(), if in_flight > 0 => {
                in_flight -= 1;
                reconciler.commit(result);
            }
        }
    }

    debug!(in_flight, "sync driver stopped");
}

/// Apply an event; returns whether a pass should start
fn apply<F, D>(reconciler: &mut PreviewReconciler<F, D>, event: SyncEvent) -> bool
where
    F: DocumentFetcher,
    D: SheetDecoder,
{
    match event {
        SyncEvent::Load { local, filename } => {
            reconciler.load(local, filename);
            true
        }
        SyncEvent::Filename(filename) => reconciler.set_filename(filename),
        SyncEvent::Revision(revision) => reconciler.set_revision(revision),
        SyncEvent::Reload => reconciler.desired_key().is_some(),
        SyncEvent::Close => {
            reconciler.close();
            false
        }
    }
}
