//! Background persistence queue.
//!
//! Write paths enqueue a job and return; one worker per coordinator runs jobs
//! in FIFO order against the durable store and runs the rollback continuation
//! when a job fails for good.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, error};

use super::Inner;
use crate::cache::L1Entry;
use crate::paste::{Paste, PasteMeta};

/// Unit of deferred durable work.
#[derive(Debug)]
pub(crate) enum PersistJob {
    /// Insert a freshly reserved paste.
    Create { paste: Paste },
    /// Overwrite an existing paste. Carries what is needed to undo the cache
    /// effects if the store rejects the write.
    Update {
        paste: Paste,
        prior_l1: Option<L1Entry>,
        previous: PasteMeta,
    },
    /// Empty the content and store the negated expiry, then reassert the
    /// tombstone in L2 over anything an earlier job wrote there.
    Tombstone { key: String, tombstone: PasteMeta },
}

impl PersistJob {
    fn key(&self) -> &str {
        match self {
            Self::Create { paste } | Self::Update { paste, .. } => &paste.key,
            Self::Tombstone { key, .. } => key,
        }
    }
}

pub(crate) struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl PersistQueue {
    /// Spawn the worker. It holds only a weak handle so dropping the last
    /// coordinator stops it.
    pub(crate) fn start(owner: Weak<Inner>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        tokio::spawn(worker(rx, owner, Arc::clone(&pending), Arc::clone(&idle)));

        Self { tx, pending, idle }
    }

    pub(crate) fn push(&self, job: PersistJob) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(rejected) = self.tx.send(job) {
            self.finish_one();
            error!(key = %rejected.0.key(), "Persist worker is gone, dropping job");
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Wait until every queued job, rollback included, has finished.
    pub(crate) async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn finish_one(&self) {
        finish_one(&self.pending, &self.idle);
    }
}

fn finish_one(pending: &AtomicUsize, idle: &Notify) {
    if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        idle.notify_waiters();
    }
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    owner: Weak<Inner>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
) {
    while let Some(job) = rx.recv().await {
        match owner.upgrade() {
            Some(inner) => inner.run_job(job).await,
            None => {
                debug!(key = %job.key(), "Coordinator dropped, skipping job");
            }
        }
        finish_one(&pending, &idle);
    }
    debug!("Persist worker stopped");
}
