use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryState {
    InProgress,
    Complete,
    Failed(String),
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Shared view of one entry while it is being synthesized.
///
/// The sink is the only writer. `written` only counts bytes that were flushed to the file, so
/// readers never read beyond what is on disk. The terminal state is set exactly once.
#[derive(Debug)]
pub struct EntryProgress {
    path: PathBuf,
    written: AtomicU64,
    state: watch::Sender<EntryState>,
}

impl EntryProgress {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (state, _) = watch::channel(EntryState::InProgress);
        Self {
            path: path.into(),
            written: AtomicU64::new(0),
            state,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    pub fn state(&self) -> EntryState {
        self.state.borrow().clone()
    }

    pub(crate) fn record_flushed(&self, bytes: u64) {
        self.written.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn mark_complete(&self) -> bool {
        self.finish(EntryState::Complete)
    }

    pub(crate) fn mark_failed(&self, reason: impl Into<String>) -> bool {
        self.finish(EntryState::Failed(reason.into()))
    }

    fn finish(&self, terminal: EntryState) -> bool {
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = terminal;
            true
        })
    }

    /// Resolves once the entry reaches Complete or Failed.
    pub async fn finished(&self) -> EntryState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(EntryState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }
}
