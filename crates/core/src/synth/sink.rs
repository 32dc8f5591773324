use crate::cache::inflight::InflightSlot;
use crate::cache::progress::EntryProgress;
use crate::provider::{EventReceiver, SynthesisEvent};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

const LOG_TARGET: &str = "tts_cache::sink";

/// Writes one synthesis into its cache entry.
///
/// The sink owns the output file and the in-flight slot. Both terminal paths consume the sink, so
/// the handle is closed and the slot released exactly once.
#[derive(Debug)]
pub(crate) struct EventSink {
    file: File,
    slot: InflightSlot,
}

impl EventSink {
    /// Opens the entry for writing, truncating whatever a previous attempt left behind.
    pub(crate) async fn create(slot: InflightSlot) -> io::Result<Self> {
        let file = File::create(slot.progress().path()).await?;
        Ok(Self { file, slot })
    }

    pub(crate) fn progress(&self) -> &Arc<EntryProgress> {
        self.slot.progress()
    }

    fn path(&self) -> &Path {
        self.slot.progress().path()
    }

    /// Drains provider events until a terminal one arrives or the provider goes away.
    pub(crate) async fn run(mut self, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            match event {
                SynthesisEvent::Started => {
                    tracing::debug!(target: LOG_TARGET, path = %self.path().display(), "synthesis started");
                }
                SynthesisEvent::Audio(chunk) => {
                    if let Err(e) = self.write_chunk(&chunk).await {
                        self.fail(format!("cache write failed: {e}")).await;
                        return;
                    }
                }
                SynthesisEvent::Completed => {
                    tracing::debug!(target: LOG_TARGET, path = %self.path().display(), bytes = self.progress().written(), "synthesis completed");
                }
                SynthesisEvent::Closed => {
                    self.close().await;
                    return;
                }
                SynthesisEvent::Failed(reason) => {
                    self.fail(reason).await;
                    return;
                }
            }
        }
        self.fail("provider dropped the event channel".to_owned())
            .await;
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.file.write_all(chunk).await?;
        self.file.flush().await?;
        self.progress().record_flushed(chunk.len() as u64);
        tracing::trace!(target: LOG_TARGET, bytes = chunk.len(), "chunk flushed");
        Ok(())
    }

    /// Terminal success: make the final size durable, then publish Complete.
    async fn close(mut self) {
        let synced = match self.file.flush().await {
            Ok(()) => self.file.sync_data().await,
            Err(e) => Err(e),
        };
        if let Err(e) = synced {
            self.fail(format!("cache close failed: {e}")).await;
            return;
        }

        let Self { file, slot } = self;
        drop(file);
        slot.progress().mark_complete();
        tracing::info!(
            target: LOG_TARGET,
            path = %slot.progress().path().display(),
            bytes = slot.progress().written(),
            "cache entry complete"
        );
    }

    /// Terminal failure: close the handle, delete the partial entry, publish Failed.
    pub(crate) async fn fail(self, reason: String) {
        let Self { file, slot } = self;
        drop(file);

        let path = slot.progress().path();
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %e, "failed to remove partial cache entry");
            }
        }
        tracing::warn!(target: LOG_TARGET, path = %path.display(), %reason, "synthesis failed");
        slot.progress().mark_failed(reason);
    }
}
