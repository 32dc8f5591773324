//! Threshold-gated progressive reads over a cache entry.
//!
//! A reader may start on an entry that is still being written. Nothing is returned until the
//! entry holds at least the configured threshold of flushed bytes, which absorbs the provider's
//! chunk jitter. After that, reads return whatever is flushed beyond the cursor. End of stream is
//! only reported once the entry is complete, so a stalled provider reads as `NotReady`.

use crate::cache::{EntryHandle, EntrySource, EntryState};
use crate::config::StreamThreshold;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const LOG_TARGET: &str = "tts_cache::stream";

/// Per-session read offset. Only moves forward until reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadCursor(u64);

impl ReadCursor {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn position(&self) -> u64 {
        self.0
    }

    pub fn reset(&mut self) {
        self.0 = 0;
    }

    fn advance(&mut self, n: usize) {
        self.0 += n as u64;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the front of the buffer.
    Data(usize),
    /// Below the threshold, or drained while more audio is still coming. Poll again later.
    NotReady,
    /// Every byte of a complete entry has been read.
    End,
}

impl ReadOutcome {
    pub fn bytes(&self) -> usize {
        match self {
            Self::Data(n) => *n,
            Self::NotReady | Self::End => 0,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("synthesis for {path} failed: {reason}")]
    SynthesisFailed { path: PathBuf, reason: String },

    #[error("cannot read cache entry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingReader {
    threshold: StreamThreshold,
}

impl StreamingReader {
    pub fn new(threshold: StreamThreshold) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> StreamThreshold {
        self.threshold
    }

    /// Reads up to `buf.len()` bytes at `cursor` and advances it by the amount read.
    pub async fn read(
        &self,
        entry: &EntryHandle,
        cursor: &mut ReadCursor,
        buf: &mut [u8],
    ) -> Result<ReadOutcome, ReadError> {
        let path = entry.path();
        let (available, complete) = match entry.source() {
            EntrySource::Cached => {
                let meta = tokio::fs::metadata(path).await.map_err(|e| io_err(path, e))?;
                (meta.len(), true)
            }
            // state before size: once Complete is observed the counter is final
            EntrySource::InFlight(progress) => match progress.state() {
                EntryState::Failed(reason) => {
                    return Err(ReadError::SynthesisFailed {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
                EntryState::Complete => (progress.written(), true),
                EntryState::InProgress => (progress.written(), false),
            },
        };

        if !complete && available < self.threshold.bytes() {
            tracing::trace!(target: LOG_TARGET, available, threshold = self.threshold.bytes(), "buffering");
            return Ok(ReadOutcome::NotReady);
        }

        let remaining = available.saturating_sub(cursor.position());
        if remaining == 0 {
            return Ok(if complete {
                ReadOutcome::End
            } else {
                ReadOutcome::NotReady
            });
        }
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let want = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        let n = read_at(path, cursor.position(), &mut buf[..want])
            .await
            .map_err(|e| io_err(path, e))?;
        if n == 0 {
            return Ok(if complete {
                ReadOutcome::End
            } else {
                ReadOutcome::NotReady
            });
        }
        cursor.advance(n);
        Ok(ReadOutcome::Data(n))
    }
}

async fn read_at(path: &Path, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn io_err(path: &Path, source: io::Error) -> ReadError {
    ReadError::Io {
        path: path.to_path_buf(),
        source,
    }
}
