//! Host-facing speech session: open, set params, feed text, read audio, flush, close.

use crate::cache::{EntryHandle, FetchError, TtsCache};
use crate::profile::{ProfileError, VoiceProfile};
use crate::provider::SynthesisProvider;
use crate::stream::{ReadCursor, ReadError, ReadOutcome, StreamingReader};
use std::sync::Arc;

const LOG_TARGET: &str = "tts_cache::session";

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("no text has been fed to this session")]
    NotFed,

    #[error(transparent)]
    Param(#[from] ProfileError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Read(#[from] ReadError),
}

pub struct SpeechSession<P> {
    cache: Arc<TtsCache<P>>,
    reader: StreamingReader,
    profile: VoiceProfile,
    channels: u16,
    entry: Option<EntryHandle>,
    cursor: ReadCursor,
}

impl<P: SynthesisProvider> SpeechSession<P> {
    /// Starts from the configured credentials and the stock voice settings.
    pub fn open(cache: Arc<TtsCache<P>>, voice: &str, sample_rate: u32, channels: u16) -> Self {
        let config = cache.config();
        let profile = VoiceProfile::new(config.credentials.clone(), voice, sample_rate);
        let reader = StreamingReader::new(config.stream_threshold);
        tracing::debug!(target: LOG_TARGET, voice, sample_rate, channels, "session opened");
        Self {
            cache,
            reader,
            profile,
            channels,
            entry: None,
            cursor: ReadCursor::new(),
        }
    }

    pub fn profile(&self) -> &VoiceProfile {
        &self.profile
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn entry(&self) -> Option<&EntryHandle> {
        self.entry.as_ref()
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), SessionError> {
        self.profile.set_param(name, value)?;
        Ok(())
    }

    /// Numeric host parameters carry nothing the cache uses.
    pub fn set_numeric_param(&mut self, name: &str, value: i64) {
        tracing::debug!(target: LOG_TARGET, param = name, value, "numeric param ignored");
    }

    pub fn set_float_param(&mut self, name: &str, value: f64) {
        tracing::debug!(target: LOG_TARGET, param = name, value, "float param ignored");
    }

    /// Looks the text up in the cache, starting a synthesis on a miss. Resets the read cursor.
    pub async fn feed_text(&mut self, text: &str) -> Result<&EntryHandle, SessionError> {
        self.entry = None;
        self.cursor.reset();
        let entry = self.cache.fetch(&self.profile, text).await?;
        Ok(self.entry.insert(entry))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, SessionError> {
        let entry = self.entry.as_ref().ok_or(SessionError::NotFed)?;
        Ok(self.reader.read(entry, &mut self.cursor, buf).await?)
    }

    /// Stops playback of the current text. A synthesis still running keeps filling the cache.
    pub fn flush(&mut self) {
        self.entry = None;
        self.cursor.reset();
    }

    pub fn close(self) {
        tracing::debug!(target: LOG_TARGET, read = self.cursor.position(), "session closed");
    }
}
