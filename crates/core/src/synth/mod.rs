mod sink;

use crate::cache::inflight::InflightSlot;
use crate::cache::progress::EntryProgress;
use crate::profile::VoiceProfile;
use crate::provider::{ProviderError, SynthesisProvider, SynthesisRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use sink::EventSink;

const LOG_TARGET: &str = "tts_cache::synth";

#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("synthesis rejected: {0}")]
    Rejected(#[source] ProviderError),

    #[error("cannot open cache entry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Submits cache-miss syntheses and hands each audio stream to a sink task.
#[derive(Clone, Debug)]
pub struct Synthesizer<P> {
    provider: P,
}

impl<P: SynthesisProvider> Synthesizer<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Token exchange and submission happen on the caller; the audio arrives later on a spawned
    /// task. On rejection no file is left at the entry path.
    pub async fn synthesize(
        &self,
        profile: &VoiceProfile,
        text: &str,
        slot: InflightSlot,
    ) -> Result<Arc<EntryProgress>, SynthesisError> {
        let credentials = &profile.credentials;
        let token = self
            .provider
            .fetch_token(credentials.access_key.clone(), credentials.key_secret.clone())
            .await
            .map_err(|e| {
                tracing::warn!(target: LOG_TARGET, error = %e, "token exchange failed");
                slot.progress().mark_failed(format!("token exchange failed: {e}"));
                SynthesisError::Rejected(e)
            })?;

        let path = slot.progress().path().to_path_buf();
        let sink = EventSink::create(slot)
            .await
            .map_err(|source| SynthesisError::Io { path, source })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let request = SynthesisRequest::new(profile, &token, text);
        match self.provider.submit(request, tx).await {
            Ok(()) => {
                let progress = Arc::clone(sink.progress());
                tracing::info!(
                    target: LOG_TARGET,
                    path = %progress.path().display(),
                    voice = %profile.voice,
                    chars = text.chars().count(),
                    "synthesis submitted"
                );
                tokio::spawn(sink.run(rx));
                Ok(progress)
            }
            Err(e) => {
                drop(rx);
                sink.fail(format!("submission rejected: {e}")).await;
                Err(SynthesisError::Rejected(e))
            }
        }
    }
}
