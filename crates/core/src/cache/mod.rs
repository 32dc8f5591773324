pub mod inflight;
pub mod layout;
pub mod progress;

use crate::config::{CacheConfig, ConfigError};
use crate::fingerprint::CacheKey;
use crate::profile::VoiceProfile;
use crate::provider::SynthesisProvider;
use crate::synth::{SynthesisError, Synthesizer};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use inflight::{InflightRegistry, InflightSlot, Lookup};
pub use layout::CacheLayout;
pub use progress::{EntryProgress, EntryState};

const LOG_TARGET: &str = "tts_cache::cache";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("voice name {0:?} is not a valid cache directory component")]
    InvalidVoice(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
}

#[derive(Clone, Debug)]
pub enum EntrySource {
    /// Found on disk; size is final.
    Cached,
    /// Being written by a sink in this process.
    InFlight(Arc<EntryProgress>),
}

/// What a fetch hands to the reader.
#[derive(Clone, Debug)]
pub struct EntryHandle {
    path: PathBuf,
    key: CacheKey,
    source: EntrySource,
}

impl EntryHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn source(&self) -> &EntrySource {
        &self.source
    }

    pub fn was_cached(&self) -> bool {
        matches!(self.source, EntrySource::Cached)
    }

    /// Resolves when the entry can no longer change.
    pub async fn finished(&self) -> EntryState {
        match &self.source {
            EntrySource::Cached => EntryState::Complete,
            EntrySource::InFlight(progress) => progress.finished().await,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(path: PathBuf, source: EntrySource) -> Self {
        let key = CacheKey {
            profile: crate::fingerprint::Fingerprint::of("test"),
            text: crate::fingerprint::Fingerprint::of(path.to_string_lossy().as_bytes()),
        };
        Self { path, key, source }
    }
}

/// The cache coordinator: fingerprints a request, resolves its entry, and either serves it or
/// starts a synthesis into it.
pub struct TtsCache<P> {
    config: CacheConfig,
    layout: CacheLayout,
    inflight: Arc<InflightRegistry>,
    synthesizer: Synthesizer<P>,
}

impl<P: SynthesisProvider> TtsCache<P> {
    pub fn new(config: CacheConfig, provider: P) -> Result<Self, ConfigError> {
        config.prepare()?;
        let layout = CacheLayout::new(&config.cache_root).map_err(|e| ConfigError::CacheRoot {
            path: config.cache_root.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            config,
            layout,
            inflight: InflightRegistry::new(),
            synthesizer: Synthesizer::new(provider),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    pub fn provider(&self) -> &P {
        self.synthesizer.provider()
    }

    /// Number of syntheses currently writing.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub async fn fetch(
        &self,
        profile: &VoiceProfile,
        text: &str,
    ) -> Result<EntryHandle, FetchError> {
        let key = CacheKey::derive(profile, text);
        let path = self
            .layout
            .resolve(&profile.voice, &key, profile.format)
            .await?;

        let lookup = self.inflight.lookup(&path, |p| {
            p.try_exists().map_err(|source| CacheError::Io {
                path: p.to_path_buf(),
                source,
            })
        })?;

        let source = match lookup {
            Lookup::Cached => {
                tracing::info!(target: LOG_TARGET, path = %path.display(), "cache hit");
                EntrySource::Cached
            }
            Lookup::Joined(progress) => {
                tracing::info!(target: LOG_TARGET, path = %path.display(), "joined in-flight synthesis");
                EntrySource::InFlight(progress)
            }
            Lookup::Claimed(slot) => {
                tracing::info!(target: LOG_TARGET, path = %path.display(), "cache miss");
                let progress = self.synthesizer.synthesize(profile, text, slot).await?;
                EntrySource::InFlight(progress)
            }
        };

        Ok(EntryHandle { path, key, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::profile::test_profile;
    use crate::provider::{EventSender, ProviderError, SynthesisEvent, SynthesisRequest, Token};
    use bytes::Bytes;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Accepts every request and streams the text bytes back after a short delay.
    #[derive(Clone, Default)]
    struct SlowEchoProvider {
        submits: Arc<AtomicUsize>,
    }

    impl SynthesisProvider for SlowEchoProvider {
        fn fetch_token(
            &self,
            _access_key: Secret,
            _key_secret: Secret,
        ) -> BoxFuture<'_, Result<Token, ProviderError>> {
            async {
                Ok(Token {
                    value: Secret::new("tok").expect("non-empty"),
                    expires_at: None,
                })
            }
            .boxed()
        }

        fn submit(
            &self,
            request: SynthesisRequest,
            events: EventSender,
        ) -> BoxFuture<'_, Result<(), ProviderError>> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    let _ = events.send(SynthesisEvent::Audio(Bytes::from(request.text)));
                    let _ = events.send(SynthesisEvent::Closed);
                });
                Ok(())
            }
            .boxed()
        }
    }

    fn cache_in(dir: &Path, provider: SlowEchoProvider) -> TtsCache<SlowEchoProvider> {
        let profile = test_profile();
        let config = CacheConfig::new(profile.credentials, dir.join("cache"));
        TtsCache::new(config, provider).expect("cache")
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = SlowEchoProvider::default();
        let cache = cache_in(dir.path(), provider.clone());
        let profile = test_profile();

        let first = cache.fetch(&profile, "hello").await.expect("fetch");
        assert!(!first.was_cached());
        assert_eq!(first.finished().await, EntryState::Complete);

        // the slot is released right after the terminal state is published
        while cache.in_flight() > 0 {
            tokio::task::yield_now().await;
        }

        let second = cache.fetch(&profile, "hello").await.expect("fetch");
        assert!(second.was_cached());
        assert_eq!(second.path(), first.path());
        assert_eq!(provider.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_fetches_share_one_synthesis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = SlowEchoProvider::default();
        let cache = cache_in(dir.path(), provider.clone());
        let profile = test_profile();

        let (a, b) = tokio::join!(cache.fetch(&profile, "same"), cache.fetch(&profile, "same"));
        let (a, b) = (a.expect("fetch a"), b.expect("fetch b"));

        assert_eq!(provider.submits.load(Ordering::SeqCst), 1);
        match (a.source(), b.source()) {
            (EntrySource::InFlight(pa), EntrySource::InFlight(pb)) => {
                assert!(Arc::ptr_eq(pa, pb));
            }
            other => panic!("expected both in flight, got {other:?}"),
        }
        assert_eq!(a.finished().await, EntryState::Complete);
    }

    #[tokio::test]
    async fn different_profiles_use_different_buckets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = cache_in(dir.path(), SlowEchoProvider::default());
        let p1 = test_profile();
        let mut p2 = test_profile();
        p2.volume = 90;

        let a = cache.fetch(&p1, "hello").await.expect("fetch");
        let b = cache.fetch(&p2, "hello").await.expect("fetch");

        assert_ne!(a.path().parent(), b.path().parent());
        assert_eq!(a.path().file_name(), b.path().file_name());
    }
}
