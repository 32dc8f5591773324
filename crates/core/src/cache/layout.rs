use crate::cache::CacheError;
use crate::fingerprint::{CacheKey, Fingerprint};
use crate::profile::{is_valid_voice, AudioFormat};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "tts_cache::layout";

/// `<root>/<voice>_<profile fp>/<text fp>.<ext>`. The filesystem is the index.
#[derive(Clone, Debug)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    /// Relative roots are anchored at the current directory so every resolved path is absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|source| CacheError::Io {
                    path: root.clone(),
                    source,
                })?
                .join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the bucket directory, creating it and its ancestors if needed. The voice must be a
    /// single path component so the bucket stays directly under the root.
    pub async fn resolve_bucket(
        &self,
        voice: &str,
        profile: &Fingerprint,
    ) -> Result<PathBuf, CacheError> {
        if !is_valid_voice(voice) {
            return Err(CacheError::InvalidVoice(voice.to_owned()));
        }
        let bucket = self.root.join(format!("{voice}_{profile}"));
        // create_dir_all treats a concurrent creator as success
        tokio::fs::create_dir_all(&bucket)
            .await
            .map_err(|source| CacheError::Io {
                path: bucket.clone(),
                source,
            })?;
        tracing::trace!(target: LOG_TARGET, bucket = %bucket.display(), "bucket ready");
        Ok(bucket)
    }

    /// Entry path inside `bucket`. Does not touch the filesystem.
    pub fn resolve_entry(bucket: &Path, text: &Fingerprint, format: AudioFormat) -> PathBuf {
        bucket.join(format!("{text}.{}", format.extension()))
    }

    pub async fn resolve(
        &self,
        voice: &str,
        key: &CacheKey,
        format: AudioFormat,
    ) -> Result<PathBuf, CacheError> {
        let bucket = self.resolve_bucket(voice, &key.profile).await?;
        Ok(Self::resolve_entry(&bucket, &key.text, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::test_profile;
    use std::sync::Arc;

    #[tokio::test]
    async fn entry_path_shape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = CacheLayout::new(dir.path()).expect("layout");
        let profile = test_profile();
        let key = CacheKey::derive(&profile, "hello");

        let path = layout
            .resolve(&profile.voice, &key, profile.format)
            .await
            .expect("resolved");

        let expected = dir
            .path()
            .join(format!("xiaoyun_{}", key.profile))
            .join(format!("{}.wav", key.text));
        assert_eq!(path, expected);
        assert!(path.parent().expect("bucket").is_dir());
        assert!(!path.exists());
    }

    #[test]
    fn relative_root_becomes_absolute() {
        let layout = CacheLayout::new("some_cache").expect("layout");
        assert!(layout.root().is_absolute());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bucket_creation_does_not_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = Arc::new(CacheLayout::new(dir.path().join("deep/root")).expect("layout"));
        let fp = Fingerprint::of("params");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let layout = Arc::clone(&layout);
                let fp = fp.clone();
                tokio::spawn(async move { layout.resolve_bucket("xiaoyun", &fp).await })
            })
            .collect();

        for h in handles {
            h.await.expect("task").expect("bucket created");
        }
    }

    #[tokio::test]
    async fn unwritable_root_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").expect("write");
        let layout = CacheLayout::new(&blocker).expect("layout");

        let err = layout
            .resolve_bucket("xiaoyun", &Fingerprint::of("p"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }

    #[tokio::test]
    async fn voice_cannot_leave_the_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let layout = CacheLayout::new(&root).expect("layout");
        let fp = Fingerprint::of("p");

        for voice in ["../../escaped", "../x", "a/b", ""] {
            let err = layout.resolve_bucket(voice, &fp).await.unwrap_err();
            assert!(matches!(err, CacheError::InvalidVoice(_)), "{voice:?}");
        }
        assert!(!dir.path().join(format!("escaped_{fp}")).exists());
        assert!(!root.exists());
    }
}
