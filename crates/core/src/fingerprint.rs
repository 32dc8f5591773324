//! Content addressing for cache entries.
//!
//! Two digests are taken per request: one over the voice profile (the bucket) and one over the
//! text (the file). A profile change moves to a new bucket without touching other texts.

use crate::profile::VoiceProfile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 128-bit MD5 digest rendered as 32 lowercase hex chars.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const HEX_LEN: usize = 32;

    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self(format!("{:x}", md5::compute(bytes.as_ref())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub profile: Fingerprint,
    pub text: Fingerprint,
}

impl CacheKey {
    pub fn derive(profile: &VoiceProfile, text: &str) -> Self {
        Self {
            profile: Fingerprint::of(profile.fingerprint_material()),
            text: Fingerprint::of(text),
        }
    }
}
