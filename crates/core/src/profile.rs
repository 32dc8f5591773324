use crate::config::{Credentials, Secret};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const DEFAULT_VOICE: &str = "xiaoyun";
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_VOLUME: i32 = 50;
pub const DEFAULT_SPEECH_RATE: i32 = 0;
pub const DEFAULT_PITCH_RATE: i32 = 0;

const LOG_TARGET: &str = "tts_cache::profile";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Pcm,
    Mp3,
    Opus,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Pcm => "pcm",
            Self::Mp3 => "mp3",
            Self::Opus => "opus",
        }
    }

    /// File extension used for cache entries in this format.
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioFormat {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "pcm" => Ok(Self::Pcm),
            "mp3" => Ok(Self::Mp3),
            "opus" => Ok(Self::Opus),
            _ => Err(ProfileError::InvalidValue {
                name: "format".to_owned(),
                value: s.to_owned(),
            }),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("invalid value for parameter {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// Everything that shapes the synthesized audio. Any field change must land in a different cache bucket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VoiceProfile {
    pub credentials: Credentials,
    pub voice: String,
    pub format: AudioFormat,
    pub sample_rate: u32,
    /// 0..=100
    pub volume: i32,
    /// -500..=500
    pub speech_rate: i32,
    /// -500..=500
    pub pitch_rate: i32,
}

impl VoiceProfile {
    pub fn new(credentials: Credentials, voice: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            credentials,
            voice: voice.into(),
            format: AudioFormat::default(),
            sample_rate,
            volume: DEFAULT_VOLUME,
            speech_rate: DEFAULT_SPEECH_RATE,
            pitch_rate: DEFAULT_PITCH_RATE,
        }
    }

    /// Every field in a fixed order, each as `<byte len>:<value>`, so no two distinct profiles
    /// share material. The input to the bucket fingerprint.
    pub fn fingerprint_material(&self) -> String {
        let fields = [
            self.credentials.app_key.expose().to_owned(),
            self.credentials.access_key.expose().to_owned(),
            self.credentials.key_secret.expose().to_owned(),
            self.voice.clone(),
            self.format.as_str().to_owned(),
            self.sample_rate.to_string(),
            self.volume.to_string(),
            self.speech_rate.to_string(),
            self.pitch_rate.to_string(),
        ];
        let mut s = String::with_capacity(128);
        for field in &fields {
            s.push_str(&field.len().to_string());
            s.push(':');
            s.push_str(field);
        }
        s
    }

    /// Applies a host text parameter. Names are case-insensitive; unknown names are ignored.
    pub fn set_param(&mut self, name: &str, value: &str) -> Result<(), ProfileError> {
        tracing::debug!(target: LOG_TARGET, param = name, value, "text param");
        match name.to_ascii_lowercase().as_str() {
            "app_key" => self.credentials.app_key = secret(name, value)?,
            "access_key" => self.credentials.access_key = secret(name, value)?,
            "key_secret" => self.credentials.key_secret = secret(name, value)?,
            "voice" => {
                if !is_valid_voice(value) {
                    return Err(invalid(name, value));
                }
                self.voice = value.to_owned();
            }
            "format" => self.format = value.parse()?,
            "sample_rate" => self.sample_rate = number(name, value)?,
            "volume" => self.volume = number(name, value)?,
            "speech_rate" => self.speech_rate = number(name, value)?,
            "pitch_rate" => self.pitch_rate = number(name, value)?,
            _ => {
                tracing::debug!(target: LOG_TARGET, param = name, "ignoring unknown param");
            }
        }
        Ok(())
    }
}

/// Voice names become a directory name under the cache root, so they must stay a single
/// path component.
pub fn is_valid_voice(voice: &str) -> bool {
    !voice.is_empty() && !voice.contains(['/', '\\', '\0']) && !voice.contains("..")
}

fn secret(name: &str, value: &str) -> Result<Secret, ProfileError> {
    Secret::new(value).map_err(|_| invalid(name, value))
}

fn number<T: FromStr>(name: &str, value: &str) -> Result<T, ProfileError> {
    value.trim().parse().map_err(|_| invalid(name, value))
}

fn invalid(name: &str, value: &str) -> ProfileError {
    ProfileError::InvalidValue {
        name: name.to_owned(),
        value: value.to_owned(),
    }
}

#[cfg(test)]
pub(crate) fn test_profile() -> VoiceProfile {
    let credentials = Credentials::from_parts(
        Secret::new("app").ok(),
        Secret::new("access").ok(),
        Secret::new("secret").ok(),
    )
    .expect("complete credentials");
    VoiceProfile::new(credentials, DEFAULT_VOICE, DEFAULT_SAMPLE_RATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_open() {
        let p = test_profile();
        assert_eq!(p.format, AudioFormat::Wav);
        assert_eq!(p.volume, 50);
        assert_eq!(p.speech_rate, 0);
        assert_eq!(p.pitch_rate, 0);
    }

    #[test]
    fn material_is_fields_in_order() {
        let p = test_profile();
        assert_eq!(
            p.fingerprint_material(),
            "3:app6:access6:secret7:xiaoyun3:wav5:160002:501:01:0"
        );
    }

    #[test]
    fn set_param_is_case_insensitive() {
        let mut p = test_profile();
        p.set_param("VOLUME", "80").expect("valid");
        p.set_param("Voice", "ruoxi").expect("valid");
        p.set_param("format", "MP3").expect("valid");
        assert_eq!(p.volume, 80);
        assert_eq!(p.voice, "ruoxi");
        assert_eq!(p.format, AudioFormat::Mp3);
    }

    #[test]
    fn set_param_rejects_bad_numbers() {
        let mut p = test_profile();
        let err = p.set_param("speech_rate", "fast").unwrap_err();
        assert_eq!(
            err,
            ProfileError::InvalidValue {
                name: "speech_rate".into(),
                value: "fast".into()
            }
        );
        assert_eq!(p.speech_rate, 0);
    }

    #[test]
    fn unknown_param_is_ignored() {
        let mut p = test_profile();
        let before = p.clone();
        p.set_param("emotion", "happy").expect("ignored");
        assert_eq!(p, before);
    }

    #[test]
    fn adjacent_numbers_do_not_run_together() {
        let mut a = test_profile();
        a.volume = 5;
        a.speech_rate = 10;
        let mut b = test_profile();
        b.volume = 51;
        b.speech_rate = 0;
        assert_ne!(a.fingerprint_material(), b.fingerprint_material());
    }

    #[test]
    fn credential_boundaries_are_kept() {
        let mut a = test_profile();
        a.set_param("app_key", "ab").expect("valid");
        a.set_param("access_key", "c").expect("valid");
        let mut b = test_profile();
        b.set_param("app_key", "a").expect("valid");
        b.set_param("access_key", "bc").expect("valid");
        assert_ne!(a.fingerprint_material(), b.fingerprint_material());
    }

    #[test]
    fn voice_must_be_a_single_path_component() {
        let mut p = test_profile();
        for bad in ["../../escaped", "a/b", "a\\b", "..", ""] {
            assert!(p.set_param("voice", bad).is_err(), "{bad:?} accepted");
        }
        assert_eq!(p.voice, DEFAULT_VOICE);
        p.set_param("voice", "zhi_xiaobai-v2").expect("valid");
        assert_eq!(p.voice, "zhi_xiaobai-v2");
    }

    #[test]
    fn profiles_hash_by_value() {
        let mut set = std::collections::HashSet::new();
        set.insert(test_profile());
        set.insert(test_profile());
        assert_eq!(set.len(), 1);
    }
}
