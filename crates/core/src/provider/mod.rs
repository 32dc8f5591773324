mod http;
mod tone;

use crate::config::Secret;
use crate::profile::{AudioFormat, VoiceProfile};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::time::SystemTime;
use tokio::sync::mpsc;

pub use http::{HttpProviderOptions, HttpSynthesisProvider, DEFAULT_SYNTH_URL};
pub use tone::ToneProvider;

/// Short-lived authorization issued for an access key pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub value: Secret,
    pub expires_at: Option<SystemTime>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesisRequest {
    pub app_key: Secret,
    pub token: Secret,
    pub voice: String,
    pub volume: i32,
    pub format: AudioFormat,
    pub speech_rate: i32,
    pub pitch_rate: i32,
    pub sample_rate: u32,
    pub text: String,
}

impl SynthesisRequest {
    pub fn new(profile: &VoiceProfile, token: &Token, text: &str) -> Self {
        Self {
            app_key: profile.credentials.app_key.clone(),
            token: token.value.clone(),
            voice: profile.voice.clone(),
            volume: profile.volume,
            format: profile.format,
            speech_rate: profile.speech_rate,
            pitch_rate: profile.pitch_rate,
            sample_rate: profile.sample_rate,
            text: text.to_owned(),
        }
    }
}

/// Events a provider delivers after accepting a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SynthesisEvent {
    Started,
    Audio(Bytes),
    Completed,
    /// Terminal success.
    Closed,
    /// Terminal failure.
    Failed(String),
}

impl SynthesisEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }
}

pub type EventSender = mpsc::UnboundedSender<SynthesisEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SynthesisEvent>;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("token request failed: {0}")]
    Token(String),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("http error {0}: {1}")]
    HttpStatus(u16, String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("{0} timed out after {1:?}")]
    Timeout(&'static str, std::time::Duration),
}

/// A remote synthesis service.
///
/// `submit` returns once the provider has accepted or rejected the request. On acceptance the
/// provider owns `events` and delivers audio on its own tasks, ending with exactly one `Closed` or
/// `Failed`; dropping the sender without either counts as a failure. On rejection no event is
/// ever sent.
pub trait SynthesisProvider: Send + Sync {
    fn fetch_token(
        &self,
        access_key: Secret,
        key_secret: Secret,
    ) -> BoxFuture<'_, Result<Token, ProviderError>>;

    fn submit(
        &self,
        request: SynthesisRequest,
        events: EventSender,
    ) -> BoxFuture<'_, Result<(), ProviderError>>;
}
