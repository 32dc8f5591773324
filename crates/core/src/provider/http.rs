use crate::config::Secret;
use crate::provider::{
    EventSender, ProviderError, SynthesisEvent, SynthesisProvider, SynthesisRequest, Token,
};
use crate::util::{is_http_retryable, retry_with_backoff, RetryConfig};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use reqwest::{header::CONTENT_TYPE, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use url::Url;

pub const DEFAULT_SYNTH_URL: &str = "https://nls-gateway-cn-shanghai.aliyuncs.com/stream/v1/tts";

const LOG_TARGET: &str = "tts_cache::provider::http";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

type TokenCache = HashMap<(Secret, Secret), Token>;

#[derive(Clone, Debug)]
pub struct HttpProviderOptions {
    pub synth_url: Url,
    /// Token broker that exchanges an access key pair for an NLS token.
    pub token_url: Option<Url>,
    /// Pre-issued token; used instead of the broker when set.
    pub static_token: Option<Secret>,
    /// Connect timeout, token request timeout, and the wait for the synthesis response headers.
    pub request_timeout: Duration,
    /// Longest gap between audio chunks before the stream is failed.
    pub stream_idle_timeout: Duration,
    pub retry: RetryConfig,
}

impl HttpProviderOptions {
    pub fn new(synth_url: Url) -> Self {
        Self {
            synth_url,
            token_url: None,
            static_token: None,
            request_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

/// Streams audio from an NLS-style REST gateway.
#[derive(Clone)]
pub struct HttpSynthesisProvider {
    client: Client,
    options: HttpProviderOptions,
    tokens: Arc<Mutex<TokenCache>>,
}

impl HttpSynthesisProvider {
    pub fn new(options: HttpProviderOptions) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            client,
            options,
            tokens: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn request_token(
        &self,
        url: &Url,
        access_key: &Secret,
        key_secret: &Secret,
    ) -> Result<Token, ProviderError> {
        let body = TokenRequest {
            access_key_id: access_key.expose(),
            access_key_secret: key_secret.expose(),
        };
        let response = self
            .client
            .post(url.clone())
            .timeout(self.options.request_timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::HttpStatus(status.as_u16(), text));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("token response: {e}")))?;
        let value = Secret::new(parsed.token.id)
            .map_err(|_| ProviderError::InvalidResponse("empty token id".into()))?;
        Ok(Token {
            value,
            expires_at: parsed
                .token
                .expire_time
                .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        })
    }
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    #[serde(rename = "AccessKeyId")]
    access_key_id: &'a str,
    #[serde(rename = "AccessKeySecret")]
    access_key_secret: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(rename = "Token")]
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "ExpireTime")]
    expire_time: Option<u64>,
}

#[derive(Serialize)]
struct GatewayRequest<'a> {
    appkey: &'a str,
    token: &'a str,
    text: &'a str,
    format: &'a str,
    sample_rate: u32,
    voice: &'a str,
    volume: i32,
    speech_rate: i32,
    pitch_rate: i32,
}

#[derive(Deserialize)]
struct GatewayError {
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

fn token_is_fresh(token: &Token, now: SystemTime) -> bool {
    match token.expires_at {
        Some(at) => at
            .duration_since(now)
            .is_ok_and(|left| left > TOKEN_REFRESH_MARGIN),
        None => true,
    }
}

fn is_retryable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
        ProviderError::HttpStatus(status, _) => is_http_retryable(*status),
        ProviderError::Timeout(..) => true,
        _ => false,
    }
}

/// Forwards a response body as audio events. A stream error, or no chunk within `idle`, ends it
/// with `Failed`.
async fn pump_audio<S, E>(stream: S, events: EventSender, idle: Duration)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    if events.send(SynthesisEvent::Started).is_err() {
        return;
    }
    loop {
        let next = match tokio::time::timeout(idle, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::warn!(target: LOG_TARGET, ?idle, "audio stream stalled");
                let _ = events.send(SynthesisEvent::Failed(format!(
                    "no audio received for {idle:?}"
                )));
                return;
            }
        };
        match next {
            None => break,
            Some(Ok(bytes)) if bytes.is_empty() => {}
            Some(Ok(bytes)) => {
                if events.send(SynthesisEvent::Audio(bytes)).is_err() {
                    tracing::debug!(target: LOG_TARGET, "event receiver dropped, stopping stream");
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(target: LOG_TARGET, error = %e, "audio stream failed");
                let _ = events.send(SynthesisEvent::Failed(e.to_string()));
                return;
            }
        }
    }
    let _ = events.send(SynthesisEvent::Completed);
    let _ = events.send(SynthesisEvent::Closed);
}

impl SynthesisProvider for HttpSynthesisProvider {
    fn fetch_token(
        &self,
        access_key: Secret,
        key_secret: Secret,
    ) -> BoxFuture<'_, Result<Token, ProviderError>> {
        async move {
            if let Some(token) = &self.options.static_token {
                return Ok(Token {
                    value: token.clone(),
                    expires_at: None,
                });
            }
            let url = self.options.token_url.as_ref().ok_or_else(|| {
                ProviderError::Token("no token url or static token configured".into())
            })?;

            let cache_key = (access_key.clone(), key_secret.clone());
            let mut tokens = self.tokens.lock().await;
            if let Some(token) = tokens.get(&cache_key) {
                if token_is_fresh(token, SystemTime::now()) {
                    return Ok(token.clone());
                }
            }

            let token = retry_with_backoff(
                &self.options.retry,
                || self.request_token(url, &access_key, &key_secret),
                is_retryable,
            )
            .await
            .map_err(|e| ProviderError::Token(e.to_string()))?;

            tracing::debug!(target: LOG_TARGET, expires_at = ?token.expires_at, "token issued");
            tokens.insert(cache_key, token.clone());
            Ok(token)
        }
        .boxed()
    }

    fn submit(
        &self,
        request: SynthesisRequest,
        events: EventSender,
    ) -> BoxFuture<'_, Result<(), ProviderError>> {
        async move {
            let body = GatewayRequest {
                appkey: request.app_key.expose(),
                token: request.token.expose(),
                text: &request.text,
                format: request.format.as_str(),
                sample_rate: request.sample_rate,
                voice: &request.voice,
                volume: request.volume,
                speech_rate: request.speech_rate,
                pitch_rate: request.pitch_rate,
            };

            let timeout = self.options.request_timeout;
            let response = tokio::time::timeout(
                timeout,
                self.client
                    .post(self.options.synth_url.clone())
                    .json(&body)
                    .send(),
            )
            .await
            .map_err(|_| ProviderError::Timeout("synthesis request", timeout))??;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::HttpStatus(status.as_u16(), text));
            }

            // the gateway answers 200 with a JSON body when it refuses a task
            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/json"));
            if is_json {
                let text = response.text().await.unwrap_or_default();
                let reason = match serde_json::from_str::<GatewayError>(&text) {
                    Ok(GatewayError {
                        status,
                        message: Some(message),
                    }) => format!("status {}: {message}", status.unwrap_or_default()),
                    _ => text,
                };
                return Err(ProviderError::Rejected(reason));
            }

            tokio::spawn(pump_audio(
                response.bytes_stream(),
                events,
                self.options.stream_idle_timeout,
            ));

            Ok(())
        }
        .boxed()
    }
}
