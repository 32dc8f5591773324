use crate::config::Secret;
use crate::profile::AudioFormat;
use crate::provider::{
    EventSender, ProviderError, SynthesisEvent, SynthesisProvider, SynthesisRequest, Token,
};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::f32::consts::PI;
use std::time::Duration;

const BASE_FREQ_HZ: f32 = 440.0;
const MS_PER_CHAR: usize = 100;
const MIN_DURATION_MS: usize = 500;
const WAV_HEADER_BYTES: usize = 44;

/// Offline provider: renders a sine tone whose length follows the text and streams it in chunks.
#[derive(Clone, Debug)]
pub struct ToneProvider {
    chunk_bytes: usize,
    chunk_interval: Duration,
}

impl ToneProvider {
    pub fn new() -> Self {
        Self {
            chunk_bytes: 3200,
            chunk_interval: Duration::from_millis(20),
        }
    }

    pub fn with_chunking(mut self, chunk_bytes: usize, chunk_interval: Duration) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self.chunk_interval = chunk_interval;
        self
    }
}

impl Default for ToneProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Mono 16-bit little-endian PCM.
fn render_pcm(request: &SynthesisRequest) -> Vec<u8> {
    let duration_ms = (request.text.chars().count() * MS_PER_CHAR).max(MIN_DURATION_MS);
    let sample_rate = request.sample_rate.max(1) as usize;
    let samples = duration_ms * sample_rate / 1000;

    // pitch_rate spans one octave each way
    let freq = BASE_FREQ_HZ * 2f32.powf(request.pitch_rate as f32 / 500.0);
    let gain = (request.volume.clamp(0, 100) as f32) / 100.0;

    let mut pcm = Vec::with_capacity(samples * 2);
    for i in 0..samples {
        let t = i as f32 / sample_rate as f32;
        let amplitude = (2.0 * PI * freq * t).sin() * gain;
        let sample = (amplitude * i16::MAX as f32) as i16;
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}

fn wav_header(sample_rate: u32, data_len: u32) -> [u8; WAV_HEADER_BYTES] {
    let channels: u16 = 1;
    let bits: u16 = 16;
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut h = [0u8; WAV_HEADER_BYTES];
    h[0..4].copy_from_slice(b"RIFF");
    h[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    h[8..12].copy_from_slice(b"WAVE");
    h[12..16].copy_from_slice(b"fmt ");
    h[16..20].copy_from_slice(&16u32.to_le_bytes());
    h[20..22].copy_from_slice(&1u16.to_le_bytes());
    h[22..24].copy_from_slice(&channels.to_le_bytes());
    h[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    h[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    h[32..34].copy_from_slice(&block_align.to_le_bytes());
    h[34..36].copy_from_slice(&bits.to_le_bytes());
    h[36..40].copy_from_slice(b"data");
    h[40..44].copy_from_slice(&data_len.to_le_bytes());
    h
}

fn render(request: &SynthesisRequest) -> Result<Vec<u8>, ProviderError> {
    let pcm = render_pcm(request);
    match request.format {
        AudioFormat::Pcm => Ok(pcm),
        AudioFormat::Wav => {
            let data_len = u32::try_from(pcm.len())
                .map_err(|_| ProviderError::Rejected("text too long for a wav tone".into()))?;
            let mut out = Vec::with_capacity(WAV_HEADER_BYTES + pcm.len());
            out.extend_from_slice(&wav_header(request.sample_rate, data_len));
            out.extend_from_slice(&pcm);
            Ok(out)
        }
        other => Err(ProviderError::Rejected(format!(
            "tone provider cannot encode {other}"
        ))),
    }
}

impl SynthesisProvider for ToneProvider {
    fn fetch_token(
        &self,
        _access_key: Secret,
        _key_secret: Secret,
    ) -> BoxFuture<'_, Result<Token, ProviderError>> {
        async move {
            let value = Secret::new("tone-local")
                .map_err(|e| ProviderError::Token(e.to_string()))?;
            Ok(Token {
                value,
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
        let chunk_bytes = self.chunk_bytes;
        let interval = self.chunk_interval;
        async move {
            if request.text.trim().is_empty() {
                return Err(ProviderError::Rejected("empty text".into()));
            }
            let audio = Bytes::from(render(&request)?);

            tokio::spawn(async move {
                let _ = events.send(SynthesisEvent::Started);
                let mut offset = 0;
                while offset < audio.len() {
                    let end = (offset + chunk_bytes).min(audio.len());
                    if events
                        .send(SynthesisEvent::Audio(audio.slice(offset..end)))
                        .is_err()
                    {
                        return;
                    }
                    offset = end;
                    if !interval.is_zero() {
                        tokio::time::sleep(interval).await;
                    }
                }
                let _ = events.send(SynthesisEvent::Completed);
                let _ = events.send(SynthesisEvent::Closed);
            });
            Ok(())
        }
        .boxed()
    }
}
