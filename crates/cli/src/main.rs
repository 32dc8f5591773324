#![deny(warnings)]

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;
use tts_cache_core::cache::TtsCache;
use tts_cache_core::config::{
    default_cache_root, resolve_optional_string, resolve_parsed_with_default, resolve_secret,
    resolve_string_with_default, CacheConfig, Credentials, Env, Secret, StdEnv, StreamThreshold,
    DEFAULT_STREAM_THRESHOLD, DEFAULT_WORKER_THREADS, ENV_ACCESS_KEY, ENV_APP_KEY,
    ENV_CACHE_PATH, ENV_KEY_SECRET, ENV_STATIC_TOKEN, ENV_STREAM_THRESHOLD, ENV_SYNTH_URL,
    ENV_TOKEN_URL, ENV_WORKER_THREADS,
};
use tts_cache_core::profile::{DEFAULT_SAMPLE_RATE, DEFAULT_VOICE};
use tts_cache_core::provider::{
    HttpProviderOptions, HttpSynthesisProvider, SynthesisProvider, ToneProvider,
    DEFAULT_SYNTH_URL,
};
use tts_cache_core::session::SpeechSession;
use tts_cache_core::stream::ReadOutcome;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProviderKind {
    /// NLS-style REST gateway
    Http,
    /// Offline sine tone, no network
    Tone,
}

#[derive(Parser, Debug)]
#[command(name = "tts-cache")]
#[command(about = "Cached, progressively streamed text-to-speech")]
struct Args {
    #[arg(long)]
    text: String,

    #[arg(long, default_value = DEFAULT_VOICE)]
    voice: String,

    #[arg(long, default_value_t = DEFAULT_SAMPLE_RATE)]
    sample_rate: u32,

    #[arg(long, default_value_t = 1)]
    channels: u16,

    #[arg(long)]
    format: Option<String>,

    #[arg(long)]
    volume: Option<i32>,

    #[arg(long, allow_hyphen_values = true)]
    speech_rate: Option<i32>,

    #[arg(long, allow_hyphen_values = true)]
    pitch_rate: Option<i32>,

    #[arg(long)]
    app_key: Option<String>,

    #[arg(long)]
    access_key: Option<String>,

    #[arg(long)]
    key_secret: Option<String>,

    #[arg(long)]
    cache_path: Option<PathBuf>,

    /// Bytes that must be buffered before audio is handed out
    #[arg(long)]
    threshold: Option<u64>,

    #[arg(long)]
    worker_threads: Option<usize>,

    #[arg(long, value_enum, default_value_t = ProviderKind::Http)]
    provider: ProviderKind,

    #[arg(long)]
    synth_url: Option<String>,

    #[arg(long)]
    token_url: Option<String>,

    #[arg(long)]
    token: Option<String>,

    /// Output file, or `-` for stdout
    #[arg(long, default_value = "-")]
    output: String,

    /// Read cadence, like a host audio frame timer
    #[arg(long, default_value_t = 20)]
    frame_ms: u64,

    /// Give up after this long without new audio
    #[arg(long, default_value_t = 10_000)]
    timeout_ms: u64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let cfg = build_config(&args, &env)?;

    tracing::info!(
        cache_root = %cfg.cache_root.display(),
        threshold = cfg.stream_threshold.bytes(),
        worker_threads = cfg.worker_threads,
        "config loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.worker_threads)
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        match args.provider {
            ProviderKind::Tone => run(args, cfg, ToneProvider::new()).await,
            ProviderKind::Http => {
                let provider = build_http_provider(&args, &env)?;
                run(args, cfg, provider).await
            }
        }
    })
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: &Args, env: &impl Env) -> anyhow::Result<CacheConfig> {
    let credentials = Credentials::from_parts(
        resolve_secret(args.app_key.clone(), ENV_APP_KEY, env)?,
        resolve_secret(args.access_key.clone(), ENV_ACCESS_KEY, env)?,
        resolve_secret(args.key_secret.clone(), ENV_KEY_SECRET, env)?,
    )?;

    let default_root = default_cache_root();
    let cache_root = PathBuf::from(resolve_string_with_default(
        args.cache_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        ENV_CACHE_PATH,
        env,
        &default_root.to_string_lossy(),
    ));

    let threshold = StreamThreshold::new(resolve_parsed_with_default(
        args.threshold,
        ENV_STREAM_THRESHOLD,
        env,
        DEFAULT_STREAM_THRESHOLD,
    )?)?;
    let worker_threads = resolve_parsed_with_default(
        args.worker_threads,
        ENV_WORKER_THREADS,
        env,
        DEFAULT_WORKER_THREADS,
    )?;

    let cfg = CacheConfig::new(credentials, cache_root)
        .with_stream_threshold(threshold)
        .with_worker_threads(worker_threads)?;
    cfg.prepare()?;
    Ok(cfg)
}

fn build_http_provider(args: &Args, env: &impl Env) -> anyhow::Result<HttpSynthesisProvider> {
    let synth_url =
        resolve_string_with_default(args.synth_url.clone(), ENV_SYNTH_URL, env, DEFAULT_SYNTH_URL);
    let mut options = HttpProviderOptions::new(
        synth_url
            .parse()
            .with_context(|| format!("invalid synthesis url: {synth_url}"))?,
    );
    options.token_url = resolve_optional_string(args.token_url.clone(), ENV_TOKEN_URL, env)
        .map(|u| u.parse().with_context(|| format!("invalid token url: {u}")))
        .transpose()?;
    options.static_token = resolve_optional_string(args.token.clone(), ENV_STATIC_TOKEN, env)
        .map(Secret::new)
        .transpose()?;
    if options.token_url.is_none() && options.static_token.is_none() {
        anyhow::bail!("the http provider needs --token-url or --token ({ENV_TOKEN_URL} / {ENV_STATIC_TOKEN})");
    }
    Ok(HttpSynthesisProvider::new(options)?)
}

async fn run<P: SynthesisProvider>(args: Args, cfg: CacheConfig, provider: P) -> anyhow::Result<()> {
    let cache = Arc::new(TtsCache::new(cfg, provider)?);
    let mut session = SpeechSession::open(cache, &args.voice, args.sample_rate, args.channels);

    if let Some(format) = &args.format {
        session.set_param("format", format)?;
    }
    for (name, value) in [
        ("volume", args.volume),
        ("speech_rate", args.speech_rate),
        ("pitch_rate", args.pitch_rate),
    ] {
        if let Some(v) = value {
            session.set_param(name, &v.to_string())?;
        }
    }

    let entry = session
        .feed_text(&args.text)
        .await
        .context("text-to-speech request failed")?;
    tracing::info!(path = %entry.path().display(), cached = entry.was_cached(), "streaming");

    let mut out = open_output(&args.output).await?;

    let frame = Duration::from_millis(args.frame_ms.max(1));
    let timeout = Duration::from_millis(args.timeout_ms);
    let frame_bytes = frame_bytes(args.sample_rate, args.channels, frame);
    let mut buf = vec![0u8; frame_bytes];
    let mut ticker = tokio::time::interval(frame);
    let mut stalled = Duration::ZERO;
    let mut total = 0usize;

    loop {
        ticker.tick().await;
        match session.read(&mut buf).await? {
            ReadOutcome::Data(n) => {
                out.write_all(&buf[..n]).await?;
                total += n;
                stalled = Duration::ZERO;
            }
            ReadOutcome::NotReady => {
                stalled += frame;
                if stalled >= timeout {
                    anyhow::bail!("no audio received within {timeout:?}");
                }
            }
            ReadOutcome::End => break,
        }
    }
    out.flush().await?;
    session.close();

    tracing::info!(bytes = total, "done");
    Ok(())
}

async fn open_output(output: &str) -> anyhow::Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if output == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("cannot create {output}"))?;
    Ok(Box::new(file))
}

/// 16-bit samples for one frame, never smaller than 320 bytes.
fn frame_bytes(sample_rate: u32, channels: u16, frame: Duration) -> usize {
    let per_second = u64::from(sample_rate) * u64::from(channels.max(1)) * 2;
    let bytes = per_second.saturating_mul(frame.as_millis() as u64) / 1000;
    usize::try_from(bytes).unwrap_or(usize::MAX).max(320)
}
