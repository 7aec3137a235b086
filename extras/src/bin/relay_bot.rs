use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voicerelay_sdk::voice::audio::{pcm_len, FRAME_DURATION_MS};
use voicerelay_sdk::{
    AudioPacket, SessionConfig, SessionRegistry, SessionState, VoiceServerUpdate, WebSocketConnector,
};

const SECURE_TIMEOUT: Duration = Duration::from_secs(15);

fn required_env(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(key).map_err(|_| format!("{key} is not set").into())
}

fn voice_update_from_env() -> Result<VoiceServerUpdate, Box<dyn std::error::Error>> {
    Ok(VoiceServerUpdate {
        guild_id: required_env("RELAY_GUILD_ID")?.parse()?,
        user_id: required_env("RELAY_USER_ID")?.parse()?,
        endpoint: required_env("RELAY_ENDPOINT")?,
        token: required_env("RELAY_TOKEN")?,
        session_id: required_env("RELAY_SESSION_ID")?,
    })
}

/// Loads a 48 kHz 16-bit WAV as interleaved stereo.
fn load_wav(path: &str) -> Result<Vec<i16>, Box<dyn std::error::Error>> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();

    if spec.sample_rate != 48000 {
        error!("Invalid sample rate: {}. Expected 48000 Hz", spec.sample_rate);
        return Err("Invalid sample rate".into());
    }

    if spec.bits_per_sample != 16 {
        error!("Invalid bit depth: {}. Expected 16-bit", spec.bits_per_sample);
        return Err("Invalid bit depth".into());
    }

    let samples: Vec<i16> = reader.into_samples::<i16>().collect::<Result<Vec<_>, _>>()?;

    info!(
        "WAV file loaded: {} Hz, {} channels, {} bits/sample, {} samples",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        samples.len()
    );

    match spec.channels {
        1 => Ok(samples.iter().flat_map(|&s| [s, s]).collect()),
        2 => Ok(samples),
        n => {
            error!("Invalid channels: {}. Expected mono or stereo", n);
            Err("Unsupported channel count".into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: relay_bot <wav_file>");
        eprintln!("Reads RELAY_GUILD_ID, RELAY_USER_ID, RELAY_ENDPOINT, RELAY_TOKEN and RELAY_SESSION_ID");
        std::process::exit(1);
    }

    let update = voice_update_from_env()?;
    let pcm = load_wav(&args[1])?;

    let registry = SessionRegistry::new(Arc::new(WebSocketConnector), SessionConfig::from_env());
    info!("Connecting guild {} to {}", update.guild_id, update.endpoint);
    let session = registry.voice_update(update);

    let mut state = session.watch_state();
    let handshake = tokio::time::timeout(
        SECURE_TIMEOUT,
        state.wait_for(|s| s.is_secured() || *s == SessionState::Closed),
    )
    .await
    .map(|result| result.map(|s| *s));

    match handshake {
        Ok(Ok(s)) if s.is_secured() => info!("Voice connection secured"),
        Ok(_) => {
            registry.shutdown().await;
            return Err("Voice session closed during handshake".into());
        }
        Err(_) => {
            registry.shutdown().await;
            return Err("Timed out waiting for the voice handshake".into());
        }
    }

    info!("Starting audio stream...");
    let frame_len = pcm_len(FRAME_DURATION_MS);
    let mut frame_count = 0u64;

    for chunk in pcm.chunks(frame_len) {
        let mut frame = chunk.to_vec();
        frame.resize(frame_len, 0);

        if let Err(e) = session.frames().push(AudioPacket::pcm(frame)?).await {
            warn!("Frame queue closed, stopping stream: {}", e);
            break;
        }
        frame_count += 1;
    }

    info!("Queued {} frames, waiting for playback to finish", frame_count);
    session.playback().completion().await;

    info!("Audio stream completed!");
    registry.shutdown().await;

    Ok(())
}
