use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{Notify, broadcast};
use tracing_subscriber::EnvFilter;

use nova_voice::turn::{CaptureDevice, SpeechDevice};
use nova_voice::voice::{
    AudioCapture, AudioPlayback, MicRecognizer, PLAYBACK_SAMPLE_RATE, RemoteSpeaker,
    SegmenterState, SilentSpeaker, TextRecognizer, UtteranceSegmenter, apply_volume,
    decode_audio, resample, rms_energy, word_offsets,
};
use nova_voice::{
    ActionDispatcher, BackendClient, Config, ConnectionMonitor, Emotion, InferenceBackend,
    InputMode, IntentClassifier, MoodTracker, Notice, Role, SessionState, TurnHandle,
    TurnOptions, TurnOrchestrator,
};

/// Nova - a voice assistant that listens, thinks and talks back
#[derive(Parser)]
#[command(name = "nova", version, about)]
struct Cli {
    /// Backend base URL
    #[arg(long, env = "NOVA_BACKEND_URL")]
    backend_url: Option<String>,

    /// Transcript source: "text" (stdin lines) or "mic"
    #[arg(short, long, env = "NOVA_INPUT")]
    input: Option<InputMode>,

    /// Captions only, no spoken output
    #[arg(long)]
    mute: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the intent and mood inferred for a line of text
    Classify {
        /// Text to classify
        text: String,
    },
    /// Check whether the backend is reachable
    Probe,
    /// Speak a line through the backend's text-to-speech
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Emotion to speak with
        #[arg(short, long, default_value = "neutral")]
        emotion: String,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose))),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Default log filter for a `-v` count
const fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "info,nova_voice=info",
        1 => "info,nova_voice=debug",
        2 => "debug",
        _ => "trace",
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(input) = cli.input {
        config.input = input;
    }
    if cli.mute {
        config.remote_tts = false;
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Classify { text } => {
                classify(&text);
                Ok(())
            }
            Command::Probe => probe(&config).await,
            Command::Say { text, emotion } => say(&config, &text, &emotion).await,
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
        };
    }

    tracing::info!(
        backend = %config.backend_url,
        input = %config.input,
        remote_tts = config.remote_tts,
        history_window = config.history_window,
        "starting nova"
    );

    let backend = Arc::new(BackendClient::new(&config.backend_url, config.request_timeout)?);
    let inference: Arc<dyn InferenceBackend> = backend.clone();
    let dispatcher = ActionDispatcher::new(Some(inference), config.request_timeout);
    let monitor = ConnectionMonitor::new(backend.clone());
    let options = TurnOptions::from(&config);

    match (config.input, config.remote_tts) {
        (InputMode::Text, true) => {
            let speaker = RemoteSpeaker::new(Arc::clone(&backend))?;
            converse(TextRecognizer::stdin(), speaker, dispatcher, monitor, options).await;
        }
        (InputMode::Text, false) => {
            converse(TextRecognizer::stdin(), SilentSpeaker, dispatcher, monitor, options).await;
        }
        (InputMode::Mic, true) => {
            let mic = MicRecognizer::new(Arc::clone(&backend))?;
            let speaker = RemoteSpeaker::new(backend)?;
            converse(mic, speaker, dispatcher, monitor, options).await;
        }
        (InputMode::Mic, false) => {
            let mic = MicRecognizer::new(backend)?;
            converse(mic, SilentSpeaker, dispatcher, monitor, options).await;
        }
    }

    Ok(())
}

/// Run the turn loop until Ctrl-C or until capture becomes unavailable
async fn converse<C, S>(
    capture: C,
    speech: S,
    dispatcher: ActionDispatcher,
    monitor: ConnectionMonitor,
    options: TurnOptions,
) where
    C: CaptureDevice,
    S: SpeechDevice,
{
    let mut orchestrator = TurnOrchestrator::new(capture, speech, dispatcher, monitor, options);
    let done = Arc::new(Notify::new());

    tokio::spawn(show_notices(
        orchestrator.subscribe(),
        orchestrator.handle(),
        Arc::clone(&done),
    ));
    orchestrator.handle().start();

    println!("Nova is listening. Press Ctrl-C to quit.");
    orchestrator
        .run(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                () = done.notified() => {}
            }
        })
        .await;
}

/// Print notices and re-arm after a turn ends in idle
///
/// Gives up when listening could not be restarted since the last idle.
async fn show_notices(
    mut notices: broadcast::Receiver<Notice>,
    handle: TurnHandle,
    done: Arc<Notify>,
) {
    let mut listened = false;
    loop {
        let notice = match notices.recv().await {
            Ok(notice) => notice,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "notice display lagging");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match notice {
            Notice::State(SessionState::Listening) => {
                listened = true;
                println!("> ");
            }
            Notice::State(SessionState::Idle) => {
                if listened {
                    listened = false;
                    handle.start();
                } else {
                    println!("Input unavailable, exiting.");
                    done.notify_one();
                    break;
                }
            }
            Notice::State(SessionState::Processing) => println!("(thinking...)"),
            Notice::State(_) => {}
            Notice::Caption { text, .. } => {
                print!("\rnova: {text}");
                let _ = std::io::stdout().flush();
            }
            Notice::CaptionCleared => println!(),
            Notice::Status(Some(message)) => println!("! {message}"),
            Notice::Status(None) => {}
            Notice::Mood(mood) => tracing::info!(%mood, "mood changed"),
            Notice::TurnRecorded { role, content } => {
                if role == Role::User {
                    tracing::debug!(%content, "heard");
                }
            }
            Notice::Connection(status) => {
                if !status.reachable {
                    println!("! backend unreachable, local replies only");
                }
            }
        }
    }
}

fn classify(text: &str) {
    let result = IntentClassifier::new().classify(text);
    let mood = MoodTracker::new().infer(text);
    let style = MoodTracker::style_for(mood);

    println!("intent: {}", result.intent);
    println!("local:  {}", result.intent.is_local());
    println!("mood:   {mood}");
    println!(
        "style:  rate {:.2} | pitch {:.2} | volume {:.2}",
        style.rate, style.pitch, style.volume
    );
}

async fn probe(config: &Config) -> anyhow::Result<()> {
    let backend = Arc::new(BackendClient::new(&config.backend_url, config.request_timeout)?);
    let status = ConnectionMonitor::new(backend).probe().await;

    if status.reachable {
        println!("{} is reachable", config.backend_url);
        Ok(())
    } else {
        anyhow::bail!("{} is unreachable", config.backend_url)
    }
}

/// Synthesize through the backend and play with printed captions
async fn say(config: &Config, text: &str, emotion: &str) -> anyhow::Result<()> {
    let emotion = Emotion::from_label(emotion).unwrap_or_default();
    let style = MoodTracker::style_for(emotion);
    let backend = BackendClient::new(&config.backend_url, config.request_timeout)?;

    println!("Speaking as {emotion}: \"{text}\"\n");
    let url = backend.synthesize(text, emotion.as_str()).await?;
    let bytes = backend.fetch_audio(&url).await?;

    let words: Vec<String> = text.split_whitespace().map(ToString::to_string).collect();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let (samples, rate) = decode_audio(&bytes)?;
        let mut samples = resample(&samples, rate, PLAYBACK_SAMPLE_RATE)?;
        apply_volume(&mut samples, style.volume);

        let offsets = word_offsets(words.len(), samples.len());
        let playback = AudioPlayback::new()?;
        let never = AtomicBool::new(false);
        playback.play_paced(samples, &offsets, &never, |i| {
            print!("{} ", words[i]);
            let _ = std::io::stdout().flush();
        })?;
        println!();
        Ok(())
    })
    .await??;

    Ok(())
}

async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    let mut segmenter = UtteranceSegmenter::new();

    println!("---");
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let state = segmenter.push(&samples);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        let speech = match state {
            SegmenterState::Waiting => "",
            SegmenterState::Speaking => " speech",
            SegmenterState::Complete => " utterance",
        };
        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]{speech}", i + 1);

        if state == SegmenterState::Complete {
            segmenter.reset();
        }
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..PLAYBACK_SAMPLE_RATE * 2)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {PLAYBACK_SAMPLE_RATE} Hz...", samples.len());

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let playback = AudioPlayback::new()?;
        playback.play_paced(samples, &[], &AtomicBool::new(false), |_| {})?;
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_by_verbosity() {
        assert_eq!(log_filter(0), "info,nova_voice=info");
        assert_eq!(log_filter(1), "info,nova_voice=debug");
        assert_eq!(log_filter(2), "debug");
        assert_eq!(log_filter(7), "trace");
    }

    #[test]
    fn test_cli_parses_input_mode() {
        let cli = Cli::try_parse_from(["nova", "--input", "mic", "-vv"]).unwrap();
        assert_eq!(cli.input, Some(InputMode::Mic));
        assert_eq!(cli.verbose, 2);
        assert!(cli.command.is_none());
    }
}
