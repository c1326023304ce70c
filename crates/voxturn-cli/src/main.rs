//! voxturn CLI — push-to-talk voice turns from a terminal.
//!
//! ```text
//! voxturn talk  [--server http://127.0.0.1:8000] [--lang en] [--min-capture-ms 1200] [--rate 0.92]
//! voxturn ask "kaise ho?" [--lang-combo ur:roman] [--server ...]
//! voxturn status [--server ...]
//! ```

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voxturn_core::prompt::{parse_combo, SCRIPT_MISMATCH_NOTE};
use voxturn_core::status::{ribbon, RIBBON_UNAVAILABLE};
use voxturn_core::types::{
    ClientConfig, TurnEvent, AUDIO_UNAVAILABLE, NO_AUDIO_NOTE, NO_TEXT,
};
use voxturn_lib::capture::MicrophoneDevice;
use voxturn_lib::controller::VoiceTurnController;
use voxturn_lib::playback::RodioOutput;
use voxturn_lib::text::text_turn;
use voxturn_lib::transport::{HttpTransport, TurnTransport};

/// voxturn — voice turns against a conversational backend
#[derive(Parser)]
#[command(name = "voxturn", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ServerArgs {
    /// Backend base URL
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    server: String,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive voice turns: s=start, x=stop, r=retry audio, p=replay, q=quit
    Talk {
        #[command(flatten)]
        server: ServerArgs,
        /// Language hint sent with voice turns
        #[arg(long, default_value = "en")]
        lang: String,
        /// Stops earlier than this are deferred
        #[arg(long, default_value = "1200")]
        min_capture_ms: u64,
        /// Playback speed
        #[arg(long, default_value = "0.92")]
        rate: f32,
    },
    /// Send one text turn
    Ask {
        text: String,
        /// Language and script, e.g. en:roman, ur:roman, ur:arabic
        #[arg(long, default_value = "en:roman")]
        lang_combo: String,
        #[command(flatten)]
        server: ServerArgs,
    },
    /// Print the server status ribbon
    Status {
        #[command(flatten)]
        server: ServerArgs,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxturn_cli=info,voxturn_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Talk {
            server,
            lang,
            min_capture_ms,
            rate,
        } => {
            let config = ClientConfig {
                server_url: server.server,
                min_capture_ms,
                playback_rate: rate,
                voice_lang: lang,
                ..Default::default()
            };
            talk(config).await
        }

        Command::Ask {
            text,
            lang_combo,
            server,
        } => {
            let transport = HttpTransport::new(&config_for(server));
            let hint = parse_combo(&lang_combo);
            match text_turn(&transport, &text, &hint).await {
                Ok(Some(reply)) => {
                    if reply.script_mismatch {
                        println!("{SCRIPT_MISMATCH_NOTE}");
                    }
                    println!("{}", reply.answer);
                    Ok(())
                }
                Ok(None) => Err("nothing to send".to_string()),
                Err(e) => Err(format!("error={}", e.chip_code())),
            }
        }

        Command::Status { server } => {
            let transport = HttpTransport::new(&config_for(server));
            match transport.fetch_status().await {
                Ok(raw) => println!("{}", ribbon(&raw)),
                Err(e) => {
                    tracing::debug!("status fetch failed: {e}");
                    println!("{RIBBON_UNAVAILABLE}");
                }
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn config_for(server: ServerArgs) -> ClientConfig {
    ClientConfig {
        server_url: server.server,
        ..Default::default()
    }
}

async fn talk(config: ClientConfig) -> Result<(), String> {
    let transport = Arc::new(HttpTransport::new(&config));
    let output = RodioOutput::new(config.clone());
    let (controller, mut events) = VoiceTurnController::spawn(
        config,
        Box::new(MicrophoneDevice::new()),
        transport,
        Box::new(output),
    );

    eprintln!("s=start  x=stop  r=retry audio  p=replay  q=quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| format!("stdin: {e}"))?;
                let Some(line) = line else { return Ok(()) };
                match line.trim() {
                    "s" => controller.start(),
                    "x" => controller.stop(),
                    "r" => controller.retry_audio(),
                    "p" => controller.replay_audio(),
                    "q" => return Ok(()),
                    "" => {}
                    other => eprintln!("unknown command: {other}"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err("turn worker stopped".to_string());
                };
                render(&event);
            }
        }
    }
}

fn render(event: &TurnEvent) {
    match event {
        TurnEvent::RecordingStarted => println!("● recording… (x to stop)"),
        TurnEvent::StartIgnored => eprintln!("busy: previous turn still in flight"),
        TurnEvent::DeviceError { message } => println!("error=mic ({message})"),
        TurnEvent::Level { .. } => {}
        TurnEvent::StopArmed { wait_ms } => println!("stopping in {wait_ms} ms…"),
        TurnEvent::Posting { .. } => println!("Working…"),
        TurnEvent::Transcript { text } => println!("You (voice): {text}"),
        TurnEvent::Answer { text, breadcrumb } => {
            let text = if text.is_empty() { NO_TEXT } else { text.as_str() };
            println!("{text}");
            if let Some(crumb) = breadcrumb.as_ref().filter(|b| !b.is_empty()) {
                println!("  {crumb}");
            }
        }
        TurnEvent::NoAudio => println!("{NO_AUDIO_NOTE}"),
        TurnEvent::AudioCleared { .. } => {}
        TurnEvent::NowPlaying { caption, .. } => println!("♪ {caption}"),
        TurnEvent::AudioUnavailable { .. } => println!("{AUDIO_UNAVAILABLE}"),
        TurnEvent::RetryOffered { .. } => println!("(r to retry audio)"),
        TurnEvent::TurnFailed { chip } => println!("error={chip}"),
        TurnEvent::TurnFinished { .. } => {}
    }
}
