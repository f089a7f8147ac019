pub mod config;
pub mod console;
pub mod error;
pub mod logger;
pub mod machine;
pub mod moderation;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

use config::Config;
use console::{Console, Input, HELP};
use peer::{LocalTrack, MediaKind, RtcTransportFactory};
use signaling::{SignalingChannel, WebSocketTransport};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use error::{Error, Result};
pub use machine::{EndReason, SessionEvent, SessionMachine, UserCommand};
pub use session::{ConsentRecord, Role, SessionState};

const LOCAL_STREAM_ID: &str = "local";

/// Runs the interactive client until the user quits or stdin closes.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;
    info!("Using relay server {}", config.signaling_url);

    let channel = SignalingChannel::new(Box::new(WebSocketTransport::new(
        config.signaling_url.clone(),
    )));
    let factory = Arc::new(RtcTransportFactory::new(config.ice_servers.clone()));
    let tracks = vec![
        LocalTrack::new(MediaKind::Audio, LOCAL_STREAM_ID),
        LocalTrack::new(MediaKind::Video, LOCAL_STREAM_ID),
    ];
    let (machine, mut events) = SessionMachine::new(channel, factory, tracks, config.timeouts);
    let (commands, rx) = mpsc::channel(16);
    let machine_task = tokio::spawn(machine.run(rx));

    let mut console = Console::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to read stdin: {e}");
                        break;
                    }
                };
                match console.parse(&line) {
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Agree) => println!("Thanks. Type 'start' to begin."),
                    Ok(Input::Command(UserCommand::Shutdown)) => break,
                    Ok(Input::Command(command)) => {
                        if commands.send(command).await.is_err() {
                            break;
                        }
                    }
                    Err(msg) => println!("{msg}"),
                }
            }
            event = events.recv() => match event {
                Some(event) => println!("{}", console.observe(&event)),
                None => break,
            },
        }
    }

    let _ = commands.send(UserCommand::Shutdown).await;
    if let Err(e) = machine_task.await {
        warn!("Session task ended abnormally: {e}");
    }
    Ok(())
}
