//! storefront-voice: Voice session daemon for the storefront AI shopping assistant
//!
//! This daemon runs alongside the storefront UI and provides:
//! - Speech capture through a recognizer bridged from the UI host
//! - Explicit session state machine (Idle, Listening, Dispatching, Speaking)
//! - Query dispatch to the storefront assistant endpoint
//! - Spoken replies through a local text-to-speech program
//! - IPC for commands, status queries and session notifications

mod config;
mod dispatch;
mod events;
mod ipc;
mod lifecycle;
mod session;
mod speech;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, RecognizerKind};
use crate::dispatch::HttpDispatcher;
use crate::events::SessionEvent;
use crate::ipc::{Server, SessionLink};
use crate::lifecycle::ShutdownSignal;
use crate::session::{Coordinator, DispatchOptions};
use crate::speech::{
    BridgeRecognizer, CommandSynthesizer, RecognitionEngine, RecognitionSettings, SpeechCapture,
    SpeechPlayback, SynthesisEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "storefront-voice starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, locale = %config.locale, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    // IPC server -> coordinator
    let (command_tx, command_rx) = mpsc::channel(32);
    // Coordinator and recognizer -> IPC clients
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let (recognizer, bridge) = match config.recognizer {
        RecognizerKind::Bridge => {
            let recognizer = BridgeRecognizer::new(event_tx.clone());
            let handle = recognizer.handle();
            (
                Some(Box::new(recognizer) as Box<dyn RecognitionEngine>),
                Some(handle),
            )
        }
        RecognizerKind::None => {
            warn!("speech recognition disabled, voice capture unavailable");
            (None, None)
        }
    };

    let synthesizer = config
        .tts_command
        .as_deref()
        .and_then(CommandSynthesizer::from_command_line)
        .map(|synth| Box::new(synth) as Box<dyn SynthesisEngine>);

    let capture = SpeechCapture::new(
        recognizer,
        RecognitionSettings::single_utterance(&config.locale),
    );
    let playback = SpeechPlayback::new(synthesizer, config.locale.clone());
    if !playback.is_available() {
        warn!(command = ?config.tts_command, "speech output unavailable, replies will be text-only");
    }

    let dispatcher = Arc::new(HttpDispatcher::new(
        &config.api_url,
        config.auth_token.clone(),
    ));
    info!(endpoint = dispatcher.endpoint(), "assistant endpoint");

    let mut coordinator = Coordinator::new(
        capture,
        playback,
        dispatcher,
        DispatchOptions {
            result_limit: config.result_limit,
            timeout: config.dispatch_timeout,
        },
        event_tx.clone(),
    );

    let server = Server::new(
        &config.socket_path,
        SessionLink {
            commands: command_tx,
            events: event_tx.clone(),
            bridge,
        },
    )?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        // Run the session coordinator (processes commands and speech events)
        _ = coordinator.run(command_rx) => {
            info!("session coordinator exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Log session events
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "session event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("session event logger exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    coordinator.close();
    server.shutdown().await;

    info!("storefront-voice stopped");

    Ok(())
}
