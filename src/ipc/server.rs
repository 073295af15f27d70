//! Unix domain socket server for IPC
//!
//! Provides request-response communication with UI hosts and pushes
//! session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::session::{SessionCommand, SessionSnapshot};
use crate::speech::BridgeHandle;

use super::protocol::{read_frame, write_frame, DaemonStatus, Notification, Request, Response};

/// What the server needs to reach the session
#[derive(Clone)]
pub struct SessionLink {
    /// Commands into the coordinator
    pub commands: mpsc::Sender<SessionCommand>,
    /// Session events, subscribed per client
    pub events: broadcast::Sender<SessionEvent>,
    /// Delivery point for host recognizer callbacks, if bridged
    pub bridge: Option<BridgeHandle>,
}

/// Frames decoded by a client's reader task
enum Incoming {
    Request(Request),
    Invalid(String),
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    link: SessionLink,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, link: SessionLink) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            link,
            start_time: Instant::now(),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let link = self.link.clone();
                    let start_time = self.start_time;
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, link, start_time) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, link: SessionLink, start_time: Instant) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a half-read frame is never
        // lost when a notification is written in between
        let (frame_tx, mut frame_rx) = mpsc::channel::<Incoming>(16);
        let reader_task = tokio::spawn(async move {
            loop {
                let incoming = match read_frame(&mut reader).await {
                    Ok(Some(body)) => match serde_json::from_slice::<Request>(&body) {
                        Ok(request) => Incoming::Request(request),
                        Err(e) => Incoming::Invalid(e.to_string()),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(?e, "failed to read frame, disconnecting");
                        break;
                    }
                };
                if frame_tx.send(incoming).await.is_err() {
                    break;
                }
            }
        });

        let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

        let result = loop {
            tokio::select! {
                incoming = frame_rx.recv() => {
                    let request = match incoming {
                        Some(Incoming::Request(request)) => request,
                        Some(Incoming::Invalid(reason)) => {
                            debug!(%reason, "invalid request");
                            let response = Response::error("invalid_request", reason);
                            if let Err(e) = write_frame(&mut writer, &response).await {
                                break Err(e);
                            }
                            continue;
                        }
                        None => {
                            debug!("client disconnected");
                            break Ok(());
                        }
                    };

                    debug!(?request, "received request");

                    if matches!(request, Request::Subscribe) && events.is_none() {
                        events = Some(link.events.subscribe());
                        debug!("client subscribed to notifications");
                    }

                    let response = Self::process_request(request, &link, start_time).await;
                    if let Err(e) = write_frame(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = Self::send_notification(&mut writer, event).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "client notification receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    async fn send_notification(writer: &mut OwnedWriteHalf, event: SessionEvent) -> Result<()> {
        write_frame(writer, &Notification::SessionEvent { event }).await
    }

    /// Process a request and return a response
    async fn process_request(request: Request, link: &SessionLink, start_time: Instant) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::Subscribe => Response::Subscribed,

            Request::GetStatus => match Self::snapshot(link).await {
                Some(snapshot) => Response::Status(DaemonStatus::from_snapshot(
                    &snapshot,
                    start_time.elapsed().as_secs(),
                )),
                None => Self::unavailable(),
            },

            Request::GetConversation => match Self::snapshot(link).await {
                Some(snapshot) => Response::Conversation {
                    turns: snapshot.turns,
                },
                None => Self::unavailable(),
            },

            Request::StartCapture => Self::forward(link, SessionCommand::StartCapture).await,

            Request::StopCapture => Self::forward(link, SessionCommand::StopCapture).await,

            Request::SubmitQuery { text } => {
                if text.trim().is_empty() {
                    return Response::error("invalid_request", "query text is empty");
                }
                Self::forward(link, SessionCommand::SubmitQuery(text)).await
            }

            Request::Mute => Self::forward(link, SessionCommand::Mute).await,

            Request::Close => Self::forward(link, SessionCommand::Close).await,

            Request::Recognition { event } => match &link.bridge {
                Some(bridge) => {
                    if bridge.deliver(event) {
                        Response::Accepted
                    } else {
                        Response::error("not_listening", "no capture session is active")
                    }
                }
                None => Response::error("unsupported", "recognition is not bridged"),
            },
        }
    }

    async fn forward(link: &SessionLink, command: SessionCommand) -> Response {
        match link.commands.send(command).await {
            Ok(()) => Response::Accepted,
            Err(_) => Self::unavailable(),
        }
    }

    async fn snapshot(link: &SessionLink) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        link.commands.send(SessionCommand::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    fn unavailable() -> Response {
        Response::error("unavailable", "voice session is not running")
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Next session event for a subscribed client; pending otherwise
async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
