//! Remote Recognition Channel
//!
//! A persistent, message-based link to a backend recognizer. Windows go out
//! tagged with their sequence number; chord results and coaching messages
//! come back in any order and in any number. Nothing here blocks the caller:
//! `send` queues a frame for the worker and returns.
//!
//! The worker is a dedicated thread running a current-thread tokio runtime.
//! When the link drops (or cannot be opened) it raises `Degraded` once per
//! outage and reconnects forever with doubling backoff, reusing the same
//! session id so late results stay attributable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::analysis::FeatureWindow;
use crate::error::{log_channel_error, ChannelError};
use crate::telemetry;

pub mod backoff;
pub mod protocol;
pub mod transport;

pub use backoff::{BackoffPolicy, ReconnectBackoff};
pub use protocol::{InboundMessage, OutboundMessage};
pub use transport::{Transport, TransportLink, WebSocketTransport};

/// Connection state as seen by the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Link lost or unreachable; reconnecting in the background
    Degraded,
}

/// Chord verdict from the remote recognizer, echoing the window's sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChordResult {
    pub sequence_number: u64,
    pub chord_label: String,
    pub confidence: f32,
}

/// Unsolicited coaching message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachingFeedback {
    pub message: String,
    pub score: Option<f64>,
}

/// Events delivered to the `on_result` handler
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Degraded { reason: String },
    Result(RemoteChordResult),
    Feedback(CoachingFeedback),
}

pub type EventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

enum Command {
    Send(String),
    Disconnect,
}

/// Shared between the channel handle and its worker
struct ChannelShared {
    handler: RwLock<Option<EventHandler>>,
    status: Mutex<ChannelStatus>,
    active: AtomicBool,
}

impl ChannelShared {
    fn status(&self) -> ChannelStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: ChannelStatus) {
        let mut current = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if *current != status {
            *current = status;
            telemetry::hub().record_channel_status(status);
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

pub struct RemoteRecognitionChannel {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    shared: Arc<ChannelShared>,
    session_id: Option<String>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl RemoteRecognitionChannel {
    pub fn new(transport: Arc<dyn Transport>, policy: BackoffPolicy) -> Self {
        Self {
            transport,
            policy,
            shared: Arc::new(ChannelShared {
                handler: RwLock::new(None),
                status: Mutex::new(ChannelStatus::Disconnected),
                active: AtomicBool::new(false),
            }),
            session_id: None,
            commands: None,
            worker: None,
        }
    }

    /// Install the event handler. Called from the worker thread.
    pub fn on_result<F>(&self, handler: F)
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        *self.shared.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    /// Start the connection worker for `session_id`
    ///
    /// Returns once the worker is running; the link itself opens in the
    /// background and reports through `Connected` or `Degraded`.
    pub fn connect(&mut self, session_id: &str) -> Result<(), ChannelError> {
        if self.worker.is_some() {
            return Err(ChannelError::AlreadyConnected);
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ChannelError::ConnectFailed {
                url: self.transport.endpoint(),
                reason: format!("runtime: {}", e),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = ChannelWorker {
            transport: Arc::clone(&self.transport),
            policy: self.policy,
            shared: Arc::clone(&self.shared),
            session_id: session_id.to_string(),
            commands: rx,
        };

        self.shared.active.store(true, Ordering::SeqCst);
        self.shared.set_status(ChannelStatus::Connecting);

        let handle = thread::Builder::new()
            .name("remote-channel".to_string())
            .spawn(move || runtime.block_on(worker.run()))
            .map_err(|e| {
                self.shared.active.store(false, Ordering::SeqCst);
                self.shared.set_status(ChannelStatus::Disconnected);
                ChannelError::ConnectFailed {
                    url: self.transport.endpoint(),
                    reason: e.to_string(),
                }
            })?;

        log::info!(
            "[RemoteChannel] Connecting to {} (session {})",
            self.transport.endpoint(),
            session_id
        );
        self.session_id = Some(session_id.to_string());
        self.commands = Some(tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// Queue a window for the backend. Dropped unless the link is up.
    pub fn send(&self, window: &FeatureWindow) {
        let (Some(commands), Some(session_id)) = (&self.commands, &self.session_id) else {
            return;
        };
        if self.shared.status() != ChannelStatus::Connected {
            return;
        }
        match protocol::encode_window(window, session_id) {
            Ok(text) => {
                let _ = commands.send(Command::Send(text));
            }
            Err(err) => log_channel_error(&err, "encode window"),
        }
    }

    /// Close the link and join the worker. No handler call happens after
    /// this returns. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Disconnect);
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("[RemoteChannel] Worker thread panicked");
            }
            log::info!("[RemoteChannel] Disconnected");
        }
        self.session_id = None;
        self.shared.set_status(ChannelStatus::Disconnected);
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

impl Drop for RemoteRecognitionChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum LinkExit {
    Disconnect,
    Lost(String),
}

struct ChannelWorker {
    transport: Arc<dyn Transport>,
    policy: BackoffPolicy,
    shared: Arc<ChannelShared>,
    session_id: String,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl ChannelWorker {
    async fn run(mut self) {
        let mut backoff = ReconnectBackoff::new(self.policy);
        let mut degraded = false;

        loop {
            let opened = {
                let open = self.transport.open(&self.session_id);
                tokio::pin!(open);
                loop {
                    tokio::select! {
                        result = &mut open => break result,
                        command = self.commands.recv() => match command {
                            // Not connected: windows are dropped
                            Some(Command::Send(_)) => {}
                            Some(Command::Disconnect) | None => return,
                        },
                    }
                }
            };

            match opened {
                Ok(link) => {
                    backoff.reset();
                    self.shared.set_status(ChannelStatus::Connected);
                    log::info!("[RemoteChannel] Connected (session {})", self.session_id);
                    self.shared.emit(ChannelEvent::Connected);

                    match self.pump(link).await {
                        LinkExit::Disconnect => return,
                        LinkExit::Lost(reason) => {
                            log::warn!("[RemoteChannel] Link lost: {}", reason);
                            degraded = true;
                            self.shared.set_status(ChannelStatus::Degraded);
                            self.shared.emit(ChannelEvent::Degraded { reason });
                        }
                    }
                }
                Err(err) => {
                    log_channel_error(&err, "connect");
                    if !degraded {
                        degraded = true;
                        self.shared.set_status(ChannelStatus::Degraded);
                        self.shared.emit(ChannelEvent::Degraded {
                            reason: err.to_string(),
                        });
                    }
                }
            }

            let delay = backoff.next_delay();
            log::info!("[RemoteChannel] reconnect in {}ms", delay.as_millis());
            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    command = self.commands.recv() => match command {
                        Some(Command::Send(_)) => {}
                        Some(Command::Disconnect) | None => return,
                    },
                }
            }
        }
    }

    async fn pump(&mut self, link: TransportLink) -> LinkExit {
        let TransportLink {
            mut sink,
            mut stream,
        } = link;

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => {
                        if let Err(err) = sink.send(text).await {
                            log_channel_error(&err, "send window");
                            return LinkExit::Lost(err.to_string());
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.close().await;
                        return LinkExit::Disconnect;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(err)) => return LinkExit::Lost(err.to_string()),
                    None => return LinkExit::Lost("connection closed by peer".to_string()),
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match protocol::parse_inbound(text) {
            Ok(InboundMessage::ChordResult {
                sequence_number,
                chord_label,
                confidence,
            }) => self.shared.emit(ChannelEvent::Result(RemoteChordResult {
                sequence_number,
                chord_label,
                confidence,
            })),
            Ok(InboundMessage::Feedback { message, score }) => {
                self.shared
                    .emit(ChannelEvent::Feedback(CoachingFeedback { message, score }))
            }
            Err(err) => {
                log::warn!("[RemoteChannel] Discarding malformed payload: {}", err);
            }
        }
    }
}
