use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubetap_types::{ExecChannel, LogTarget, TerminalSize};

use crate::codec::{ExecChannelCodec, ExecChannelMessage};
use crate::transport::{ExecSocket, ExecTransport};

// ============================================================================
// Types
// ============================================================================

/// Connection state of an exec session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecState {
    Disconnected,
    NegotiatingShell,
    Connected,
    Closed,
}

/// One candidate remote command, e.g. `/bin/bash`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellCommand(Vec<String>);

impl ShellCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self(argv)
    }

    pub fn argv(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for ShellCommand {
    fn from(command: &str) -> Self {
        Self(command.split_whitespace().map(str::to_string).collect())
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Why one candidate shell was rejected
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShellAttempt {
    pub shell: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("exec transport failed: {0}")]
    Transport(String),

    #[error("no shell available (tried {})", describe_attempts(.attempts))]
    NoShellAvailable { attempts: Vec<ShellAttempt> },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("exec session already started")]
    AlreadyStarted,

    #[error("exec session was disconnected")]
    Closed,
}

fn describe_attempts(attempts: &[ShellAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.shell, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Receives stdout and stderr payloads
pub type OutputCallback = Arc<dyn Fn(ExecChannel, &[u8]) + Send + Sync>;

/// Receives errors raised after the session connected
pub type ExecErrorCallback = Arc<dyn Fn(&ExecError) + Send + Sync>;

/// Called once when a connected session closes without `disconnect`
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct ExecHandlers {
    pub on_output: OutputCallback,
    pub on_error: Option<ExecErrorCallback>,
    pub on_close: Option<CloseCallback>,
}

impl ExecHandlers {
    pub fn new(on_output: OutputCallback) -> Self {
        Self {
            on_output,
            on_error: None,
            on_close: None,
        }
    }

    fn error(&self, error: &ExecError) {
        if let Some(on_error) = &self.on_error {
            on_error(error);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ExecOptions {
    /// Bound on opening the socket for one candidate
    pub connect_timeout: Duration,
    /// How long a fresh socket must stay open before the shell counts as started
    pub confirm_window: Duration,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            confirm_window: Duration::from_millis(300),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

struct Shared {
    state: Mutex<ExecState>,
    was_connected: AtomicBool,
    closing: AtomicBool,
    closed: CancellationToken,
}

impl Shared {
    fn set_state(&self, state: ExecState) {
        *self.state.lock() = state;
    }
}

/// Handles of a running pump task
struct Link {
    shell: ShellCommand,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
}

/// Interactive shell in one container over one exec socket
pub struct ExecSession {
    target: LogTarget,
    handlers: ExecHandlers,
    options: ExecOptions,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
}

impl ExecSession {
    pub fn new(target: LogTarget, handlers: ExecHandlers, options: ExecOptions) -> Self {
        Self {
            target,
            handlers,
            options,
            shared: Arc::new(Shared {
                state: Mutex::new(ExecState::Disconnected),
                was_connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                closed: CancellationToken::new(),
            }),
            link: Mutex::new(None),
        }
    }

    /// Create a session and connect it to the first working shell
    pub async fn open(
        transport: &dyn ExecTransport,
        target: LogTarget,
        shells: &[ShellCommand],
        handlers: ExecHandlers,
        options: ExecOptions,
    ) -> Result<Self, ExecError> {
        let session = Self::new(target, handlers, options);
        session.connect(transport, shells).await?;
        Ok(session)
    }

    /// Try each shell in order until one starts.
    ///
    /// A failed candidate's socket is closed before the next one is tried.
    /// When every candidate fails the error names all of them.
    pub async fn connect(
        &self,
        transport: &dyn ExecTransport,
        shells: &[ShellCommand],
    ) -> Result<(), ExecError> {
        {
            let mut state = self.shared.state.lock();
            if *state != ExecState::Disconnected {
                return Err(ExecError::AlreadyStarted);
            }
            *state = ExecState::NegotiatingShell;
        }

        let mut attempts = Vec::with_capacity(shells.len());

        for shell in shells {
            if self.is_closing() {
                return Err(self.abandon());
            }

            debug!(target_pod = %self.target, %shell, "trying shell");
            match self.negotiate(transport, shell).await {
                Ok((socket, early)) => match self.attach(shell.clone(), socket, early) {
                    None => {
                        info!(target_pod = %self.target, %shell, "exec session connected");
                        return Ok(());
                    }
                    Some(socket) => {
                        close_socket(socket).await;
                        return Err(self.abandon());
                    }
                },
                Err(reason) => {
                    if self.is_closing() {
                        return Err(self.abandon());
                    }
                    debug!(target_pod = %self.target, %shell, %reason, "shell rejected");
                    attempts.push(ShellAttempt {
                        shell: shell.to_string(),
                        reason,
                    });
                }
            }
        }

        if self.is_closing() {
            return Err(self.abandon());
        }

        self.shared.set_state(ExecState::Closed);
        self.shared.closed.cancel();
        let error = ExecError::NoShellAvailable { attempts };
        warn!(target_pod = %self.target, %error, "exec negotiation failed");
        Err(error)
    }

    /// Give up negotiating after `disconnect`
    fn abandon(&self) -> ExecError {
        self.shared.set_state(ExecState::Closed);
        self.shared.closed.cancel();
        ExecError::Closed
    }

    /// Open a socket for one shell and wait for it to be confirmed.
    ///
    /// Returns the socket and any output frames seen while confirming.
    async fn negotiate(
        &self,
        transport: &dyn ExecTransport,
        shell: &ShellCommand,
    ) -> Result<(ExecSocket, Vec<ExecChannelMessage>), String> {
        let timeout = self.options.connect_timeout;
        let opened = tokio::time::timeout(timeout, transport.open(&self.target, shell.argv()))
            .await
            .map_err(|_| format!("timed out after {}ms", timeout.as_millis()))?;
        let mut socket = opened.map_err(|err| format!("{:#}", err))?;

        let window = tokio::time::sleep(self.options.confirm_window);
        tokio::pin!(window);
        let mut early = Vec::new();

        loop {
            let next = tokio::select! {
                _ = &mut window => break,
                next = socket.stream.next() => next,
            };

            match next {
                Some(Ok(frame)) => match ExecChannelCodec::decode(&frame) {
                    Some(message) if message.channel == ExecChannel::Error => {
                        if let Some(reason) = remote_failure(&message.payload) {
                            close_socket(socket).await;
                            return Err(reason);
                        }
                    }
                    Some(message) if message.is_output() => {
                        let confirmed = !message.payload.is_empty();
                        early.push(message);
                        if confirmed {
                            break;
                        }
                    }
                    _ => {}
                },
                Some(Err(err)) => {
                    close_socket(socket).await;
                    return Err(format!("{:#}", err));
                }
                None => return Err("closed immediately".to_string()),
            }
        }

        Ok((socket, early))
    }

    /// Start pumping a confirmed socket and mark the session connected.
    ///
    /// Hands the socket back if `disconnect` got there first.
    fn attach(
        &self,
        shell: ShellCommand,
        socket: ExecSocket,
        early: Vec<ExecChannelMessage>,
    ) -> Option<ExecSocket> {
        let mut link = self.link.lock();
        if self.is_closing() {
            return Some(socket);
        }

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(pump(
            socket,
            early,
            outbound_rx,
            shutdown.clone(),
            Arc::clone(&self.shared),
            self.handlers.clone(),
        ));

        *link = Some(Link {
            shell,
            outbound,
            shutdown,
        });
        self.shared.was_connected.store(true, Ordering::SeqCst);
        self.shared.set_state(ExecState::Connected);
        None
    }

    /// Write text to the remote stdin. No-op unless connected.
    pub fn send(&self, text: &str) {
        self.send_frame(ExecChannelCodec::encode_stdin(text));
    }

    /// Resize the remote terminal. No-op unless connected.
    pub fn resize(&self, cols: u16, rows: u16) {
        self.send_frame(ExecChannelCodec::encode_resize(TerminalSize::new(cols, rows)));
    }

    fn send_frame(&self, frame: Vec<u8>) {
        if !self.is_connected() {
            return;
        }
        if let Some(link) = self.link.lock().as_ref() {
            let _ = link.outbound.send(frame);
        }
    }

    /// Close the session without reporting it as an unexpected close. Idempotent.
    pub fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        match self.link.lock().take() {
            Some(link) => {
                debug!(
                    target_pod = %self.target,
                    shell = %link.shell,
                    "disconnecting exec session"
                );
                link.shutdown.cancel();
            }
            None => {
                if *self.shared.state.lock() == ExecState::Disconnected {
                    self.shared.closed.cancel();
                }
            }
        }

        let mut state = self.shared.state.lock();
        if *state != ExecState::NegotiatingShell {
            *state = ExecState::Closed;
        }
    }

    pub fn state(&self) -> ExecState {
        *self.shared.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ExecState::Connected
    }

    /// The shell the session connected with
    pub fn shell(&self) -> Option<ShellCommand> {
        self.link.lock().as_ref().map(|link| link.shell.clone())
    }

    pub fn target(&self) -> &LogTarget {
        &self.target
    }

    /// Wait until the socket is gone
    pub async fn wait_closed(&self) {
        self.shared.closed.cancelled().await;
    }

    fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }
}

impl Drop for ExecSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Move frames between the socket and the session until either side ends
async fn pump(
    socket: ExecSocket,
    early: Vec<ExecChannelMessage>,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: CancellationToken,
    shared: Arc<Shared>,
    handlers: ExecHandlers,
) {
    let ExecSocket { mut sink, mut stream } = socket;
    let closing = || shared.closing.load(Ordering::SeqCst);

    for message in early {
        (handlers.on_output)(message.channel, &message.payload);
    }

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let _ = sink.close().await;
                break;
            }

            Some(frame) = outbound.recv() => {
                if let Err(err) = sink.send(frame).await {
                    if !closing() {
                        handlers.error(&ExecError::Transport(format!("{:#}", err)));
                    }
                    break;
                }
            }

            next = stream.next() => match next {
                Some(Ok(frame)) => dispatch(&frame, &handlers),
                Some(Err(err)) => {
                    if !closing() {
                        handlers.error(&ExecError::Transport(format!("{:#}", err)));
                    }
                    break;
                }
                None => break,
            },
        }
    }

    shared.set_state(ExecState::Closed);
    if !closing() && shared.was_connected.load(Ordering::SeqCst) {
        debug!("exec socket closed by remote");
        if let Some(on_close) = &handlers.on_close {
            on_close();
        }
    }
    shared.closed.cancel();
}

fn dispatch(frame: &[u8], handlers: &ExecHandlers) {
    let Some(message) = ExecChannelCodec::decode(frame) else {
        return;
    };

    match message.channel {
        ExecChannel::Stdout | ExecChannel::Stderr => {
            if !message.payload.is_empty() {
                (handlers.on_output)(message.channel, &message.payload);
            }
        }
        ExecChannel::Error => {
            if let Some(reason) = remote_failure(&message.payload) {
                handlers.error(&ExecError::Remote(reason));
            }
        }
        ExecChannel::Stdin | ExecChannel::Resize => {}
    }
}

/// The fields of a remote `Status` object that matter here
#[derive(Deserialize)]
struct RemoteStatus {
    status: Option<String>,
    message: Option<String>,
    reason: Option<String>,
}

/// Failure text of an error-channel payload, or `None` for a success status
fn remote_failure(payload: &[u8]) -> Option<String> {
    match serde_json::from_slice::<RemoteStatus>(payload) {
        Ok(status) if status.status.as_deref() == Some("Success") => None,
        Ok(status) => Some(
            status
                .message
                .or(status.reason)
                .unwrap_or_else(|| "remote command failed".to_string()),
        ),
        Err(_) => {
            let text = String::from_utf8_lossy(payload).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
    }
}

async fn close_socket(mut socket: ExecSocket) {
    let _ = socket.sink.close().await;
}
