//! TCP transport: one connection generation with its reader and writer loops

use crate::{
    bus::EventBus,
    constants::{GREETING_PREFIX, SOCKET_BUF_SIZE},
    correlator::Correlator,
    error::{AmiError, AmiResult},
    protocol::{AmiMessage, AmiParser},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one connection generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Dialing TCP
    Connecting,
    /// Waiting for the server greeting
    Handshaking,
    /// Reader and writer running
    Online,
    /// Teardown requested
    Closing,
    /// Socket gone
    Closed,
}

/// One TCP connection and everything scoped to it.
///
/// The stop signal flips to `true` exactly once; every task of the generation
/// watches it and exits when it does.
pub(crate) struct Generation {
    id: u64,
    state: watch::Sender<LinkState>,
    stop: watch::Sender<bool>,
    authenticated: AtomicBool,
    no_reconnect: AtomicBool,
    greeting: OnceLock<String>,
}

impl Generation {
    pub(crate) fn new(id: u64) -> Self {
        let (state, _) = watch::channel(LinkState::Connecting);
        let (stop, _) = watch::channel(false);
        Self {
            id,
            state,
            stop,
            authenticated: AtomicBool::new(false),
            no_reconnect: AtomicBool::new(false),
            greeting: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn state(&self) -> LinkState {
        *self
            .state
            .borrow()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state
            .send_replace(state);
    }

    pub(crate) fn is_online(&self) -> bool {
        self.state() == LinkState::Online
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop
            .subscribe()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self
            .stop
            .borrow()
    }

    /// Fire the stop signal. Only the first call has any effect; it returns
    /// `true` for that call.
    pub(crate) fn teardown(&self, reason: &str) -> bool {
        let first = self
            .stop
            .send_if_modified(|stopped| {
                if *stopped {
                    false
                } else {
                    *stopped = true;
                    true
                }
            });
        if first {
            debug!("[CONNECT] Tearing down generation {}: {}", self.id, reason);
            self.state
                .send_if_modified(|state| {
                    if *state == LinkState::Closed {
                        false
                    } else {
                        *state = LinkState::Closing;
                        true
                    }
                });
        }
        first
    }

    pub(crate) fn mark_authenticated(&self) {
        self.authenticated
            .store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_authenticated(&self) -> bool {
        self.authenticated
            .load(Ordering::SeqCst)
    }

    /// After a logoff or rejected login this generation must not be replaced.
    pub(crate) fn mark_no_reconnect(&self) {
        self.no_reconnect
            .store(true, Ordering::SeqCst);
    }

    pub(crate) fn no_reconnect(&self) -> bool {
        self.no_reconnect
            .load(Ordering::SeqCst)
    }

    pub(crate) fn set_greeting(&self, greeting: String) {
        let _ = self
            .greeting
            .set(greeting);
    }

    pub(crate) fn greeting(&self) -> Option<&str> {
        self.greeting
            .get()
            .map(String::as_str)
    }
}

/// Resolves once `stop` reads `true` or its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop
            .changed()
            .await
            .is_err()
        {
            return;
        }
    }
}

/// A serialized action waiting for the writer, tagged with the generation it
/// was submitted on.
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) generation: u64,
    pub(crate) token: String,
    pub(crate) wire: String,
}

/// Single consumer side of the session's outgoing queue, handed from one
/// generation's writer to the next.
pub(crate) type OutgoingQueue = Arc<Mutex<mpsc::UnboundedReceiver<Outgoing>>>;

pub(crate) async fn tcp_connect_with_timeout(
    address: &str,
    dial_timeout: Duration,
) -> AmiResult<TcpStream> {
    let tcp_result = timeout(dial_timeout, TcpStream::connect(address)).await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established to {}", address);
            if let Err(e) = s.set_nodelay(true) {
                debug!("[CONNECT] Could not set TCP_NODELAY: {}", e);
            }
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect to {} failed: {}", address, e);
            Err(AmiError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            warn!(
                "[CONNECT] TCP connect to {} timed out after {:?}",
                address, dial_timeout
            );
            Err(AmiError::Connect {
                address: address.to_string(),
                reason: format!("timed out after {}ms", dial_timeout.as_millis()),
            })
        }
    }
}

/// Read the `Asterisk Call Manager/x.y.z` banner.
///
/// Bytes after the banner stay in `parser` for the reader loop.
pub(crate) async fn read_greeting<R>(reader: &mut R, parser: &mut AmiParser) -> AmiResult<String>
where
    R: AsyncRead + Unpin,
{
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    loop {
        while let Some(line) = parser.take_line() {
            let line = line
                .trim()
                .to_string();
            if line.is_empty() {
                continue;
            }
            if !line.starts_with(GREETING_PREFIX) {
                return Err(AmiError::protocol_error(format!(
                    "unexpected greeting '{}'",
                    line
                )));
            }
            debug!("[CONNECT] Server greeting: {}", line);
            return Ok(line);
        }

        let n = reader
            .read(&mut read_buffer)
            .await?;
        if n == 0 {
            return Err(AmiError::ConnectionClosed);
        }
        parser.add_data(&read_buffer[..n])?;
    }
}

/// Background reader loop
///
/// Splits the byte stream into frames and routes each, in wire order,
/// through the correlator; unsolicited frames go to the event bus. Any read
/// or framing failure tears the generation down.
pub(crate) async fn reader_loop<R>(
    reader: R,
    parser: AmiParser,
    generation: Arc<Generation>,
    correlator: Correlator,
    events: EventBus,
) where
    R: AsyncRead + Unpin + Send,
{
    let result = std::panic::AssertUnwindSafe(reader_loop_inner(
        reader,
        parser,
        Arc::clone(&generation),
        correlator,
        events,
    ));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        tracing::error!("reader task panicked");
        generation.teardown("reader task panicked");
    }
}

async fn reader_loop_inner<R>(
    mut reader: R,
    mut parser: AmiParser,
    generation: Arc<Generation>,
    correlator: Correlator,
    events: EventBus,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
    let mut stop = generation.stop_signal();

    loop {
        loop {
            match parser.next_frame() {
                Ok(Some(frame)) => route(&frame, &correlator, &events).await,
                Ok(None) => break,
                Err(e) => {
                    warn!("[RECV] Parser error: {}", e);
                    generation.teardown(&e.to_string());
                    return;
                }
            }
        }

        let read_result = tokio::select! {
            _ = stopped(&mut stop) => {
                trace!("[RECV] Stop signal, reader exiting");
                return;
            }
            read = reader.read(&mut read_buffer) => read,
        };

        match read_result {
            Ok(0) => {
                if let Ok(Some(frame)) = parser.finish() {
                    route(&frame, &correlator, &events).await;
                }
                info!("[RECV] Connection closed (EOF)");
                generation.teardown("connection closed by peer");
                return;
            }
            Ok(n) => {
                trace!("[RECV] Read {} bytes", n);
                if let Err(e) = parser.add_data(&read_buffer[..n]) {
                    warn!("[RECV] Buffer error: {}", e);
                    generation.teardown(&e.to_string());
                    return;
                }
            }
            Err(e) => {
                warn!("[RECV] Read error: {}", e);
                generation.teardown(&e.to_string());
                return;
            }
        }
    }
}

async fn route(frame: &str, correlator: &Correlator, events: &EventBus) {
    let message = AmiMessage::parse(frame);
    trace!("[RECV] {:?} frame {}", message.kind, message.fields);
    if let Some(event) = correlator
        .dispatch(message)
        .await
    {
        events.publish(&event);
    }
}

/// Background writer loop
///
/// Holds the outgoing queue for the lifetime of the generation. Actions queued
/// under an earlier generation are dropped unwritten.
pub(crate) async fn writer_loop<W>(mut writer: W, generation: Arc<Generation>, queue: OutgoingQueue)
where
    W: AsyncWrite + Unpin + Send,
{
    let mut stop = generation.stop_signal();
    let mut queue = queue
        .lock()
        .await;

    loop {
        let item = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            item = queue.recv() => item,
        };

        let Some(item) = item else {
            debug!("[SEND] Outgoing queue closed, writer exiting");
            generation.teardown("session dropped");
            break;
        };

        if item.generation != generation.id() {
            debug!(
                "[SEND] Dropping action {} queued on generation {} (now {})",
                item.token,
                item.generation,
                generation.id()
            );
            continue;
        }

        trace!("[SEND] Writing action {}", item.token);
        // A peer that stops reading must not pin the queue past teardown.
        let written = tokio::select! {
            biased;
            _ = stopped(&mut stop) => {
                debug!("[SEND] Stop signal while writing action {}, abandoning it", item.token);
                break;
            }
            result = async {
                writer
                    .write_all(
                        item.wire
                            .as_bytes(),
                    )
                    .await?;
                writer
                    .flush()
                    .await
            } => result,
        };

        if let Err(e) = written {
            warn!("[SEND] Write error: {}", e);
            generation.teardown(&e.to_string());
            break;
        }
    }

    let _ = writer
        .shutdown()
        .await;
}
