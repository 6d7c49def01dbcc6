//! A single DAP peer connection.
//!
//! Wraps one bidirectional byte stream (adapter stdio, a TCP socket, or an
//! in-memory stream in tests) with a reader task and a writer task. Tracks
//! outgoing requests in a pending table keyed by sequence number, routes
//! responses to waiting callers via oneshot channels, fans events out to
//! subscribers, and hands reverse requests to the owning client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{timeout, Duration};

use crate::codec::{encode_message, FrameDecoder};
use crate::error::DapError;
use crate::protocol::{Event, Message, Request, Response};

/// Default timeout for requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One outstanding request awaiting its response.
#[derive(Debug)]
struct Pending {
    command: String,
    tx: oneshot::Sender<Result<Option<serde_json::Value>, DapError>>,
}

/// Event fan-out state: persistent subscribers plus one-shot waiters keyed
/// by event name.
#[derive(Default, Debug)]
struct EventSinks {
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
    waiters: HashMap<String, Vec<oneshot::Sender<Event>>>,
}

#[derive(Debug)]
struct Shared {
    seq: AtomicI64,
    pending: Mutex<HashMap<i64, Pending>>,
    sinks: Mutex<EventSinks>,
    reverse: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    closed_tx: watch::Sender<Option<String>>,
}

/// A handle to a request that has been written but whose response has not
/// been awaited yet. Used for fire-and-forget `launch`.
pub struct PendingReply {
    command: String,
    rx: oneshot::Receiver<Result<Option<serde_json::Value>, DapError>>,
}

impl PendingReply {
    /// Wait up to `dur` for the response. Returns `None` when the timeout
    /// elapses; the request stays registered, so a late response still
    /// resolves a subsequent `wait`.
    pub async fn wait(&mut self, dur: Duration) -> Option<Result<Option<serde_json::Value>, DapError>> {
        match timeout(dur, &mut self.rx).await {
            Ok(Ok(result)) => Some(result),
            Ok(Err(_)) => Some(Err(DapError::ConnectionClosed(
                "response channel dropped".into(),
            ))),
            Err(_) => None,
        }
    }

    /// The command this reply belongs to.
    pub fn command(&self) -> &str {
        &self.command
    }
}

/// One logical DAP connection.
#[derive(Debug)]
pub struct DapConnection {
    shared: Arc<Shared>,
    default_timeout: Duration,
}

impl DapConnection {
    /// Wrap a reader/writer pair, spawning the I/O tasks.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_timeout(reader, writer, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Wrap a reader/writer pair with a custom default request timeout.
    pub fn with_timeout<R, W>(reader: R, writer: W, default_timeout: Duration) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (closed_tx, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            seq: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            sinks: Mutex::new(EventSinks::default()),
            reverse: Mutex::new(None),
            writer_tx,
            closed_tx,
        });

        tokio::spawn(writer_task(writer, writer_rx));
        tokio::spawn(reader_task(reader, shared.clone()));

        Self {
            shared,
            default_timeout,
        }
    }

    /// Send a request and wait for its response with the default timeout.
    pub async fn send_request(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<Option<serde_json::Value>, DapError> {
        self.send_request_with_timeout(command, arguments, self.default_timeout)
            .await
    }

    /// Send a request and wait for its response, failing after `dur`.
    ///
    /// On timeout the pending record is removed and the caller gets
    /// [`DapError::Timeout`]; the session is otherwise unaffected.
    pub async fn send_request_with_timeout(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
        dur: Duration,
    ) -> Result<Option<serde_json::Value>, DapError> {
        let (seq, mut reply) = self.send_request_async(command, arguments).await?;
        match reply.wait(dur).await {
            Some(result) => result,
            None => {
                self.shared.pending.lock().await.remove(&seq);
                Err(DapError::Timeout {
                    command: command.to_string(),
                    timeout_ms: dur.as_millis() as u64,
                })
            }
        }
    }

    /// Send a request without waiting: the pending record has no timer and
    /// stays registered until the response arrives or the stream closes.
    pub async fn send_request_async(
        &self,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<(i64, PendingReply), DapError> {
        if let Some(reason) = self.close_reason() {
            return Err(DapError::ConnectionClosed(reason));
        }

        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            pending.insert(
                seq,
                Pending {
                    command: command.to_string(),
                    tx,
                },
            );
        }

        let msg = Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        let bytes = encode_message(&serde_json::to_value(&msg).map_err(|e| {
            DapError::InvalidResponse(format!("request serialization failed: {e}"))
        })?);

        if self.shared.writer_tx.send(bytes).is_err() {
            self.shared.pending.lock().await.remove(&seq);
            return Err(DapError::ConnectionClosed("writer task gone".into()));
        }

        Ok((
            seq,
            PendingReply {
                command: command.to_string(),
                rx,
            },
        ))
    }

    /// Send a response to a reverse request. Every reverse request must be
    /// answered, including rejections.
    pub fn send_response(
        &self,
        request_seq: i64,
        command: &str,
        success: bool,
        message: Option<String>,
        body: Option<serde_json::Value>,
    ) -> Result<(), DapError> {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let msg = Message::Response(Response {
            seq,
            request_seq,
            success,
            command: command.to_string(),
            message,
            body,
        });
        let bytes = encode_message(&serde_json::to_value(&msg).map_err(|e| {
            DapError::InvalidResponse(format!("response serialization failed: {e}"))
        })?);
        self.shared
            .writer_tx
            .send(bytes)
            .map_err(|_| DapError::ConnectionClosed("writer task gone".into()))
    }

    /// Subscribe to every event arriving on this connection.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.sinks.lock().await.subscribers.push(tx);
        rx
    }

    /// Wait for the next event with the given name.
    pub async fn wait_for_event(&self, name: &str, dur: Duration) -> Result<Event, DapError> {
        let rx = self.register_event_waiter(name).await;
        match timeout(dur, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(DapError::ConnectionClosed(
                self.close_reason().unwrap_or_else(|| "stream ended".into()),
            )),
            Err(_) => Err(DapError::Timeout {
                command: format!("event '{name}'"),
                timeout_ms: dur.as_millis() as u64,
            }),
        }
    }

    /// Register a one-shot waiter for the named event without awaiting it.
    /// Lets callers arm the waiter before issuing the request that will
    /// trigger the event.
    pub async fn register_event_waiter(&self, name: &str) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .sinks
            .lock()
            .await
            .waiters
            .entry(name.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Feed a synthetic event through the normal dispatch path. Used for
    /// adapter stderr forwarding and for child-session event routing.
    pub async fn inject_event(&self, event: Event) {
        dispatch_event(&self.shared, event).await;
    }

    /// Take the reverse-request channel. Requests arriving with no consumer
    /// registered are auto-rejected by the reader task.
    pub async fn take_reverse_requests(&self) -> mpsc::UnboundedReceiver<Request> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.reverse.lock().await = Some(tx);
        rx
    }

    /// Watch for connection closure; the value becomes `Some(reason)` once.
    pub fn closed(&self) -> watch::Receiver<Option<String>> {
        self.shared.closed_tx.subscribe()
    }

    /// The close reason, if the connection has closed.
    pub fn close_reason(&self) -> Option<String> {
        self.shared.closed_tx.borrow().clone()
    }

    /// Number of requests currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<Vec<u8>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(bytes) = rx.recv().await {
        if writer.write_all(&bytes).await.is_err() {
            break;
        }
        if writer.flush().await.is_err() {
            break;
        }
    }
}

async fn reader_task<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];
    let reason = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break "stream ended".to_string(),
            Ok(n) => n,
            Err(e) => break format!("read failed: {e}"),
        };
        decoder.extend(&buf[..n]);

        loop {
            match decoder.try_parse() {
                Ok(Some(value)) => dispatch_message(&shared, value).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("fatal codec error on DAP stream: {e}");
                    close(&shared, format!("codec error: {e}")).await;
                    return;
                }
            }
        }
    };
    close(&shared, reason).await;
}

async fn dispatch_message(shared: &Arc<Shared>, value: serde_json::Value) {
    let message: Message = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("ignoring unclassifiable DAP message: {e}");
            return;
        }
    };

    match message {
        Message::Response(resp) => {
            let entry = shared.pending.lock().await.remove(&resp.request_seq);
            match entry {
                Some(pending) => {
                    let result = if resp.success {
                        Ok(resp.body)
                    } else {
                        Err(DapError::Rejected {
                            message: resp.message.unwrap_or_else(|| {
                                format!("Request '{}' failed", pending.command)
                            }),
                        })
                    };
                    // Caller may have timed out and dropped its receiver.
                    let _ = pending.tx.send(result);
                }
                None => {
                    tracing::debug!(
                        "stale response for unknown request_seq {}",
                        resp.request_seq
                    );
                }
            }
        }
        Message::Event(event) => dispatch_event(shared, event).await,
        Message::Request(request) => {
            let handled = {
                let reverse = shared.reverse.lock().await;
                match reverse.as_ref() {
                    Some(tx) => tx.send(request.clone()).is_ok(),
                    None => false,
                }
            };
            if !handled {
                tracing::debug!("auto-rejecting reverse request '{}'", request.command);
                let seq = shared.seq.fetch_add(1, Ordering::Relaxed);
                let msg = Message::Response(Response {
                    seq,
                    request_seq: request.seq,
                    success: false,
                    command: request.command,
                    message: Some("unsupported reverse request".into()),
                    body: None,
                });
                if let Ok(value) = serde_json::to_value(&msg) {
                    let _ = shared.writer_tx.send(encode_message(&value));
                }
            }
        }
    }
}

async fn dispatch_event(shared: &Arc<Shared>, event: Event) {
    let mut sinks = shared.sinks.lock().await;
    if let Some(waiters) = sinks.waiters.remove(&event.event) {
        for waiter in waiters {
            let _ = waiter.send(event.clone());
        }
    }
    sinks
        .subscribers
        .retain(|sub| sub.send(event.clone()).is_ok());
}

async fn close(shared: &Arc<Shared>, reason: String) {
    let _ = shared.closed_tx.send(Some(reason.clone()));

    let pending: Vec<Pending> = shared.pending.lock().await.drain().map(|(_, p)| p).collect();
    for p in pending {
        let _ = p
            .tx
            .send(Err(DapError::ConnectionClosed(reason.clone())));
    }

    // Dropping the sinks ends subscriber streams and fails event waiters;
    // dropping the reverse sender ends the owner's reverse-request loop.
    let mut sinks = shared.sinks.lock().await;
    sinks.subscribers.clear();
    sinks.waiters.clear();
    drop(sinks);
    *shared.reverse.lock().await = None;
}
