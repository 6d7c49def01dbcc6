//! Shared scripted-adapter plumbing for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

use dapmux_dap::{encode_message, DapConnection, Event, FrameDecoder, Message, Request, Response};

/// The adapter-side handle of a DAP connection under test: a stream of the
/// client's outgoing messages plus a writer for scripted replies. Works
/// over in-memory duplex pipes and real sockets alike.
pub struct MockPeer<W = tokio::io::WriteHalf<DuplexStream>> {
    pub messages: mpsc::UnboundedReceiver<Message>,
    writer: W,
}

impl<W: tokio::io::AsyncWrite + Unpin> MockPeer<W> {
    /// Next request from the client, asserting its command.
    pub async fn expect_request(&mut self, command: &str) -> Request {
        loop {
            match self.next_message(command).await {
                Message::Request(req) => {
                    assert_eq!(req.command, command, "unexpected request order");
                    return req;
                }
                // The client may interleave replies to reverse requests.
                Message::Response(_) => continue,
                other => panic!("expected request '{command}', got {other:?}"),
            }
        }
    }

    /// Next response from the client (to a reverse request).
    pub async fn expect_response(&mut self) -> Response {
        loop {
            match self.next_message("a response").await {
                Message::Response(resp) => return resp,
                Message::Request(_) => continue,
                other => panic!("expected response, got {other:?}"),
            }
        }
    }

    async fn next_message(&mut self, what: &str) -> Message {
        self.messages
            .recv()
            .await
            .unwrap_or_else(|| panic!("stream ended awaiting {what}"))
    }

    /// Reply success to a request.
    pub async fn respond(&mut self, req: &Request, body: Option<serde_json::Value>) {
        self.send(&Message::Response(Response {
            seq: 1000 + req.seq,
            request_seq: req.seq,
            success: true,
            command: req.command.clone(),
            message: None,
            body,
        }))
        .await;
    }

    /// Emit an event to the client.
    pub async fn send_event(&mut self, name: &str, body: Option<serde_json::Value>) {
        self.send(&Message::Event(Event {
            seq: 0,
            event: name.into(),
            body,
        }))
        .await;
    }

    /// Send a reverse request to the client.
    pub async fn send_reverse_request(
        &mut self,
        seq: i64,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) {
        self.send(&Message::Request(Request {
            seq,
            command: command.into(),
            arguments,
        }))
        .await;
    }

    pub async fn send(&mut self, msg: &Message) {
        let bytes = encode_message(&serde_json::to_value(msg).unwrap());
        self.writer.write_all(&bytes).await.unwrap();
    }
}

/// Wrap an accepted TCP socket as a scripted peer.
pub fn wrap_tcp(
    stream: tokio::net::TcpStream,
) -> MockPeer<tokio::net::tcp::OwnedWriteHalf> {
    let (read_half, write_half) = stream.into_split();
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_messages(read_half, msg_tx));
    MockPeer {
        messages: msg_rx,
        writer: write_half,
    }
}

/// Build a connection whose peer is a scripted mock.
pub fn mock_connection() -> (Arc<DapConnection>, MockPeer) {
    let (ours, theirs) = duplex(256 * 1024);
    let (read_half, write_half) = split(ours);
    let conn = Arc::new(DapConnection::new(read_half, write_half));

    let (peer_read, peer_write) = split(theirs);
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    tokio::spawn(pump_messages(peer_read, msg_tx));

    (
        conn,
        MockPeer {
            messages: msg_rx,
            writer: peer_write,
        },
    )
}

/// Decode frames arriving from the client and forward them.
pub async fn pump_messages<R>(mut reader: R, tx: mpsc::UnboundedSender<Message>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.try_parse() {
                Ok(Some(value)) => {
                    if let Ok(msg) = serde_json::from_value::<Message>(value) {
                        if tx.send(msg).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
}
