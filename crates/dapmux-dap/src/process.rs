//! Adapter process management.
//!
//! Spawns the debug adapter with piped stdio and builds the primary
//! [`DapConnection`] over the requested transport. Stdio adapters talk DAP
//! on stdout/stdin directly; TCP adapters announce a listen address on
//! stderr/stdout which is scraped before connecting. In both modes adapter
//! stderr keeps flowing upward as synthetic `output` events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, Duration, Instant};

use crate::connection::DapConnection;
use crate::error::DapError;
use crate::protocol::Event;

/// How the adapter expects to be spoken to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// DAP over the adapter's stdin/stdout.
    Stdio,
    /// The adapter listens on a TCP port announced on startup.
    Tcp,
}

/// The command line and transport for launching a debug adapter.
#[derive(Debug, Clone)]
pub struct AdapterCommand {
    /// Executable to run.
    pub command: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Transport mode.
    pub mode: TransportMode,
}

/// A running adapter process.
///
/// The child is owned by a watcher task; the handle can kill it and observe
/// its exit. Dropping the handle kills the process.
#[derive(Debug)]
pub struct AdapterProcess {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited_rx: watch::Receiver<Option<i32>>,
    tcp_addr: Option<(String, u16)>,
}

impl AdapterProcess {
    /// Spawn the adapter and establish the primary connection. Requests
    /// on that connection default to `request_timeout`.
    pub async fn spawn(
        cmd: &AdapterCommand,
        scrape_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<(Self, Arc<DapConnection>), DapError> {
        let mut command = Command::new(&cmd.command);
        command
            .args(&cmd.args)
            .envs(&cmd.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::info!(command = %cmd.command, pid, "spawned debug adapter");

        match cmd.mode {
            TransportMode::Stdio => Self::connect_stdio(child, pid, request_timeout),
            TransportMode::Tcp => {
                Self::connect_tcp(child, pid, scrape_timeout, request_timeout).await
            }
        }
    }

    fn connect_stdio(
        mut child: Child,
        pid: Option<u32>,
        request_timeout: Duration,
    ) -> Result<(Self, Arc<DapConnection>), DapError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DapError::Transport("could not capture adapter stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DapError::Transport("could not capture adapter stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DapError::Transport("could not capture adapter stderr".into()))?;

        let conn = Arc::new(DapConnection::with_timeout(stdout, stdin, request_timeout));
        spawn_stderr_forwarder(stderr, conn.clone());

        let (kill_tx, exited_rx) = spawn_exit_watcher(child);
        Ok((
            Self {
                pid,
                kill_tx: Some(kill_tx),
                exited_rx,
                tcp_addr: None,
            },
            conn,
        ))
    }

    async fn connect_tcp(
        mut child: Child,
        pid: Option<u32>,
        scrape_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<(Self, Arc<DapConnection>), DapError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DapError::Transport("could not capture adapter stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DapError::Transport("could not capture adapter stderr".into()))?;

        // Pump both output streams into one line channel; the scrape reads
        // from it first, then everything later is forwarded as events.
        let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
        spawn_line_pump(stdout, line_tx.clone());
        spawn_line_pump(stderr, line_tx);

        let deadline = Instant::now() + scrape_timeout;
        let addr = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                child.start_kill().ok();
                return Err(DapError::NoListenAddress(scrape_timeout.as_millis() as u64));
            }
            match timeout(remaining, line_rx.recv()).await {
                Ok(Some(line)) => {
                    tracing::debug!(%line, "adapter startup output");
                    if let Some(addr) = parse_listen_line(&line) {
                        break addr;
                    }
                }
                Ok(None) => {
                    child.start_kill().ok();
                    return Err(DapError::Transport(
                        "adapter exited before announcing a listen address".into(),
                    ));
                }
                Err(_) => {
                    child.start_kill().ok();
                    return Err(DapError::NoListenAddress(scrape_timeout.as_millis() as u64));
                }
            }
        };

        let (host, port) = addr;
        let connect_host = if host == "0.0.0.0" {
            "127.0.0.1"
        } else {
            host.as_str()
        };
        tracing::info!(%host, port, "connecting to adapter DAP port");
        let stream = TcpStream::connect((connect_host, port))
            .await
            .map_err(|e| DapError::Transport(format!("tcp connect to {host}:{port}: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(DapConnection::with_timeout(
            read_half,
            write_half,
            request_timeout,
        ));

        // Keep forwarding later adapter output as synthetic events.
        let fwd_conn = conn.clone();
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                fwd_conn
                    .inject_event(output_event("stderr", format!("{line}\n")))
                    .await;
            }
        });

        let (kill_tx, exited_rx) = spawn_exit_watcher(child);
        Ok((
            Self {
                pid,
                kill_tx: Some(kill_tx),
                exited_rx,
                tcp_addr: Some((host, port)),
            },
            conn,
        ))
    }

    /// OS process id, when still known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The scraped DAP listen address, for adapters in TCP mode. Child
    /// sessions open additional connections to the same address.
    pub fn tcp_addr(&self) -> Option<(String, u16)> {
        self.tcp_addr.clone()
    }

    /// Watch the adapter's exit; the value becomes `Some(code)` once.
    pub fn exited(&self) -> watch::Receiver<Option<i32>> {
        self.exited_rx.clone()
    }

    /// Whether the adapter has exited.
    pub fn has_exited(&self) -> bool {
        self.exited_rx.borrow().is_some()
    }

    /// Kill the adapter process. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Open one more TCP connection to an adapter's announced address. Used by
/// the multi-session router to claim child targets.
pub async fn connect_child(
    host: &str,
    port: u16,
    request_timeout: Duration,
) -> Result<Arc<DapConnection>, DapError> {
    let connect_host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    let stream = TcpStream::connect((connect_host, port))
        .await
        .map_err(|e| DapError::Transport(format!("tcp connect to {host}:{port}: {e}")))?;
    let (read_half, write_half) = stream.into_split();
    Ok(Arc::new(DapConnection::with_timeout(
        read_half,
        write_half,
        request_timeout,
    )))
}

/// Match a `listening at <host>:<port>` announcement, case-insensitively.
/// Covers dlv ("DAP server listening at: 127.0.0.1:38697") and
/// vscode-js-debug ("Debug server listening at 127.0.0.1:8123").
fn parse_listen_line(line: &str) -> Option<(String, u16)> {
    static LISTEN_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
        Regex::new(r"(?i)listening\s+at[:\s]+([^\s:]+):(\d+)").expect("static pattern")
    });
    let caps = LISTEN_RE.captures(line)?;
    let host = caps.get(1)?.as_str().to_string();
    let port = caps.get(2)?.as_str().parse::<u16>().ok()?;
    Some((host, port))
}

fn output_event(category: &str, output: String) -> Event {
    Event {
        seq: 0,
        event: "output".into(),
        body: Some(serde_json::json!({
            "category": category,
            "output": output,
        })),
    }
}

fn spawn_stderr_forwarder<R>(stderr: R, conn: Arc<DapConnection>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            conn.inject_event(output_event("stderr", format!("{line}\n")))
                .await;
        }
    });
}

fn spawn_line_pump<R>(stream: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Hand the child to a watcher task that reports its exit code and carries
/// out kill requests. Dropping the kill sender also kills the child.
fn spawn_exit_watcher(mut child: Child) -> (oneshot::Sender<()>, watch::Receiver<Option<i32>>) {
    let (kill_tx, kill_rx) = oneshot::channel::<()>();
    let (exited_tx, exited_rx) = watch::channel(None);

    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                let code = status.ok().and_then(|s| s.code());
                tracing::info!(?code, "debug adapter exited");
                let _ = exited_tx.send(Some(code.unwrap_or(-1)));
            }
            _ = kill_rx => {
                child.start_kill().ok();
                let status = child.wait().await;
                let code = status.ok().and_then(|s| s.code());
                tracing::info!(?code, "debug adapter killed");
                let _ = exited_tx.send(Some(code.unwrap_or(-1)));
            }
        }
    });

    (kill_tx, exited_rx)
}
