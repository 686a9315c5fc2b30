use crate::metrics::{CLIENTS_CONNECTED, READ_REQUESTS, UNKNOWN_FAN};
use crate::protocol::{respond, ErrorKind, ErrorMsg, Response};
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tach_core::SpeedBoard;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Longest request line a client may send, newline included.
pub const MAX_REQUEST_LINE: usize = 1024;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener setup failed: {0}")]
    Setup(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub max_clients: usize,
    /// How often idle connections re-check the stop flag.
    pub poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7100".to_string(),
            max_clients: 16,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// TCP front end of the Reading Interface.
pub struct ReadServer {
    listener: TcpListener,
    config: ServerConfig,
}

impl ReadServer {
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener =
            TcpListener::bind(&config.bind_addr).map_err(|source| ServerError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve clients until `stop` is set, then wait for their threads.
    pub fn run(self, board: SpeedBoard, stop: Arc<AtomicBool>) {
        info!(
            addr = %self.config.bind_addr,
            fans = board.len(),
            "Read server listening"
        );

        let active = Arc::new(AtomicUsize::new(0));
        let mut clients: Vec<JoinHandle<()>> = Vec::new();

        while !stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if active.load(Ordering::Relaxed) >= self.config.max_clients {
                        warn!(client_addr = %addr, "Too many read clients, refusing");
                        drop(stream);
                        continue;
                    }
                    info!(client_addr = %addr, "Read client connected");
                    active.fetch_add(1, Ordering::Relaxed);
                    CLIENTS_CONNECTED.inc();

                    let board = board.clone();
                    let stop = Arc::clone(&stop);
                    let active_client = Arc::clone(&active);
                    let poll = self.config.poll_interval;
                    let spawned = thread::Builder::new()
                        .name(format!("read-client-{addr}"))
                        .spawn(move || {
                            if let Err(err) = serve_client(stream, addr, &board, &stop, poll) {
                                warn!(client_addr = %addr, error = %err, "Read client error");
                            }
                            active_client.fetch_sub(1, Ordering::Relaxed);
                            CLIENTS_CONNECTED.dec();
                        });
                    match spawned {
                        Ok(handle) => clients.push(handle),
                        Err(err) => {
                            warn!(error = %err, "Failed to spawn read client thread");
                            active.fetch_sub(1, Ordering::Relaxed);
                            CLIENTS_CONNECTED.dec();
                        }
                    }
                }
                Err(err) if err.kind() == IoErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(err) => {
                    warn!("Read server accept error: {}", err);
                    thread::sleep(Duration::from_millis(5));
                }
            }
            clients.retain(|h| !h.is_finished());
        }

        for handle in clients {
            let _ = handle.join();
        }
        info!("Read server stopped");
    }
}

#[instrument(skip_all, fields(client = %addr))]
fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    board: &SpeedBoard,
    stop: &AtomicBool,
    poll: Duration,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(poll))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        let budget = (MAX_REQUEST_LINE + 1).saturating_sub(line.len()) as u64;
        match reader.by_ref().take(budget).read_line(&mut line) {
            Ok(_) if line.len() > MAX_REQUEST_LINE => {
                warn!(len = line.len(), "Request line too long, dropping client");
                let response = Response::Error(ErrorMsg::new(
                    ErrorKind::BadRequest,
                    None,
                    format!("request line exceeds {MAX_REQUEST_LINE} bytes"),
                ));
                let mut out = response.to_line();
                out.push('\n');
                writer.write_all(out.as_bytes())?;
                return Ok(());
            }
            Ok(0) => {
                info!("Read client disconnected");
                return Ok(());
            }
            Ok(_) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    let response = respond(board, trimmed);
                    READ_REQUESTS.inc();
                    if response.error_kind() == Some(ErrorKind::UnknownFan) {
                        UNKNOWN_FAN.inc();
                    }
                    debug!(request = trimmed, "Read request served");
                    let mut out = response.to_line();
                    out.push('\n');
                    writer.write_all(out.as_bytes())?;
                }
                line.clear();
            }
            Err(err)
                if matches!(err.kind(), IoErrorKind::WouldBlock | IoErrorKind::TimedOut) =>
            {
                // Partial lines stay buffered in `line` until the newline arrives.
            }
            Err(err) => return Err(err),
        }
    }
}
