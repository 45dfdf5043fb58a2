//! TCP connection handler
//!
//! Handles individual client connections: line framing, frame dispatch to
//! the shared `ChatServer`, and a dedicated writer task draining the
//! connection's outbound queue.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::Connection;
use crate::config::ServerConfig;
use crate::error::{AppError, ProtocolError};
use crate::message::{decode_line, ClientFrame, Line, ServerFrame};
use crate::server::ChatServer;
use crate::types::ClientId;

/// Why a connection's read loop stopped
#[derive(Debug)]
enum Exit {
    /// Peer closed the socket
    Eof,
    /// `[DISCONNECT]` received
    Requested,
    /// Server shutting down
    Shutdown,
    /// Writer task is gone (write failure or timeout)
    WriterClosed,
    /// A room could not queue a line for this connection
    Evicted,
    /// No frame within the socket timeout
    TimedOut,
    /// Read failure
    Failed(std::io::Error),
}

/// Serve one admitted TCP connection until it ends
///
/// Cleanup runs exactly once whichever way the loop ends, after which both
/// socket halves are dropped. Lines that are not valid UTF-8 are logged and
/// skipped. Timeouts and I/O failures are returned so the caller can log
/// them; they never affect other connections.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    client_id: ClientId,
    server: Arc<ChatServer>,
    config: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AppError> {
    info!("Client {} connected from {}", client_id, peer);

    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    // Survives a cancelled read so a partial line is never lost.
    let mut buf = Vec::new();

    // Channel for server -> client lines
    let (line_tx, line_rx) = mpsc::channel::<Line>(config.outbound_buffer);
    let liveness = line_tx.clone();
    let mut conn = Connection::new(client_id, line_tx);
    let evicted = conn.eviction();

    let write_task = WriterTask(tokio::spawn(write_lines(
        writer,
        line_rx,
        config.socket_timeout,
        client_id,
    )));

    let shutting_down = *shutdown.borrow();
    let exit = if shutting_down {
        Exit::Shutdown
    } else {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break Exit::Shutdown,
                _ = liveness.closed() => break Exit::WriterClosed,
                _ = evicted.notified() => break Exit::Evicted,
                read = timeout(config.socket_timeout, reader.read_until(b'\n', &mut buf)) => match read {
                    Err(_) => break Exit::TimedOut,
                    Ok(Err(e)) => break Exit::Failed(e),
                    Ok(Ok(0)) => break Exit::Eof,
                    Ok(Ok(_)) => {
                        match decode_line(&buf).and_then(ClientFrame::parse) {
                            Ok(ClientFrame::Disconnect) => break Exit::Requested,
                            Ok(frame) => {
                                debug!("Received from {}: {:?}", conn.display_name(), frame);
                                server.handle_frame(&mut conn, frame).await;
                            }
                            Err(ProtocolError::Empty) => {}
                            Err(e) => warn!("Dropping frame from {}: {}", client_id, e),
                        }
                        buf.clear();
                    }
                },
            }
        }
    };

    server.disconnect(&mut conn);
    let name = conn.display_name().to_string();
    drop(conn);
    drop(liveness);

    // Every sender is gone now, so the writer flushes what is queued and
    // exits. Shutdown does not wait for the flush.
    let flush_limit = match exit {
        Exit::Shutdown => Duration::ZERO,
        _ => config.socket_timeout,
    };
    write_task.finish(flush_limit).await;

    match exit {
        Exit::Eof => info!("Client {} ({}) closed the connection", client_id, name),
        Exit::Requested => info!("Client {} ({}) requested disconnect", client_id, name),
        Exit::Shutdown => info!("Client {} ({}) closed by server shutdown", client_id, name),
        Exit::WriterClosed => info!("Client {} ({}) disconnected unexpectedly", client_id, name),
        Exit::Evicted => warn!("Client {} ({}) removed after a failed delivery", client_id, name),
        Exit::TimedOut => return Err(AppError::ReadTimeout(config.socket_timeout)),
        Exit::Failed(e) => return Err(AppError::Connection(e)),
    }
    Ok(())
}

/// Handle to a connection's writer task
///
/// Aborts the task when dropped, so a handler cancelled mid-drain does not
/// leave the write half open.
struct WriterTask(JoinHandle<()>);

impl WriterTask {
    /// Wait for the writer to finish, aborting it after `limit`
    async fn finish(mut self, limit: Duration) {
        if timeout(limit, &mut self.0).await.is_err() {
            self.0.abort();
            let _ = (&mut self.0).await;
        }
    }
}

impl Drop for WriterTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drain the outbound queue into the socket, one line per write
async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut line_rx: mpsc::Receiver<Line>,
    write_timeout: Duration,
    client_id: ClientId,
) {
    while let Some(line) = line_rx.recv().await {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(&line);
        frame.push('\n');
        match timeout(write_timeout, writer.write_all(frame.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write to {} failed: {}", client_id, e);
                break;
            }
            Err(_) => {
                debug!("Write to {} timed out", client_id);
                break;
            }
        }
    }
    debug!("Write task ended for {}", client_id);

    let _ = writer.shutdown().await;
}

/// Send a single `[ERROR] <reason>` line and close the socket
pub async fn reject(mut stream: TcpStream, reason: &str, write_timeout: Duration) -> Result<(), AppError> {
    let frame = format!("{}\n", ServerFrame::Error(reason.to_string()));
    match timeout(write_timeout, stream.write_all(frame.as_bytes())).await {
        Ok(result) => result?,
        Err(_) => debug!("Rejection notice timed out"),
    }
    stream.shutdown().await?;
    Ok(())
}
