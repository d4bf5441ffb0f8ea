//! Connection Handler
//!
//! Each client gets its own task running a strictly sequential loop:
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Read one frame              │◄──┐
//!    │  Execute command             │   │
//!    │  Write + flush the reply     │───┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. Clean EOF, I/O error or decode error
//!        │
//!        ▼
//! 4. Handler task ends
//! ```
//!
//! Frame N+1 is not executed until the reply to frame N has been flushed, so
//! replies leave in request order. A decode error ends this connection only;
//! the store and every other connection are unaffected.

use crate::commands::CommandHandler;
use crate::protocol::{DecodeError, FrameReader, RespValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tracing::{debug, info, trace, warn};

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Connections closed because of a malformed frame
    pub decode_errors: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Malformed or truncated frame
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Writing a reply failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectionError {
    /// True when the peer simply went away.
    fn is_disconnect(&self) -> bool {
        let io_err = match self {
            ConnectionError::Io(e) | ConnectionError::Decode(DecodeError::Io(e)) => e,
            _ => return false,
        };
        matches!(
            io_err.kind(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe
        )
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: BufWriter<WriteHalf<S>>,

    /// Client's address (for logging)
    addr: SocketAddr,

    command_handler: CommandHandler,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection handler.
    ///
    /// # Arguments
    ///
    /// * `stream` - The byte stream for this connection
    /// * `addr` - The client's socket address
    /// * `command_handler` - The command handler for executing commands
    /// * `stats` - Shared connection statistics
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            command_handler,
            stats,
        }
    }

    /// Runs the connection until the client disconnects or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(e) if e.is_disconnect() => {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(e @ ConnectionError::Decode(_)) => {
                self.stats.decode_error();
                warn!(client = %self.addr, error = %e, "Closing connection after decode error")
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    /// The read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        while let Some(request) = self.reader.read_frame().await? {
            trace!(client = %self.addr, request = %request, "Received frame");

            let response = self.command_handler.execute(request);
            self.stats.command_processed();

            self.send_response(&response).await?;
        }

        Ok(())
    }

    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Creates a [`ConnectionHandler`] and runs it to completion.
///
/// Errors are already logged by the handler, so they are dropped here.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    let _ = handler.run().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{timeout, Duration};

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    /// Reads exactly `expected.len()` bytes and compares them.
    async fn expect_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(
            buf,
            expected,
            "got {:?}",
            String::from_utf8_lossy(&buf)
        );
    }

    /// Asserts the server closed the connection.
    async fn expect_closed(client: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect_reply(&mut client, b"$4\r\nPONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$4\r\nAriz\r\n").await;
    }

    #[tokio::test]
    async fn test_replies_in_request_order() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$2\r\nk1\r\n$2\r\nv1\r\n*3\r\n$3\r\nSET\r\n$2\r\nk2\r\n$2\r\nv2\r\n*2\r\n$3\r\nGET\r\n$2\r\nk1\r\n*2\r\n$3\r\nGET\r\n$2\r\nk2\r\n*1\r\n$3\r\nFOO\r\n")
            .await
            .unwrap();

        expect_reply(
            &mut client,
            b"+OK\r\n+OK\r\n$2\r\nv1\r\n$2\r\nv2\r\n-Unsupported command: FOO\r\n",
        )
        .await;
    }

    #[tokio::test]
    async fn test_command_error_keeps_connection_open() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$4\r\nsoon\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"-");
        let mut line = Vec::new();
        while !line.ends_with(b"\r\n") {
            client.read_exact(&mut buf).await.unwrap();
            line.push(buf[0]);
        }

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        expect_reply(&mut client, b"$4\r\nPONG\r\n").await;
    }

    #[tokio::test]
    async fn test_decode_error_closes_only_that_connection() {
        let (addr, storage, stats) = create_test_server().await;

        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
            .await
            .unwrap();
        expect_reply(&mut good, b"+OK\r\n").await;

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(b"!garbage\r\n").await.unwrap();
        expect_closed(&mut bad).await;

        let mut also_bad = TcpStream::connect(addr).await.unwrap();
        also_bad.write_all(b"*1\r\n$x\r\n").await.unwrap();
        expect_closed(&mut also_bad).await;

        good.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        expect_reply(&mut good, b"$1\r\nv\r\n").await;

        assert_eq!(storage.len(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.decode_errors.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_binary_values_survive_round_trip() {
        let (addr, _, _) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nbin\r\n$6\r\n\r\n\x00\xff\r\n\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nbin\r\n")
            .await
            .unwrap();
        expect_reply(&mut client, b"$6\r\n\r\n\x00\xff\r\n\r\n").await;
    }

    #[tokio::test]
    async fn test_concurrent_clients() {
        let (addr, _, _) = create_test_server().await;

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                tokio::spawn(async move {
                    let mut client = TcpStream::connect(addr).await.unwrap();
                    let key = format!("key{:02}", i);
                    let value = format!("value{:02}", i);
                    let set = RespValue::array(vec![
                        RespValue::bulk_string("SET"),
                        RespValue::bulk_string(key.clone()),
                        RespValue::bulk_string(value.clone()),
                    ]);
                    client.write_all(&set.serialize()).await.unwrap();
                    expect_reply(&mut client, b"+OK\r\n").await;

                    let get = RespValue::array(vec![
                        RespValue::bulk_string("GET"),
                        RespValue::bulk_string(key),
                    ]);
                    client.write_all(&get.serialize()).await.unwrap();
                    expect_reply(&mut client, &RespValue::bulk_string(value).serialize()).await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_in_memory_stream() {
        let (client, server) = tokio::io::duplex(1024);
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let handler = ConnectionHandler::new(
            server,
            addr,
            CommandHandler::new(Arc::clone(&storage)),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(handler.run());

        let (mut rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n").await.unwrap();
        let mut buf = [0u8; 9];
        rx.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"$3\r\nhey\r\n");

        tx.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());

        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 9);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_truncated_frame_is_decode_error() {
        let (client, server) = tokio::io::duplex(1024);
        let stats = Arc::new(ConnectionStats::new());
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let handler = ConnectionHandler::new(
            server,
            addr,
            CommandHandler::new(Arc::new(StorageEngine::new())),
            Arc::clone(&stats),
        );
        let task = tokio::spawn(handler.run());

        let (_rx, mut tx) = tokio::io::split(client);
        tx.write_all(b"*2\r\n$4\r\nECHO\r\n").await.unwrap();
        tx.shutdown().await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::Decode(DecodeError::UnexpectedEof { .. }))
        ));
        assert_eq!(stats.decode_errors.load(Ordering::Relaxed), 1);
    }
}
