//! TCP/TLS accept loops and per-connection command pumps.
//!
//! Each listener runs an accept loop; every accepted connection gets its
//! own task. Three deadlines protect the server: an idle timeout while
//! waiting between commands, a read timeout once a command has started
//! arriving (slowloris), and a write timeout around each reply flush.
//! Shutdown stops the accept loops and then waits for in-flight
//! connections to drain.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use tokmesh_engine::SessionEngine;

use crate::auth::Keyring;
use crate::codec::{read_command, read_first_byte, ProtocolError, RespWriter};
use crate::conn::ConnState;
use crate::dispatch::{Action, Dispatcher};

/// RESP server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Enable the plaintext listener.
    pub plain_enabled: bool,
    /// Plaintext bind address.
    pub plain_address: String,
    /// Enable the TLS listener.
    pub tls_enabled: bool,
    /// TLS bind address.
    pub tls_address: String,
    /// TLS parameters; required when `tls_enabled`.
    pub tls_config: Option<Arc<rustls::ServerConfig>>,
    /// Bound on how long one command may take to arrive after its first byte.
    pub read_timeout: Duration,
    /// Bound on each reply flush.
    pub write_timeout: Duration,
    /// Bound on the quiet gap between commands.
    pub idle_timeout: Duration,
    /// Token-bucket refill rate (and capacity) per remote IP.
    pub rate_limit: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            plain_enabled: true,
            plain_address: "127.0.0.1:6379".to_string(),
            tls_enabled: false,
            tls_address: "127.0.0.1:6380".to_string(),
            tls_config: None,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            rate_limit: 1000,
        }
    }
}

impl ServerConfig {
    /// Plaintext on an ephemeral port, for tests.
    pub fn for_testing() -> Self {
        ServerConfig {
            plain_address: "127.0.0.1:0".to_string(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy)]
struct Deadlines {
    read: Duration,
    write: Duration,
    idle: Duration,
}

/// The RESP front-end, ready to start.
pub struct RespServer {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

/// Control handle of a running server.
pub struct ServerHandle {
    plain_addr: Option<SocketAddr>,
    tls_addr: Option<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    task: tokio::task::JoinHandle<io::Result<()>>,
}

impl ServerHandle {
    /// Bound plaintext address, when that listener is enabled.
    pub fn plain_addr(&self) -> Option<SocketAddr> {
        self.plain_addr
    }

    /// Bound TLS address, when that listener is enabled.
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// Stop accepting, drain in-flight connections, and return the first
    /// accept-loop error if any occurred.
    pub async fn shutdown(self) -> io::Result<()> {
        let _ = self.shutdown_tx.send(true);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        }
    }
}

impl RespServer {
    /// Wire the server onto a shared engine and keyring.
    pub fn new(config: ServerConfig, engine: Arc<SessionEngine>, keyring: Arc<Keyring>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(engine, keyring, config.rate_limit));
        RespServer { config, dispatcher }
    }

    /// Bind the configured listeners and start serving.
    pub async fn start(self) -> io::Result<ServerHandle> {
        let plain = if self.config.plain_enabled {
            Some(TcpListener::bind(&self.config.plain_address).await?)
        } else {
            None
        };
        let tls = if self.config.tls_enabled {
            let tls_config = self.config.tls_config.clone().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "tls enabled without tls_config")
            })?;
            let listener = TcpListener::bind(&self.config.tls_address).await?;
            Some((listener, TlsAcceptor::from(tls_config)))
        } else {
            None
        };

        let plain_addr = plain.as_ref().map(|l| l.local_addr()).transpose()?;
        let tls_addr = tls.as_ref().map(|(l, _)| l.local_addr()).transpose()?;
        if let Some(addr) = plain_addr {
            info!(target: "tokmesh::server", %addr, "listening (plaintext)");
        }
        if let Some(addr) = tls_addr {
            info!(target: "tokmesh::server", %addr, "listening (tls)");
        }

        let deadlines = Deadlines {
            read: self.config.read_timeout,
            write: self.config.write_timeout,
            idle: self.config.idle_timeout,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loops(plain, tls, self.dispatcher, deadlines, shutdown_rx));

        Ok(ServerHandle {
            plain_addr,
            tls_addr,
            shutdown_tx,
            task,
        })
    }
}

async fn run_loops(
    plain: Option<TcpListener>,
    tls: Option<(TcpListener, TlsAcceptor)>,
    dispatcher: Arc<Dispatcher>,
    deadlines: Deadlines,
    mut shutdown_rx: watch::Receiver<bool>,
) -> io::Result<()> {
    let mut conns: JoinSet<()> = JoinSet::new();
    let mut first_error: Option<io::Error> = None;

    loop {
        tokio::select! {
            accepted = accept_on(&plain) => match accepted {
                Ok((stream, peer)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    conns.spawn(async move {
                        handle_connection(stream, peer, dispatcher, deadlines).await;
                    });
                }
                Err(e) => {
                    warn!(target: "tokmesh::server", error = %e, "plaintext accept failed");
                    first_error.get_or_insert(e);
                    break;
                }
            },
            accepted = accept_tls_on(&tls) => match accepted {
                Ok((stream, peer, acceptor)) => {
                    let dispatcher = Arc::clone(&dispatcher);
                    conns.spawn(async move {
                        // Handshake inside the task so a slow peer cannot
                        // stall the accept loop.
                        match acceptor.accept(stream).await {
                            Ok(stream) => {
                                handle_connection(stream, peer, dispatcher, deadlines).await
                            }
                            Err(e) => {
                                debug!(target: "tokmesh::server", %peer, error = %e, "tls handshake failed")
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(target: "tokmesh::server", error = %e, "tls accept failed");
                    first_error.get_or_insert(e);
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    // New connections stop here; in-flight commands complete.
    drop(plain);
    drop(tls);
    while conns.join_next().await.is_some() {}

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn accept_on(listener: &Option<TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn accept_tls_on(
    listener: &Option<(TcpListener, TlsAcceptor)>,
) -> io::Result<(TcpStream, SocketAddr, TlsAcceptor)> {
    match listener {
        Some((listener, acceptor)) => {
            let (stream, peer) = listener.accept().await?;
            Ok((stream, peer, acceptor.clone()))
        }
        None => std::future::pending().await,
    }
}

async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    deadlines: Deadlines,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);
    let mut conn = ConnState::new(peer.ip().to_string());
    debug!(target: "tokmesh::server", %peer, "connection open");

    loop {
        // Idle wait for the next command's first byte.
        let first = match timeout(deadlines.idle, read_first_byte(&mut reader)).await {
            Err(_) => {
                debug!(target: "tokmesh::server", %peer, "idle timeout");
                break;
            }
            Ok(Err(ProtocolError::Closed)) => break,
            Ok(Err(_)) => break,
            Ok(Ok(byte)) => byte,
        };

        // The rest of the command is bounded by the read deadline.
        let parsed = match timeout(deadlines.read, read_command(&mut reader, first)).await {
            Err(_) => {
                let _ = write_error(
                    &mut write_half,
                    deadlines.write,
                    "ERR protocol error: read timed out",
                )
                .await;
                break;
            }
            Ok(parsed) => parsed,
        };

        let argv = match parsed {
            Ok(Some(argv)) => argv,
            Ok(None) => continue,
            Err(e @ ProtocolError::LimitExceeded(_)) => {
                let _ = write_error(
                    &mut write_half,
                    deadlines.write,
                    &format!("ERR protocol error: {}", e),
                )
                .await;
                break;
            }
            Err(ProtocolError::Malformed(detail)) => {
                if write_error(
                    &mut write_half,
                    deadlines.write,
                    &format!("ERR protocol error: {}", detail),
                )
                .await
                .is_err()
                {
                    break;
                }
                continue;
            }
            Err(_) => break,
        };

        let mut out = RespWriter::new();
        let action = dispatcher.dispatch(&mut conn, &argv, &mut out);
        if write_all(&mut write_half, deadlines.write, out.as_bytes())
            .await
            .is_err()
        {
            break;
        }
        if action == Action::Close {
            break;
        }
    }
    debug!(target: "tokmesh::server", %peer, "connection closed");
}

async fn write_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    deadline: Duration,
    message: &str,
) -> io::Result<()> {
    let mut out = RespWriter::new();
    out.error(message);
    write_all(writer, deadline, out.as_bytes()).await
}

async fn write_all<W: AsyncWrite + Unpin>(
    writer: &mut W,
    deadline: Duration,
    bytes: &[u8],
) -> io::Result<()> {
    timeout(deadline, async {
        writer.write_all(bytes).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKey;
    use crate::conn::Role;
    use tokio::io::AsyncReadExt;
    use tokmesh_engine::EngineConfig;

    async fn start_server() -> (ServerHandle, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let engine = SessionEngine::new(EngineConfig::for_testing(dir.path())).unwrap();
        let keyring = Arc::new(Keyring::new([ApiKey::new(
            "ops",
            "secret",
            Role::Admin,
            "operations",
        )]));
        let server = RespServer::new(ServerConfig::for_testing(), engine, keyring);
        (server.start().await.unwrap(), dir)
    }

    async fn send_recv(stream: &mut TcpStream, cmd: &str, expect_len: usize) -> Vec<u8> {
        stream.write_all(cmd.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; expect_len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_over_tcp() {
        let (handle, _dir) = start_server().await;
        let mut stream = TcpStream::connect(handle.plain_addr().unwrap()).await.unwrap();

        let reply = send_recv(&mut stream, "*1\r\n$4\r\nPING\r\n", 7).await;
        assert_eq!(reply, b"+PONG\r\n");

        // Inline form too.
        let reply = send_recv(&mut stream, "PING hello\r\n", 11).await;
        assert_eq!(reply, b"$5\r\nhello\r\n");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_noauth_then_auth() {
        let (handle, _dir) = start_server().await;
        let mut stream = TcpStream::connect(handle.plain_addr().unwrap()).await.unwrap();

        let expected = b"-NOAUTH Authentication required\r\n";
        let reply = send_recv(
            &mut stream,
            "*2\r\n$6\r\nEXISTS\r\n$4\r\nsome\r\n",
            expected.len(),
        )
        .await;
        assert_eq!(reply, expected);

        let reply = send_recv(&mut stream, "AUTH ops secret\r\n", 5).await;
        assert_eq!(reply, b"+OK\r\n");

        let reply = send_recv(&mut stream, "EXISTS some\r\n", 4).await;
        assert_eq!(reply, b":0\r\n");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (handle, _dir) = start_server().await;
        let mut stream = TcpStream::connect(handle.plain_addr().unwrap()).await.unwrap();

        let reply = send_recv(&mut stream, "QUIT\r\n", 5).await;
        assert_eq!(reply, b"+OK\r\n");

        // Server closes: next read returns EOF.
        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_limit_violation_closes_connection() {
        let (handle, _dir) = start_server().await;
        let mut stream = TcpStream::connect(handle.plain_addr().unwrap()).await.unwrap();

        stream.write_all(b"*2000\r\n").await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        let text = String::from_utf8_lossy(&reply);
        assert!(text.starts_with("-ERR protocol error:"), "{}", text);
        // read_to_end returning means the server closed the connection.

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_keeps_connection() {
        let (handle, _dir) = start_server().await;
        let mut stream = TcpStream::connect(handle.plain_addr().unwrap()).await.unwrap();

        stream.write_all(b"*x\r\n").await.unwrap();
        let mut buf = vec![0u8; 22];
        stream.read_exact(&mut buf).await.unwrap();
        assert!(buf.starts_with(b"-ERR protocol error:"));

        // Still alive.
        let mut rest = Vec::new();
        loop {
            let mut b = [0u8; 1];
            stream.read_exact(&mut b).await.unwrap();
            rest.push(b[0]);
            if rest.ends_with(b"\r\n") {
                break;
            }
        }
        let reply = send_recv(&mut stream, "PING\r\n", 7).await;
        assert_eq!(reply, b"+PONG\r\n");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_connections() {
        let (handle, _dir) = start_server().await;
        let addr = handle.plain_addr().unwrap();
        handle.shutdown().await.unwrap();

        // After shutdown the listener is gone; either the connect fails or
        // the accepted socket is immediately closed.
        match TcpStream::connect(addr).await {
            Err(_) => {}
            Ok(mut stream) => {
                let mut buf = [0u8; 1];
                assert_eq!(stream.read(&mut buf).await.unwrap_or(0), 0);
            }
        }
    }
}
