//! Stream connection to the servo server
//!
//! A [`Connection`] owns the two halves of the transport and performs the
//! password handshake before any command is accepted:
//!
//! ```text
//! client                              server
//!   | AUTHENTICATE(param1 = pw len)  ->  |
//!   | <- SUCCESS                         |   otherwise: HostRejected
//!   | raw password bytes (unframed)  ->  |   only when a password is set
//!   | <- SUCCESS                         |   otherwise: InvalidPassword
//! ```
//!
//! After the handshake every frame is exactly [`FRAME_LEN`] bytes. Commands
//! are fire-and-forget; the server only answers during the handshake.

use crate::error::RcError;
use log::{debug, info, trace, warn};
use shared::{decode, encode, Instruction, Message, FRAME_LEN};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;

/// Connection shared between the session façade and the control dispatcher
pub type SharedConnection = Arc<Mutex<Connection>>;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

pub struct Connection {
    reader: Option<Reader>,
    writer: Option<Writer>,
    state: ConnectionState,
}

impl Connection {
    pub fn new() -> Self {
        Self {
            reader: None,
            writer: None,
            state: ConnectionState::Disconnected,
        }
    }

    /// Wraps the connection for sharing with a dispatcher
    pub fn shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self))
    }

    /// Opens a TCP connection and authenticates with the server
    ///
    /// `timeout` bounds the socket connect step only; the handshake reads
    /// block until the server answers. Any failure after the socket opened
    /// closes it again before the error is returned.
    pub async fn connect(
        &mut self,
        address: &str,
        port: u16,
        password: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<(), RcError> {
        if self.is_connected() {
            return Err(RcError::IllegalState("already connected"));
        }

        info!("Connecting to {}:{}", address, port);
        self.state = ConnectionState::Connecting;

        let stream = match open_stream(address, port, timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle's algorithm: {}", e);
        }

        let (reader, writer) = stream.into_split();
        self.authenticate(Box::new(reader), Box::new(writer), password)
            .await
    }

    /// Authenticates over an already-open byte stream
    pub async fn attach<S>(&mut self, stream: S, password: Option<&[u8]>) -> Result<(), RcError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        if self.is_connected() {
            return Err(RcError::IllegalState("already connected"));
        }

        let (reader, writer) = tokio::io::split(stream);
        self.authenticate(Box::new(reader), Box::new(writer), password)
            .await
    }

    async fn authenticate(
        &mut self,
        reader: Reader,
        writer: Writer,
        password: Option<&[u8]>,
    ) -> Result<(), RcError> {
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.state = ConnectionState::Authenticating;

        match self.handshake(password).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!("Authenticated with server");
                Ok(())
            }
            Err(e) => {
                warn!("Handshake failed: {}", e);
                self.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&mut self, password: Option<&[u8]>) -> Result<(), RcError> {
        let password = password.filter(|password| !password.is_empty());
        let password_len = i32::try_from(password.map_or(0, <[u8]>::len))
            .map_err(|_| RcError::IllegalState("password too long"))?;

        self.send(&Message::with_param(Instruction::Authenticate, password_len))
            .await?;

        let reply = self.receive().await?;
        if reply.instruction != Instruction::Success {
            debug!("Authentication request answered with {:?}", reply.instruction);
            return Err(RcError::HostRejected);
        }

        if let Some(password) = password {
            self.write_raw(password).await?;
        }

        let reply = self.receive().await?;
        if reply.instruction != Instruction::Success {
            debug!("Password answered with {:?}", reply.instruction);
            return Err(RcError::InvalidPassword);
        }

        Ok(())
    }

    /// Encodes and writes a single frame
    pub async fn send(&mut self, message: &Message) -> Result<(), RcError> {
        let frame = encode(message)?;
        self.write_raw(&frame).await?;
        trace!("Sent {:?}", message);
        Ok(())
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), RcError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(RcError::IllegalState("not connected"))?;

        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Blocks until a full frame arrives, then decodes it
    pub async fn receive(&mut self) -> Result<Message, RcError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or(RcError::IllegalState("not connected"))?;

        let mut frame = [0u8; FRAME_LEN];
        reader.read_exact(&mut frame).await?;

        let message = decode(&frame)?;
        trace!("Received {:?}", message);
        Ok(message)
    }

    /// Releases the transport; safe to call repeatedly
    ///
    /// The write half is shut down first, then the read half is dropped.
    /// Shutdown failures are logged and never returned.
    pub async fn close(&mut self) {
        let was_open = self.is_connected();

        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                debug!("Ignoring error while shutting down connection: {}", e);
            }
        }
        self.reader = None;
        self.state = ConnectionState::Disconnected;

        if was_open {
            info!("Connection closed");
        }
    }

    /// True while a transport is held; does not probe the peer
    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn open_stream(
    address: &str,
    port: u16,
    timeout: Option<Duration>,
) -> Result<TcpStream, RcError> {
    let unknown_host = || RcError::UnknownHost {
        host: address.to_string(),
    };

    let addrs: Vec<SocketAddr> = lookup_host((address, port))
        .await
        .map_err(|e| {
            debug!("Address lookup for {} failed: {}", address, e);
            unknown_host()
        })?
        .collect();

    if addrs.is_empty() {
        return Err(unknown_host());
    }

    let stream = bounded(timeout, TcpStream::connect(&addrs[..]))
        .await
        .map_err(|e| match (e.kind(), timeout) {
            (io::ErrorKind::TimedOut, Some(limit)) => io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connecting to {}:{} timed out after {:?}", address, port, limit),
            ),
            _ => e,
        })?;

    Ok(stream)
}

/// Runs `connecting` under an optional deadline, expiry maps to `TimedOut`
async fn bounded<T, F>(limit: Option<Duration>, connecting: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, connecting)
            .await
            .map_err(|_| io::Error::from(io::ErrorKind::TimedOut))?,
        None => connecting.await,
    }
}
