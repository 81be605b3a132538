//! Connection workers.
//!
//! A worker owns one TCP stream to one DC. It connects (directly or through
//! SOCKS5), writes the transport init bytes, negotiates an auth key when the
//! DC has none, then shuttles frames: encrypted payloads from the dispatcher
//! go out through the framing, incoming frames are decrypted and handed back
//! as [`Event`]s. All MTProto state lives in the dispatcher; a worker only
//! reads the shared key and the current session id.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use mtp_crypto::AuthKey;
use mtp_session::authentication;
use mtp_session::encrypted::decrypt_frame;
use mtp_session::transport::{Abridged, Full, Intermediate, Obfuscated};
use mtp_session::{AuthKeyCell, DecryptError, DecryptedMessage, Framing, Message, Session, SessionError, TransportError};
use mtp_tl::{Deserializable, RemoteCall};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TransportKind;
use crate::socks5::Socks5Config;

/// `DhGenRetry` answers tolerated before the key exchange gives up.
const DH_RETRIES: usize = 3;

const READ_CHUNK: usize = 8 * 1024;

// ─── Identity & state ─────────────────────────────────────────────────────────

/// Whether a connection carries regular traffic or file transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Main,
    Media,
}

/// At most one connection exists per `(dc_id, kind)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    pub dc_id: i32,
    pub kind:  ConnectionKind,
}

impl ConnectionId {
    pub fn main(dc_id: i32) -> Self { Self { dc_id, kind: ConnectionKind::Main } }
    pub fn media(dc_id: i32) -> Self { Self { dc_id, kind: ConnectionKind::Media } }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConnectionKind::Main => write!(f, "DC{}", self.dc_id),
            ConnectionKind::Media => write!(f, "DC{}/media", self.dc_id),
        }
    }
}

/// Lifecycle of a connection as seen by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or given up on until the next request.
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    /// Still serving in-flight requests while the main DC moves to `to`.
    Migrating { to: i32 },
}

// ─── ConnectionError ──────────────────────────────────────────────────────────

/// Why a worker stopped.
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    /// Connect, handshake or idle deadline passed.
    Timeout,
    Transport(TransportError),
    /// A frame failed its integrity check.
    Decrypt(DecryptError),
    KeyExchange(authentication::Error),
    Session(SessionError),
    Deserialize(mtp_tl::deserialize::Error),
    Proxy(tokio_socks::Error),
    /// The DC key was replaced or destroyed under a running connection.
    KeyChanged,
    /// No running worker took the payload.
    NotReady,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e)          => write!(f, "io: {e}"),
            Self::Timeout        => write!(f, "timed out"),
            Self::Transport(e)   => write!(f, "transport: {e}"),
            Self::Decrypt(e)     => write!(f, "decrypt: {e}"),
            Self::KeyExchange(e) => write!(f, "key exchange: {e}"),
            Self::Session(e)     => write!(f, "{e}"),
            Self::Deserialize(e) => write!(f, "deserialize: {e}"),
            Self::Proxy(e)       => write!(f, "socks5: {e}"),
            Self::KeyChanged     => write!(f, "auth key changed"),
            Self::NotReady       => write!(f, "worker not running"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self { Self::Io(e) }
}
impl From<TransportError> for ConnectionError {
    fn from(e: TransportError) -> Self { Self::Transport(e) }
}
impl From<authentication::Error> for ConnectionError {
    fn from(e: authentication::Error) -> Self { Self::KeyExchange(e) }
}
impl From<SessionError> for ConnectionError {
    fn from(e: SessionError) -> Self { Self::Session(e) }
}
impl From<mtp_tl::deserialize::Error> for ConnectionError {
    fn from(e: mtp_tl::deserialize::Error) -> Self { Self::Deserialize(e) }
}
impl From<tokio_socks::Error> for ConnectionError {
    fn from(e: tokio_socks::Error) -> Self { Self::Proxy(e) }
}

impl ConnectionError {
    /// The server's transport-level error code (e.g. `-404`), if that is
    /// what ended the connection.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            Self::Transport(TransportError::Server(code)) => Some(*code),
            _ => None,
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────────────────

/// Something a worker reports to the dispatcher.
#[derive(Debug)]
pub(crate) struct Event {
    pub conn:  ConnectionId,
    /// Identifies the worker; events from replaced workers are ignored.
    pub epoch: u64,
    pub kind:  EventKind,
}

#[derive(Debug)]
pub(crate) enum EventKind {
    Authenticating,
    Authenticated { first_salt: i64, time_offset: i32 },
    Ready,
    Message(DecryptedMessage),
    Lost(ConnectionError),
}

// ─── Spawning ─────────────────────────────────────────────────────────────────

/// Everything a worker needs to run.
#[derive(Clone, Debug)]
pub(crate) struct WorkerParams {
    pub conn:            ConnectionId,
    pub epoch:           u64,
    pub addr:            String,
    pub dh_dc_id:        i32,
    pub key:             AuthKeyCell,
    pub session_id:      Arc<AtomicI64>,
    pub delay:           Duration,
    pub transport:       TransportKind,
    pub proxy:           Option<Socks5Config>,
    pub connect_timeout: Duration,
    pub idle_timeout:    Duration,
}

/// The dispatcher's side of a running worker.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    cancel:   CancellationToken,
}

impl WorkerHandle {
    /// Queue one encrypted payload for the worker.
    pub fn send(&self, payload: Vec<u8>) -> Result<(), ConnectionError> {
        self.outgoing.send(payload).map_err(|_| ConnectionError::NotReady)
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn(params: WorkerParams, events: mpsc::UnboundedSender<Event>) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        let conn = params.conn;
        let epoch = params.epoch;
        let outcome = tokio::select! {
            _ = token.cancelled() => None,
            r = run(params, rx, &events) => Some(r),
        };
        match outcome {
            None => tracing::debug!("[conn {conn}] stopped"),
            Some(Ok(())) => tracing::debug!("[conn {conn}] outgoing queue closed"),
            Some(Err(e)) => {
                tracing::warn!("[conn {conn}] lost: {e}");
                let _ = events.send(Event { conn, epoch, kind: EventKind::Lost(e) });
            }
        }
    });
    WorkerHandle { outgoing: tx, cancel }
}

// ─── Worker ───────────────────────────────────────────────────────────────────

/// A connected stream plus its framing state.
struct Wire {
    stream:  TcpStream,
    framing: Box<dyn Framing>,
    buf:     Vec<u8>,
}

impl Wire {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ConnectionError> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        self.framing.encode(payload, &mut out);
        self.stream.write_all(&out).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self.framing.decode(&mut self.buf)? {
                return Ok(packet);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(closed());
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// One unencrypted request/response round trip.
    async fn plain_call<R: RemoteCall>(
        &mut self,
        plain: &mut Session,
        req: &R,
    ) -> Result<R::Return, ConnectionError> {
        let (_, frame) = plain.pack_plain(0, req.to_bytes());
        self.send(&frame).await?;
        let reply = self.recv().await?;
        let msg = Message::from_plaintext_bytes(&reply)?;
        Ok(R::Return::from_bytes(&msg.body)?)
    }
}

fn closed() -> ConnectionError {
    ConnectionError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed by peer"))
}

fn emit(events: &mpsc::UnboundedSender<Event>, p: &WorkerParams, kind: EventKind) -> Result<(), ()> {
    events.send(Event { conn: p.conn, epoch: p.epoch, kind }).map_err(drop)
}

async fn run(
    p: WorkerParams,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<Event>,
) -> Result<(), ConnectionError> {
    if !p.delay.is_zero() {
        tracing::debug!("[conn {}] reconnecting in {:?}", p.conn, p.delay);
        tokio::time::sleep(p.delay).await;
    }

    tracing::info!("[conn {}] connecting to {}", p.conn, p.addr);
    let mut wire = tokio::time::timeout(p.connect_timeout, open(&p))
        .await
        .map_err(|_| ConnectionError::Timeout)??;

    if p.key.get().is_none() {
        if emit(events, &p, EventKind::Authenticating).is_err() {
            return Ok(());
        }
        let done = tokio::time::timeout(p.connect_timeout, exchange_key(&mut wire, p.dh_dc_id))
            .await
            .map_err(|_| ConnectionError::Timeout)??;
        // Another connection to the same DC may have won the race.
        if p.key.get().is_none() {
            p.key.install(AuthKey::from_bytes(done.auth_key));
            tracing::info!("[conn {}] auth key negotiated", p.conn);
            let kind = EventKind::Authenticated { first_salt: done.first_salt, time_offset: done.time_offset };
            if emit(events, &p, kind).is_err() {
                return Ok(());
            }
        }
    }

    let (key, generation) = match p.key.snapshot() {
        (Some(key), generation) => (key, generation),
        (None, _) => return Err(ConnectionError::KeyChanged),
    };
    if emit(events, &p, EventKind::Ready).is_err() {
        return Ok(());
    }

    let Wire { stream, mut framing, mut buf } = wire;
    let (mut rd, mut wr) = stream.into_split();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut deadline = Instant::now() + p.idle_timeout;

    loop {
        tokio::select! {
            payload = outgoing.recv() => {
                let Some(payload) = payload else { return Ok(()) };
                let mut out = Vec::with_capacity(payload.len() + 8);
                framing.encode(&payload, &mut out);
                wr.write_all(&out).await?;
            }
            n = rd.read(&mut chunk) => {
                let n = n?;
                if n == 0 {
                    return Err(closed());
                }
                deadline = Instant::now() + p.idle_timeout;
                buf.extend_from_slice(&chunk[..n]);
                while let Some(mut frame) = framing.decode(&mut buf)? {
                    if p.key.generation() != generation {
                        return Err(ConnectionError::KeyChanged);
                    }
                    let session_id = p.session_id.load(Ordering::Acquire);
                    match decrypt_frame(&key, session_id, &mut frame) {
                        Ok(msg) => {
                            if emit(events, &p, EventKind::Message(msg)).is_err() {
                                return Ok(());
                            }
                        }
                        Err(e) if e.is_fatal() => return Err(ConnectionError::Decrypt(e)),
                        Err(e) => tracing::warn!("[conn {}] dropping frame: {e}", p.conn),
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => return Err(ConnectionError::Timeout),
        }
    }
}

/// TCP (or SOCKS5) connect, socket tuning and transport init bytes.
async fn open(p: &WorkerParams) -> Result<Wire, ConnectionError> {
    let stream = match &p.proxy {
        Some(proxy) => proxy.connect(&p.addr).await?,
        None => TcpStream::connect(p.addr.as_str()).await?,
    };
    tune(&stream)?;

    let mut framing: Box<dyn Framing> = match &p.transport {
        TransportKind::Abridged => Box::new(Abridged::new()),
        TransportKind::Intermediate => Box::new(Intermediate::new()),
        TransportKind::Full => Box::new(Full::new()),
        TransportKind::Obfuscated { secret } => {
            let obfuscated = Obfuscated::new(Abridged::new(), secret.as_ref())
                .map_err(|e| ConnectionError::Session(SessionError::Rng(e)))?;
            match obfuscated {
                Some(o) => Box::new(o),
                None => Box::new(Abridged::new()),
            }
        }
    };

    let mut stream = stream;
    let init = framing.init_bytes();
    if !init.is_empty() {
        stream.write_all(&init).await?;
    }
    Ok(Wire { stream, framing, buf: Vec::new() })
}

fn tune(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(30));
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

async fn exchange_key(wire: &mut Wire, dh_dc_id: i32) -> Result<authentication::Finished, ConnectionError> {
    let mut plain = Session::with_id(0);
    let mut retries = 0;
    loop {
        let (req, s1) = authentication::step1()?;
        let res_pq = wire.plain_call(&mut plain, &req).await?;
        let (req, s2) = authentication::step2(s1, res_pq, dh_dc_id)?;
        let dh_params = wire.plain_call(&mut plain, &req).await?;
        let (req, s3) = authentication::step3(s2, dh_params)?;
        let answer = wire.plain_call(&mut plain, &req).await?;
        match authentication::finish(s3, answer) {
            Err(authentication::Error::DhGenRetry) if retries < DH_RETRIES => {
                retries += 1;
                tracing::debug!("[dh] server asked for a retry ({retries}/{DH_RETRIES})");
            }
            result => return Ok(result?),
        }
    }
}
