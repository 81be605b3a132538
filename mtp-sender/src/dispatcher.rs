//! The request dispatcher.
//!
//! A sans-IO state machine owned by a single task. It is fed caller requests,
//! worker [`Event`]s and timer expiries, and answers with [`Action`]s for the
//! runner to execute. It never blocks and never touches a socket, which is
//! what makes it testable by handing it decrypted server messages directly.
//!
//! Every request reaches exactly one terminal outcome: its entry is removed
//! from the pending table once, and the caller's channel is used once.

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use mtp_session::envelope::{self, EnvelopeError, Incoming};
use mtp_session::{AuthKeyCell, Dcenter, DecryptedMessage, PersistedState, Session, SessionError};
use mtp_tl::{LAYER, Serializable, functions, types};
use tokio::sync::oneshot;

use crate::config::{Config, DcConfig};
use crate::connection::{ConnectionError, ConnectionId, ConnectionKind, ConnectionState, Event, EventKind};
use crate::errors::{InvocationError, Migration, RpcError};
use crate::retry::RetryContext;

/// Where a request should run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// The account's home DC; follows `*_MIGRATE` errors.
    Main,
    Dc(i32),
    /// The media connection of a DC.
    Media(i32),
}

/// Identifies a submitted request for its whole life, across resends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Hands out request ids; shared between callers and the dispatcher.
#[derive(Clone, Debug, Default)]
pub(crate) struct RequestIdAllocator(Arc<AtomicU64>);

impl RequestIdAllocator {
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

pub(crate) type Reply = oneshot::Sender<Result<Vec<u8>, InvocationError>>;

/// Work the runner has to carry out.
#[derive(Debug)]
pub(crate) enum Action {
    /// Start (or replace) the worker of `conn`.
    Connect {
        conn:       ConnectionId,
        epoch:      u64,
        addr:       String,
        dh_dc_id:   i32,
        key:        AuthKeyCell,
        session_id: Arc<AtomicI64>,
        delay:      Duration,
    },
    Send { conn: ConnectionId, payload: Vec<u8> },
    Disconnect { conn: ConnectionId },
    Schedule { after: Duration, timer: Timer },
    /// An unsolicited server message.
    Update(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Timer {
    Retry(RequestId),
}

#[derive(Debug, PartialEq, Eq)]
enum Kind {
    Call,
    Ping,
}

#[derive(Debug)]
enum ReplyTo {
    Caller(Reply),
    Discard,
}

#[derive(Debug)]
struct Request {
    kind:          Kind,
    body:          Vec<u8>,
    target:        Target,
    route:         ConnectionId,
    msg_id:        Option<i64>,
    flood_retries: u32,
    migrations:    u32,
    reply:         ReplyTo,
}

impl Request {
    fn finish(self, result: Result<Vec<u8>, InvocationError>) {
        if let ReplyTo::Caller(tx) = self.reply {
            // The caller may have stopped listening.
            let _ = tx.send(result);
        }
    }
}

#[derive(Debug)]
struct Conn {
    state:        ConnectionState,
    session:      Session,
    session_id:   Arc<AtomicI64>,
    epoch:        u64,
    /// `initConnection` has been answered on the current session.
    initialized:  bool,
    queue:        VecDeque<RequestId>,
    failures:     u32,
    pending_acks: Vec<i64>,
    ping:         Option<RequestId>,
}

impl Conn {
    fn new() -> Self {
        Self {
            state:        ConnectionState::Disconnected,
            // Replaced on every connect.
            session:      Session::with_id(0),
            session_id:   Arc::new(AtomicI64::new(0)),
            epoch:        0,
            initialized:  false,
            queue:        VecDeque::new(),
            failures:     0,
            pending_acks: Vec::new(),
            ping:         None,
        }
    }

    fn renew_session(&mut self, session: Session) {
        self.session_id.store(session.id(), Ordering::Release);
        self.session = session;
        self.initialized = false;
    }
}

pub(crate) struct Dispatcher {
    config:         Config,
    dc_config:      DcConfig,
    main_dc:        i32,
    migrating_from: Option<ConnectionId>,
    dcs:            HashMap<i32, Dcenter>,
    conns:          HashMap<ConnectionId, Conn>,
    requests:       HashMap<RequestId, Request>,
    by_msg_id:      HashMap<i64, RequestId>,
    ids:            RequestIdAllocator,
    next_epoch:     u64,
    next_ping_id:   i64,
    actions:        Vec<Action>,
}

impl Dispatcher {
    pub fn new(config: Config, ids: RequestIdAllocator) -> Self {
        let dcs = config
            .state
            .iter()
            .flat_map(|s| s.dcs.iter())
            .map(|snap| (snap.dc_id, Dcenter::restore(snap)))
            .collect();
        Self {
            dc_config: config.bootstrap_dc_config(),
            main_dc: config.effective_main_dc(),
            migrating_from: None,
            dcs,
            conns: HashMap::new(),
            requests: HashMap::new(),
            by_msg_id: HashMap::new(),
            ids,
            next_epoch: 0,
            next_ping_id: 0,
            actions: Vec::new(),
            config,
        }
    }

    pub fn take_actions(&mut self) -> Vec<Action> {
        mem::take(&mut self.actions)
    }

    pub fn main_dc(&self) -> i32 { self.main_dc }

    pub fn pending_len(&self) -> usize { self.requests.len() }

    /// Message id the request was last sent under, if it is in flight.
    pub fn msg_id_of(&self, id: RequestId) -> Option<i64> {
        self.requests.get(&id).and_then(|r| r.msg_id)
    }

    pub fn state(&self, conn: ConnectionId) -> ConnectionState {
        self.conns.get(&conn).map_or(ConnectionState::Disconnected, |c| c.state)
    }

    pub fn dc_config(&self) -> &DcConfig { &self.dc_config }

    pub fn update_config(&mut self, dc_config: DcConfig) {
        tracing::info!("[dispatcher] DC table updated ({} addresses)", dc_config.addresses.len());
        self.dc_config = dc_config;
    }

    pub fn snapshot(&self) -> PersistedState {
        let mut dcs: Vec<_> = self.dcs.values().map(Dcenter::snapshot).collect();
        dcs.sort_by_key(|d| d.dc_id);
        PersistedState { main_dc: self.main_dc, dcs }
    }

    // ─── Requests ─────────────────────────────────────────────────────────────

    /// Register a request and send it as soon as its connection allows.
    #[cfg(test)]
    pub fn call(&mut self, body: Vec<u8>, target: Target, reply: Reply) -> RequestId {
        let id = self.ids.next();
        self.submit(id, body, target, reply);
        id
    }

    /// Like [`Self::call`], with an id the caller already took from the
    /// shared allocator.
    pub fn submit(&mut self, id: RequestId, body: Vec<u8>, target: Target, reply: Reply) {
        let route = self.route(target);
        self.requests.insert(id, Request {
            kind: Kind::Call,
            body,
            target,
            route,
            msg_id: None,
            flood_retries: 0,
            migrations: 0,
            reply: ReplyTo::Caller(reply),
        });
        self.dispatch(id);
    }

    /// Forget a request. Its continuation is never invoked; a late answer is
    /// dropped like any unknown message id.
    pub fn cancel(&mut self, id: RequestId) {
        let Some(req) = self.requests.remove(&id) else { return };
        if let Some(msg_id) = req.msg_id {
            self.by_msg_id.remove(&msg_id);
        }
        if let Some(conn) = self.conns.get_mut(&req.route) {
            conn.queue.retain(|q| *q != id);
            if conn.ping == Some(id) {
                conn.ping = None;
            }
        }
        tracing::debug!("[dispatcher] request {} cancelled", id.0);
    }

    /// Resolve the request sent as `msg_id`. Unknown ids are ignored: the
    /// server may deliver an answer more than once.
    pub fn on_response(&mut self, msg_id: i64, result: Result<Vec<u8>, RpcError>) {
        let Some((id, req)) = self.take_answered(msg_id) else { return };
        match result {
            Ok(bytes) => req.finish(Ok(bytes)),
            Err(error) => self.on_rpc_error(id, req, error),
        }
    }

    /// Resolve the request sent as `msg_id` with a local failure.
    fn fail_answer(&mut self, msg_id: i64, error: InvocationError) {
        if let Some((_, req)) = self.take_answered(msg_id) {
            req.finish(Err(error));
        }
    }

    fn take_answered(&mut self, msg_id: i64) -> Option<(RequestId, Request)> {
        let Some(id) = self.by_msg_id.remove(&msg_id) else {
            tracing::trace!("[dispatcher] answer for unknown msg_id {msg_id} dropped");
            return None;
        };
        let mut req = self.requests.remove(&id)?;
        req.msg_id = None;
        if req.kind == Kind::Ping {
            if let Some(conn) = self.conns.get_mut(&req.route) {
                conn.ping = None;
            }
        }
        Some((id, req))
    }

    fn on_rpc_error(&mut self, id: RequestId, mut req: Request, error: RpcError) {
        if let Some(migration) = error.migration() {
            if req.migrations >= self.config.retry.max_migrations {
                tracing::warn!("[dispatcher] request {} exceeded migration budget", id.0);
                req.finish(Err(InvocationError::Rpc(error)));
                return;
            }
            req.migrations += 1;
            let route = match migration {
                Migration::Main(dc) => ConnectionId::main(dc),
                Migration::Request(dc) => ConnectionId { dc_id: dc, kind: req.route.kind },
            };
            let media = route.kind == ConnectionKind::Media;
            if self.dc_config.address(route.dc_id, media).is_none() {
                req.finish(Err(InvocationError::UnknownDc(route.dc_id)));
                return;
            }
            if let Migration::Main(dc) = migration {
                self.migrate_main(dc);
            }
            tracing::info!("[dispatcher] {} → resubmitting request {} on {route}", error.name, id.0);
            req.route = route;
            self.requests.insert(id, req);
            self.dispatch(id);
            return;
        }

        if error.flood_wait_seconds().is_some() {
            req.flood_retries += 1;
            let ctx = RetryContext {
                fail_count: NonZeroU32::new(req.flood_retries).unwrap_or(NonZeroU32::MIN),
                error:      &error,
            };
            if let ControlFlow::Continue(after) = self.config.retry.should_retry(&ctx) {
                self.requests.insert(id, req);
                self.actions.push(Action::Schedule { after, timer: Timer::Retry(id) });
                return;
            }
        }

        req.finish(Err(InvocationError::Rpc(error)));
    }

    pub fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::Retry(id) => {
                if self.requests.contains_key(&id) {
                    self.dispatch(id);
                }
            }
        }
    }

    /// Fail everything and close every connection.
    pub fn shutdown(&mut self) {
        self.by_msg_id.clear();
        for (_, req) in self.requests.drain() {
            req.finish(Err(InvocationError::Dropped));
        }
        for (id, conn) in self.conns.iter_mut() {
            conn.queue.clear();
            conn.ping = None;
            conn.state = ConnectionState::Disconnected;
            self.actions.push(Action::Disconnect { conn: *id });
        }
    }

    /// Forget the key of `dc_id`; its connections re-authenticate.
    pub fn destroy_key(&mut self, dc_id: i32) {
        self.dc_mut(dc_id).destroy_key();
        let conns: Vec<_> = self
            .conns
            .iter()
            .filter(|(id, c)| id.dc_id == dc_id && c.state != ConnectionState::Disconnected)
            .map(|(id, _)| *id)
            .collect();
        for conn in conns {
            self.requeue_in_flight(conn);
            self.connect(conn, Duration::ZERO);
        }
    }

    /// Send a keep-alive on every ready connection that has none outstanding.
    pub fn tick(&mut self) {
        let ready: Vec<_> = self
            .conns
            .iter()
            .filter(|(_, c)| c.state == ConnectionState::Ready && c.ping.is_none())
            .map(|(id, _)| *id)
            .collect();
        let disconnect_delay = (self.config.ping_interval * 3 / 2).as_secs() as i32;
        for conn_id in ready {
            self.next_ping_id += 1;
            let body = functions::PingDelayDisconnect { ping_id: self.next_ping_id, disconnect_delay }.to_bytes();
            let id = self.ids.next();
            let target = match conn_id.kind {
                ConnectionKind::Main => Target::Dc(conn_id.dc_id),
                ConnectionKind::Media => Target::Media(conn_id.dc_id),
            };
            self.requests.insert(id, Request {
                kind: Kind::Ping,
                body,
                target,
                route: conn_id,
                msg_id: None,
                flood_retries: 0,
                migrations: 0,
                reply: ReplyTo::Discard,
            });
            if let Some(conn) = self.conns.get_mut(&conn_id) {
                conn.ping = Some(id);
            }
            self.send_request(conn_id, id);
        }
    }

    // ─── Routing ──────────────────────────────────────────────────────────────

    fn route(&self, target: Target) -> ConnectionId {
        match target {
            Target::Main => ConnectionId::main(self.main_dc),
            Target::Dc(dc) => ConnectionId::main(dc),
            Target::Media(dc) => ConnectionId::media(dc),
        }
    }

    fn dc_mut(&mut self, dc_id: i32) -> &mut Dcenter {
        self.dcs.entry(dc_id).or_insert_with(|| Dcenter::new(dc_id))
    }

    fn conn_mut(&mut self, conn: ConnectionId) -> &mut Conn {
        self.conns.entry(conn).or_insert_with(Conn::new)
    }

    /// Send now if the route is ready, otherwise queue and make sure a
    /// connection is on its way.
    fn dispatch(&mut self, id: RequestId) {
        let Some(route) = self.requests.get(&id).map(|r| r.route) else { return };
        let state = self.conn_mut(route).state;
        match state {
            ConnectionState::Ready | ConnectionState::Migrating { .. } => self.send_request(route, id),
            ConnectionState::Connecting | ConnectionState::Authenticating => {
                self.conn_mut(route).queue.push_back(id);
            }
            ConnectionState::Disconnected => {
                let conn = self.conn_mut(route);
                conn.queue.push_back(id);
                conn.failures = 0;
                self.connect(route, Duration::ZERO);
            }
        }
    }

    fn migrate_main(&mut self, dc: i32) {
        if dc == self.main_dc {
            return;
        }
        let old = ConnectionId::main(self.main_dc);
        let new = ConnectionId::main(dc);
        tracing::info!("[dispatcher] main DC {} → {dc}", self.main_dc);
        self.main_dc = dc;

        let mut moved = Vec::new();
        if let Some(conn) = self.conns.get_mut(&old) {
            if conn.state == ConnectionState::Ready {
                conn.state = ConnectionState::Migrating { to: dc };
                self.migrating_from = Some(old);
            }
            let requests = &self.requests;
            conn.queue.retain(|id| {
                let follows = requests.get(id).is_some_and(|r| r.target == Target::Main);
                if follows {
                    moved.push(*id);
                }
                !follows
            });
        }
        for id in moved {
            if let Some(req) = self.requests.get_mut(&id) {
                req.route = new;
            }
            self.dispatch(id);
        }
    }

    // ─── Connections ──────────────────────────────────────────────────────────

    fn connect(&mut self, conn_id: ConnectionId, delay: Duration) {
        let media = conn_id.kind == ConnectionKind::Media;
        let Some(addr) = self.dc_config.address(conn_id.dc_id, media).map(|a| a.addr.clone()) else {
            tracing::warn!("[dispatcher] no address known for {conn_id}");
            self.conn_mut(conn_id).state = ConnectionState::Disconnected;
            self.fail_queued(conn_id, InvocationError::UnknownDc(conn_id.dc_id));
            return;
        };
        let session = match Session::new() {
            Ok(s) => s,
            Err(e) => {
                self.conn_mut(conn_id).state = ConnectionState::Disconnected;
                self.fail_queued(conn_id, InvocationError::Session(e));
                return;
            }
        };

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let key = self.dc_mut(conn_id.dc_id).key.clone();
        let dh_dc_id = self.config.dh_dc_id(conn_id.dc_id, media);

        let conn = self.conn_mut(conn_id);
        conn.renew_session(session);
        conn.epoch = epoch;
        conn.state = ConnectionState::Connecting;
        conn.pending_acks.clear();
        let session_id = Arc::clone(&conn.session_id);

        self.actions.push(Action::Connect { conn: conn_id, epoch, addr, dh_dc_id, key, session_id, delay });
    }

    fn fail_queued(&mut self, conn_id: ConnectionId, error: InvocationError) {
        let Some(conn) = self.conns.get_mut(&conn_id) else { return };
        let queued: Vec<_> = conn.queue.drain(..).collect();
        for id in queued {
            if let Some(req) = self.requests.remove(&id) {
                req.finish(Err(error.clone()));
            }
        }
    }

    /// Put every request sent on `conn_id` back at the front of its queue and
    /// drop the outstanding ping.
    fn requeue_in_flight(&mut self, conn_id: ConnectionId) {
        let mut in_flight: Vec<(i64, RequestId)> = self
            .requests
            .iter()
            .filter(|(_, r)| r.route == conn_id)
            .filter_map(|(id, r)| r.msg_id.map(|m| (m, *id)))
            .collect();
        in_flight.sort_unstable();

        let ping = self.conns.get_mut(&conn_id).and_then(|c| c.ping.take());
        if let Some(ping) = ping {
            if let Some(req) = self.requests.remove(&ping) {
                if let Some(m) = req.msg_id {
                    self.by_msg_id.remove(&m);
                }
            }
        }

        let Some(conn) = self.conns.get_mut(&conn_id) else { return };
        for (msg_id, id) in in_flight.into_iter().rev() {
            if Some(id) == ping {
                continue;
            }
            self.by_msg_id.remove(&msg_id);
            if let Some(req) = self.requests.get_mut(&id) {
                req.msg_id = None;
            }
            conn.queue.push_front(id);
        }
    }

    pub(crate) fn on_event(&mut self, event: Event) {
        let Event { conn: conn_id, epoch, kind } = event;
        match self.conns.get(&conn_id) {
            Some(conn) if conn.epoch == epoch => {}
            _ => {
                tracing::trace!("[dispatcher] stale event from {conn_id}");
                return;
            }
        }
        match kind {
            EventKind::Authenticating => {
                self.conn_mut(conn_id).state = ConnectionState::Authenticating;
            }
            EventKind::Authenticated { first_salt, time_offset } => {
                let dc = self.dc_mut(conn_id.dc_id);
                dc.salt = first_salt;
                dc.time_offset = time_offset;
                tracing::info!("[dispatcher] {conn_id} authenticated");
            }
            EventKind::Ready => self.on_ready(conn_id),
            EventKind::Message(msg) => self.on_message(conn_id, msg),
            EventKind::Lost(error) => self.on_lost(conn_id, error),
        }
    }

    fn on_ready(&mut self, conn_id: ConnectionId) {
        tracing::debug!("[dispatcher] {conn_id} ready");
        let conn = self.conn_mut(conn_id);
        conn.state = ConnectionState::Ready;
        conn.failures = 0;
        let queued: Vec<_> = conn.queue.drain(..).collect();

        if conn_id == ConnectionId::main(self.main_dc) {
            if let Some(old) = self.migrating_from.take() {
                if let Some(c) = self.conns.get_mut(&old) {
                    if matches!(c.state, ConnectionState::Migrating { .. }) {
                        c.state = ConnectionState::Ready;
                    }
                }
            }
        }
        for id in queued {
            self.send_request(conn_id, id);
        }
    }

    /// A payload could not be handed to the worker of `conn_id`. A live
    /// connection is treated as lost so its in-flight requests go out again.
    pub(crate) fn on_send_failed(&mut self, conn_id: ConnectionId, error: ConnectionError) {
        match self.conns.get(&conn_id).map(|c| c.state) {
            Some(ConnectionState::Ready | ConnectionState::Migrating { .. }) => self.on_lost(conn_id, error),
            _ => tracing::trace!("[dispatcher] send to {conn_id} failed while not live: {error}"),
        }
    }

    fn on_lost(&mut self, conn_id: ConnectionId, error: ConnectionError) {
        self.requeue_in_flight(conn_id);
        let conn = self.conn_mut(conn_id);
        conn.state = ConnectionState::Disconnected;
        conn.pending_acks.clear();
        conn.failures += 1;
        let failures = conn.failures;

        if error.server_code() == Some(-404) {
            tracing::warn!("[dispatcher] {conn_id}: server does not know our auth key");
            self.dc_mut(conn_id.dc_id).destroy_key();
        }
        if matches!(self.migrating_from, Some(old) if old == conn_id) {
            self.migrating_from = None;
        }

        let error = Arc::new(error);
        if matches!(*error, ConnectionError::KeyExchange(_)) {
            tracing::warn!("[dispatcher] key exchange with {conn_id} failed: {error}");
            self.conn_mut(conn_id).failures = 0;
            self.fail_queued(conn_id, InvocationError::Connection(error));
            return;
        }

        match self.config.reconnect.next_delay(failures) {
            ControlFlow::Continue(delay) => {
                tracing::warn!("[dispatcher] {conn_id} lost ({error}), reconnect #{failures} in {delay:?}");
                self.connect(conn_id, delay);
            }
            ControlFlow::Break(()) => {
                tracing::warn!("[dispatcher] {conn_id} unreachable after {} attempts", failures - 1);
                self.conn_mut(conn_id).failures = 0;
                self.fail_queued(conn_id, InvocationError::Connection(error));
            }
        }
    }

    // ─── Sending ──────────────────────────────────────────────────────────────

    fn send_request(&mut self, conn_id: ConnectionId, id: RequestId) {
        let Some(conn) = self.conns.get_mut(&conn_id) else { return };
        let Some(req) = self.requests.get_mut(&id) else { return };
        let dc = self.dcs.entry(conn_id.dc_id).or_insert_with(|| Dcenter::new(conn_id.dc_id));

        let body = if req.kind == Kind::Call && !conn.initialized {
            wrap_init(&self.config, &req.body)
        } else {
            req.body.clone()
        };
        let packed = match conn.session.pack(dc, &body, true) {
            Ok(packed) => packed,
            Err(SessionError::KeyMissing) => {
                conn.queue.push_back(id);
                return;
            }
            Err(e) => {
                if let Some(req) = self.requests.remove(&id) {
                    req.finish(Err(InvocationError::Session(e)));
                }
                return;
            }
        };

        if let Some(old) = req.msg_id.replace(packed.msg_id.0) {
            self.by_msg_id.remove(&old);
        }
        self.by_msg_id.insert(packed.msg_id.0, id);
        tracing::trace!("[dispatcher] request {} → {conn_id} as msg_id {}", id.0, packed.msg_id.0);
        self.actions.push(Action::Send { conn: conn_id, payload: packed.payload });
    }

    /// Send the request again under a fresh message id.
    fn resend(&mut self, msg_id: i64) {
        let Some(id) = self.by_msg_id.remove(&msg_id) else { return };
        let Some(req) = self.requests.get_mut(&id) else { return };
        req.msg_id = None;
        self.dispatch(id);
    }

    fn flush_acks(&mut self, conn_id: ConnectionId) {
        let Some(conn) = self.conns.get_mut(&conn_id) else { return };
        let open = matches!(conn.state, ConnectionState::Ready | ConnectionState::Migrating { .. });
        if conn.pending_acks.is_empty() || !open {
            return;
        }
        let ack = types::MsgsAck { msg_ids: mem::take(&mut conn.pending_acks) };
        let dc = self.dcs.entry(conn_id.dc_id).or_insert_with(|| Dcenter::new(conn_id.dc_id));
        match conn.session.pack(dc, &ack.to_bytes(), false) {
            Ok(packed) => self.actions.push(Action::Send { conn: conn_id, payload: packed.payload }),
            Err(e) => tracing::warn!("[dispatcher] could not pack acks for {conn_id}: {e}"),
        }
    }

    // ─── Incoming ─────────────────────────────────────────────────────────────

    fn on_message(&mut self, conn_id: ConnectionId, msg: DecryptedMessage) {
        for env in envelope::decode(msg.msg_id, msg.seq_no, &msg.body) {
            if env.is_content_related() {
                self.conn_mut(conn_id).pending_acks.push(env.msg_id);
            }
            let item = match env.item {
                Ok(item) => item,
                Err(EnvelopeError::RpcResult { req_msg_id, source }) => {
                    tracing::warn!("[dispatcher] unreadable answer to {req_msg_id}: {source}");
                    self.conn_mut(conn_id).initialized = true;
                    let error = match *source {
                        EnvelopeError::Decode(e) => InvocationError::Deserialize(e),
                        other => InvocationError::MalformedAnswer(Arc::new(other)),
                    };
                    self.fail_answer(req_msg_id, error);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("[dispatcher] dropping malformed message {}: {e}", env.msg_id);
                    continue;
                }
            };
            match item {
                Incoming::RpcResult { req_msg_id, outcome } => {
                    self.conn_mut(conn_id).initialized = true;
                    let result = outcome
                        .map_err(|e| RpcError::from_telegram(e.error_code, &e.error_message));
                    self.on_response(req_msg_id, result);
                }
                Incoming::Pong { msg_id, ping_id } => {
                    let body = types::Pong { msg_id, ping_id }.to_bytes();
                    self.on_response(msg_id, Ok(body));
                }
                Incoming::BadServerSalt { bad_msg_id, new_salt } => {
                    tracing::debug!("[dispatcher] {conn_id}: new server salt");
                    self.dc_mut(conn_id.dc_id).salt = new_salt;
                    self.resend(bad_msg_id);
                }
                Incoming::BadMsgNotification { bad_msg_id, error_code } => {
                    self.on_bad_msg(conn_id, msg.msg_id, bad_msg_id, error_code);
                }
                Incoming::NewSession { first_msg_id, server_salt } => {
                    tracing::debug!("[dispatcher] {conn_id}: new session created by server");
                    self.dc_mut(conn_id.dc_id).salt = server_salt;
                    let stale: Vec<i64> = self
                        .by_msg_id
                        .iter()
                        .filter(|(m, id)| {
                            **m < first_msg_id
                                && self.requests.get(*id).is_some_and(|r| r.route == conn_id)
                        })
                        .map(|(m, _)| *m)
                        .collect();
                    for m in stale {
                        self.resend(m);
                    }
                }
                Incoming::Ack { msg_ids } => {
                    tracing::trace!("[dispatcher] {conn_id}: {} messages acked", msg_ids.len());
                }
                Incoming::DetailedInfo { answer_msg_id } => {
                    self.conn_mut(conn_id).pending_acks.push(answer_msg_id);
                }
                Incoming::ResendRequest { msg_ids } => {
                    for m in msg_ids {
                        self.resend(m);
                    }
                }
                Incoming::FutureSalts(salts) => {
                    tracing::debug!("[dispatcher] {conn_id}: {} future salts", salts.salts.0.len());
                }
                Incoming::Other { constructor, body } => {
                    tracing::trace!("[dispatcher] {conn_id}: update {constructor:#010x}");
                    self.actions.push(Action::Update(body));
                }
            }
        }
        self.flush_acks(conn_id);
    }

    fn on_bad_msg(&mut self, conn_id: ConnectionId, server_msg_id: i64, bad_msg_id: i64, code: i32) {
        match code {
            16 | 17 => {
                self.dc_mut(conn_id.dc_id).correct_time_offset(server_msg_id);
                self.resend(bad_msg_id);
            }
            32 | 33 => {
                tracing::info!("[dispatcher] {conn_id}: seq_no rejected ({code}), starting a new session");
                let session = match Session::new() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("[dispatcher] could not start a new session: {e}");
                        return;
                    }
                };
                self.conn_mut(conn_id).renew_session(session);
                let mut in_flight: Vec<i64> = self
                    .by_msg_id
                    .iter()
                    .filter(|(_, id)| self.requests.get(*id).is_some_and(|r| r.route == conn_id))
                    .map(|(m, _)| *m)
                    .collect();
                in_flight.sort_unstable();
                for m in in_flight {
                    self.resend(m);
                }
            }
            _ => {
                let Some(id) = self.by_msg_id.remove(&bad_msg_id) else { return };
                if let Some(req) = self.requests.remove(&id) {
                    if req.kind == Kind::Ping {
                        if let Some(conn) = self.conns.get_mut(&conn_id) {
                            conn.ping = None;
                        }
                    }
                    tracing::warn!("[dispatcher] {conn_id}: message rejected with code {code}");
                    req.finish(Err(InvocationError::BadMessage { code }));
                }
            }
        }
    }
}

/// `invokeWithLayer(initConnection(body))`.
fn wrap_init(config: &Config, body: &[u8]) -> Vec<u8> {
    let init = &config.init;
    functions::InvokeWithLayer {
        layer: LAYER,
        query: functions::InitConnection {
            api_id:           init.api_id,
            device_model:     init.device_model.clone(),
            system_version:   init.system_version.clone(),
            app_version:      init.app_version.clone(),
            system_lang_code: init.system_lang_code.clone(),
            lang_pack:        init.lang_pack.clone(),
            lang_code:        init.lang_code.clone(),
            query:            functions::Raw(body.to_vec()),
        },
    }
    .to_bytes()
}
