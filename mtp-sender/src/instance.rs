//! The multi-DC instance: public entry point and the runner task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use mtp_session::PersistedState;
use mtp_tl::{Deserializable, RemoteCall, Serializable, enums, functions};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{Config, DcConfig, TransportKind};
use crate::connection::{self, ConnectionError, ConnectionId, WorkerHandle, WorkerParams};
use crate::dispatcher::{Action, Dispatcher, Reply, RequestId, RequestIdAllocator, Target, Timer};
use crate::errors::{InvocationError, StartError};
use crate::socks5::Socks5Config;

// ─── Commands ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Command {
    Call { id: RequestId, body: Vec<u8>, target: Target, reply: Reply },
    Cancel(RequestId),
    Timer(Timer),
    Snapshot(oneshot::Sender<PersistedState>),
    DestroyKey(i32),
    UpdateConfig(DcConfig),
    Subscribe(mpsc::UnboundedSender<Vec<u8>>),
    Shutdown,
}

// ─── RequestHandle ────────────────────────────────────────────────────────────

/// A submitted request.
///
/// Await it for the raw answer. Dropping it before completion cancels the
/// request; a late answer is then discarded.
#[derive(Debug)]
pub struct RequestHandle {
    id:       RequestId,
    rx:       oneshot::Receiver<Result<Vec<u8>, InvocationError>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    done:     bool,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId { self.id }

    /// Cancel the request. Nothing is delivered afterwards.
    pub fn cancel(self) {}
}

impl Future for RequestHandle {
    type Output = Result<Vec<u8>, InvocationError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(result) => {
                this.done = true;
                Poll::Ready(result.unwrap_or(Err(InvocationError::Dropped)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(tx) = self.commands.upgrade() {
            let _ = tx.send(Command::Cancel(self.id));
        }
    }
}

// ─── UpdateStream ─────────────────────────────────────────────────────────────

/// Unsolicited server messages, undecoded.
#[derive(Debug)]
pub struct UpdateStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl UpdateStream {
    /// Wait for the next update. Returns `None` once the instance is gone.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

// ─── Instance ─────────────────────────────────────────────────────────────────

struct InstanceInner {
    commands:   mpsc::UnboundedSender<Command>,
    ids:        RequestIdAllocator,
    dc_config:  watch::Sender<DcConfig>,
    subscribed: AtomicBool,
    allow_ipv6: bool,
}

/// A running MTProto client core. Cheap to clone; the runner stops when the
/// last clone is dropped.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    /// Start the runner and discover the DC table.
    ///
    /// The main DC is asked first, then every other known DC, until one
    /// answers `help.getConfig`.
    pub async fn connect(config: Config) -> Result<Self, StartError> {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let ids = RequestIdAllocator::default();
        let dispatcher = Dispatcher::new(config.clone(), ids.clone());
        let main_dc = dispatcher.main_dc();
        let (dc_config, _) = watch::channel(dispatcher.dc_config().clone());

        let runner = Runner {
            dispatcher,
            commands: commands.downgrade(),
            updates: None,
            workers: HashMap::new(),
            worker: WorkerSettings {
                transport:       config.transport.clone(),
                proxy:           config.proxy.clone(),
                connect_timeout: config.connect_timeout,
                idle_timeout:    config.idle_timeout(),
            },
            ping_interval: config.ping_interval,
        };
        tokio::spawn(runner.run(commands_rx));

        let instance = Self {
            inner: Arc::new(InstanceInner {
                commands,
                ids,
                dc_config,
                subscribed: AtomicBool::new(false),
                allow_ipv6: config.allow_ipv6,
            }),
        };
        tracing::info!("[instance] bootstrapping (main DC{main_dc}, test_mode={})", config.test_mode);
        instance.discover(main_dc).await?;
        Ok(instance)
    }

    async fn discover(&self, first: i32) -> Result<DcConfig, StartError> {
        let mut order = vec![first];
        order.extend(self.current_config().dc_ids().into_iter().filter(|dc| *dc != first));

        for dc_id in order {
            match self.invoke(&functions::help::GetConfig {}, Target::Dc(dc_id)).await {
                Ok(enums::Config::Config(cfg)) => {
                    let dcs = DcConfig::from_server(&cfg, self.inner.allow_ipv6);
                    if dcs.addresses.is_empty() {
                        tracing::warn!("[instance] DC{dc_id} returned an empty DC list");
                        continue;
                    }
                    tracing::info!("[instance] configured from DC{dc_id}: {} addresses", dcs.addresses.len());
                    self.inner.dc_config.send_replace(dcs.clone());
                    let _ = self.inner.commands.send(Command::UpdateConfig(dcs.clone()));
                    return Ok(dcs);
                }
                Err(e) => {
                    if let Some(error) = e.key_exchange_error() {
                        return Err(StartError::KeyExchangeFailed { dc_id, error: error.clone() });
                    }
                    tracing::warn!("[instance] config discovery on DC{dc_id} failed: {e}");
                }
            }
        }
        Err(StartError::NoReachableDc)
    }

    /// Queue a pre-serialized request. Never blocks.
    pub fn submit(&self, body: Vec<u8>, target: Target) -> RequestHandle {
        let id = self.inner.ids.next();
        let (reply, rx) = oneshot::channel();
        // If the runner is gone the reply sender is dropped with the command
        // and the handle resolves to `Dropped`.
        let _ = self.inner.commands.send(Command::Call { id, body, target, reply });
        RequestHandle { id, rx, commands: self.inner.commands.downgrade(), done: false }
    }

    /// Send a typed request and decode its answer.
    pub async fn invoke<R: RemoteCall>(&self, req: &R, target: Target) -> Result<R::Return, InvocationError> {
        let bytes = self.submit(req.to_bytes(), target).await?;
        Ok(R::Return::from_bytes(&bytes)?)
    }

    /// The DC table currently in use.
    pub fn current_config(&self) -> DcConfig {
        self.inner.dc_config.borrow().clone()
    }

    /// Watch DC table changes.
    pub fn watch_config(&self) -> watch::Receiver<DcConfig> {
        self.inner.dc_config.subscribe()
    }

    /// Ask the servers for a fresh DC table.
    pub async fn refresh_config(&self) -> Result<DcConfig, StartError> {
        let main_dc = self.export_state().await.map_err(|_| StartError::NoReachableDc)?.main_dc;
        self.discover(main_dc).await
    }

    /// Keys, salts and clock offsets to persist for the next run.
    pub async fn export_state(&self) -> Result<PersistedState, InvocationError> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Snapshot(tx))?;
        rx.await.map_err(|_| InvocationError::Dropped)
    }

    /// Forget the auth key of `dc_id`; its connections negotiate a new one.
    pub fn destroy_key(&self, dc_id: i32) -> Result<(), InvocationError> {
        self.command(Command::DestroyKey(dc_id))
    }

    /// Authorize DC `dc_id` with the account logged in on the main DC.
    pub async fn export_authorization(&self, dc_id: i32) -> Result<(), InvocationError> {
        let enums::auth::ExportedAuthorization::ExportedAuthorization(exported) = self
            .invoke(&functions::auth::ExportAuthorization { dc_id }, Target::Main)
            .await?;
        self.invoke(
            &functions::auth::ImportAuthorization { id: exported.id, bytes: exported.bytes },
            Target::Dc(dc_id),
        )
        .await?;
        tracing::info!("[instance] authorization exported to DC{dc_id}");
        Ok(())
    }

    /// The update stream. Only the first call gets it; updates that arrive
    /// before it is taken are dropped.
    pub fn updates(&self) -> Option<UpdateStream> {
        if self.inner.subscribed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.command(Command::Subscribe(tx)).ok()?;
        Some(UpdateStream { rx })
    }

    /// Close every connection; outstanding requests fail with `Dropped`.
    pub fn shutdown(&self) {
        let _ = self.inner.commands.send(Command::Shutdown);
    }

    fn command(&self, cmd: Command) -> Result<(), InvocationError> {
        self.inner.commands.send(cmd).map_err(|_| InvocationError::Dropped)
    }
}

// ─── Runner ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct WorkerSettings {
    transport:       TransportKind,
    proxy:           Option<Socks5Config>,
    connect_timeout: Duration,
    idle_timeout:    Duration,
}

/// Owns the dispatcher and carries out its actions.
struct Runner {
    dispatcher:    Dispatcher,
    commands:      mpsc::WeakUnboundedSender<Command>,
    updates:       Option<mpsc::UnboundedSender<Vec<u8>>>,
    workers:       HashMap<ConnectionId, WorkerHandle>,
    worker:        WorkerSettings,
    ping_interval: Duration,
}

impl Runner {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => {
                        tracing::info!("[instance] shutting down");
                        self.dispatcher.shutdown();
                        self.execute(&events_tx);
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                },
                Some(event) = events.recv() => self.dispatcher.on_event(event),
                _ = ticker.tick() => self.dispatcher.tick(),
            }
            self.execute(&events_tx);
        }
        self.workers.clear();
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Call { id, body, target, reply } => self.dispatcher.submit(id, body, target, reply),
            Command::Cancel(id) => self.dispatcher.cancel(id),
            Command::Timer(timer) => self.dispatcher.on_timer(timer),
            Command::Snapshot(tx) => {
                let _ = tx.send(self.dispatcher.snapshot());
            }
            Command::DestroyKey(dc_id) => self.dispatcher.destroy_key(dc_id),
            Command::UpdateConfig(dcs) => self.dispatcher.update_config(dcs),
            Command::Subscribe(tx) => self.updates = Some(tx),
            Command::Shutdown => {}
        }
    }

    fn execute(&mut self, events: &mpsc::UnboundedSender<connection::Event>) {
        loop {
            let actions = self.dispatcher.take_actions();
            if actions.is_empty() {
                break;
            }
            for action in actions {
                self.perform(action, events);
            }
        }
    }

    fn perform(&mut self, action: Action, events: &mpsc::UnboundedSender<connection::Event>) {
        match action {
            Action::Connect { conn, epoch, addr, dh_dc_id, key, session_id, delay } => {
                let params = WorkerParams {
                    conn,
                    epoch,
                    addr,
                    dh_dc_id,
                    key,
                    session_id,
                    delay,
                    transport:       self.worker.transport.clone(),
                    proxy:           self.worker.proxy.clone(),
                    connect_timeout: self.worker.connect_timeout,
                    idle_timeout:    self.worker.idle_timeout,
                };
                // Replacing the handle stops the previous worker.
                self.workers.insert(conn, connection::spawn(params, events.clone()));
            }
            Action::Send { conn, payload } => {
                let sent = match self.workers.get(&conn) {
                    Some(worker) => worker.send(payload),
                    None => Err(ConnectionError::NotReady),
                };
                if let Err(e) = sent {
                    tracing::debug!("[instance] payload for {conn} not handed off: {e}");
                    self.dispatcher.on_send_failed(conn, e);
                }
            }
            Action::Disconnect { conn } => {
                if let Some(worker) = self.workers.remove(&conn) {
                    worker.stop();
                }
            }
            Action::Schedule { after, timer } => {
                let commands = self.commands.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx.send(Command::Timer(timer));
                    }
                });
            }
            Action::Update(body) => match &self.updates {
                Some(tx) => {
                    if tx.send(body).is_err() {
                        self.updates = None;
                    }
                }
                None => tracing::trace!("[instance] update dropped, nobody subscribed"),
            },
        }
    }
}
