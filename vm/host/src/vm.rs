//! The host controller.
//!
//! A [`Vm`] launches a worker through a [`Sandbox`], then drives it purely by
//! messages. Every request opens a tunnel and waits for the worker's single
//! `resolve` or `reject` on it. The host keeps a mirror of the worker's
//! enclosure table: changes are committed to it by the reader task when the
//! worker confirms them, so the mirror follows the worker's order of
//! operations. The mirror carries the host's own event listeners, mute flags
//! and the ports that own pending tunnels.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use enclosure_core::{
    graph, name, user_event, validate_event, Dependency, EnclosureTable, Error, Filter, ListenerId,
    Result, Settle, TunnelId, Tunnels, BOOT_TUNNEL, MAX_ARGUMENTS,
};
use enclosure_protocol::{Frame, Listener, Message, Sandbox, Shouter, Undecodable};
use enclosure_worker::ThreadSandbox;

use crate::config::VmConfig;
use crate::event::{dispatch, Callback, Events, VmEvent};
use crate::function::HostFunction;

const EVENT_CAPACITY: usize = 64;

/// Mirror update applied when the worker confirms a request.
type Commit = Box<dyn FnOnce(&mut HostState) + Send>;

/// A request waiting for the worker's answer.
struct Pending {
    reply: oneshot::Sender<Result<Value>>,
    commit: Option<Commit>,
    /// Applied instead of `commit` when the worker refuses.
    undo: Option<Commit>,
}

impl Settle for Pending {
    type Value = Value;

    fn resolve(self, value: Value) {
        if self.reply.send(Ok(value)).is_err() {
            debug!("caller stopped waiting");
        }
    }

    fn reject(self, error: Error) {
        if self.reply.send(Err(error)).is_err() {
            debug!("caller stopped waiting");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Booting,
    Running,
    Stopped,
}

struct HostState {
    table: EnclosureTable<Callback, ()>,
    tunnels: Tunnels<Pending>,
    /// Indexed by `idx`; a slot is emptied when the worker refuses the binding.
    functions: Vec<Option<Arc<dyn HostFunction>>>,
    shouter: Option<Shouter>,
    status: Status,
    last_pong: Instant,
    /// Boot time reported by the worker.
    booted_in: Duration,
}

impl HostState {
    fn shout(&self, message: &Message) -> Result<()> {
        match &self.shouter {
            Some(shouter) => shouter.shout(message),
            None => Err(Error::Stopped),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        match self.status {
            Status::Stopped => Err(Error::Stopped),
            _ => Ok(()),
        }
    }
}

struct VmInner {
    id: Uuid,
    config: VmConfig,
    state: Mutex<HostState>,
    events: Events,
    runtime: Handle,
    span: Span,
}

impl VmInner {
    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop the VM, rejecting every pending tunnel with `reason`.
    ///
    /// Returns `false` if the VM was already stopped.
    fn shutdown(&self, reason: Error) -> bool {
        let pending = {
            let mut state = self.lock();
            if state.status == Status::Stopped {
                return false;
            }
            state.status = Status::Stopped;
            state.shouter = None;
            state.tunnels.drain()
        };

        let kind = reason.kind();
        for (tunnel, pending) in pending {
            debug!(tunnel, reason = %kind, "rejecting on shutdown");
            pending.reject(reason.clone());
        }
        info!(reason = %kind, "vm stopped");
        self.events.send(VmEvent::Stopped { reason: kind });
        true
    }

    /// Answer a worker-opened tunnel.
    fn answer(&self, tunnel: TunnelId, result: Result<Value>) {
        let message = match result {
            Ok(payload) => Message::resolve(tunnel, payload),
            Err(e) => Message::reject(tunnel, &e),
        };
        if let Err(e) = self.lock().shout(&message) {
            debug!(tunnel, error = %e, "worker is gone");
        }
    }

    fn handle(self: &Arc<Self>, frame: Frame) {
        let message = match frame {
            Ok(message) => message,
            Err(Undecodable {
                tunnel: Some(tunnel),
                error,
            }) => {
                warn!(tunnel, error = %error, "undecodable frame from worker");
                return self.answer(tunnel, Err(error));
            }
            Err(Undecodable {
                tunnel: None,
                error,
            }) => {
                return self.worker_error(error.to_string(), true);
            }
        };
        debug!(name = message.name(), tunnel = ?message.tunnel(), "received");

        match message {
            Message::Pong => self.lock().last_pong = Instant::now(),
            Message::Ping => {
                if let Err(e) = self.lock().shout(&Message::Pong) {
                    debug!(error = %e, "worker is gone");
                }
            }
            Message::Resolve { tunnel, payload } => self.settle(tunnel, Ok(payload)),
            Message::Reject { tunnel, error } => self.settle(tunnel, Err(Error::Remote(error))),
            Message::Emit {
                enclosure,
                event,
                args,
            } => self.cast_host(&enclosure, &event, &args),
            Message::Call {
                enclosure,
                tunnel,
                idx,
                args,
            } => self.call(&enclosure, tunnel, idx, args),
            Message::Error { message, fatal } => self.worker_error(message, fatal),
            other => match other.tunnel() {
                Some(tunnel) => self.answer(
                    tunnel,
                    Err(Error::InvalidMessage(format!(
                        "{} is only sent by the host",
                        other.name()
                    ))),
                ),
                None => debug!(name = other.name(), "ignoring"),
            },
        }
    }

    fn settle(&self, tunnel: TunnelId, result: Result<Value>) {
        let mut state = self.lock();
        let (owner, pending) = match state.tunnels.take(tunnel) {
            Ok(taken) => taken,
            Err(e) => {
                debug!(tunnel, error = %e, "settlement for a tunnel that is already closed");
                return;
            }
        };
        if let Some(port) = owner {
            state.table.detach_tunnel(port, tunnel);
        }

        let Pending {
            reply,
            commit,
            undo,
        } = pending;
        let apply = if result.is_ok() { commit } else { undo };
        if let Some(apply) = apply {
            apply(&mut *state);
        }
        drop(state);
        if reply.send(result).is_err() {
            debug!(tunnel, "caller stopped waiting");
        }
    }

    /// Dispatch an event arriving from the worker to host listeners.
    fn cast_host(&self, enclosure: &str, event: &str, args: &[Value]) {
        let dispatches = self.lock().table.cast(enclosure, &user_event(event));
        match dispatches {
            Ok(dispatches) => dispatch(&self.runtime, &self.events, dispatches, event, args),
            Err(e) => {
                warn!(enclosure, event, error = %e, "dropping event from worker");
                self.events
                    .diagnostic(format!("event {event} on {enclosure} dropped: {e}"));
            }
        }
    }

    /// Run host function `idx` for the worker and answer on its tunnel.
    fn call(self: &Arc<Self>, enclosure: &str, tunnel: TunnelId, idx: u64, args: Vec<Value>) {
        let function = usize::try_from(idx)
            .ok()
            .and_then(|i| self.lock().functions.get(i).cloned().flatten());
        let Some(function) = function else {
            return self.answer(
                tunnel,
                Err(Error::InvalidMessage(format!("no host function {idx}"))),
            );
        };

        debug!(enclosure, idx, tunnel, "host call");
        let inner = Arc::downgrade(self);
        self.runtime.spawn(
            async move {
                let result = function.call(args).await;
                if let Some(inner) = inner.upgrade() {
                    inner.answer(tunnel, result);
                }
            }
            .instrument(self.span.clone()),
        );
    }

    fn worker_error(&self, message: String, fatal: bool) {
        if fatal {
            error!(message = %message, "fatal worker error");
        } else {
            warn!(message = %message, "worker diagnostic");
        }
        self.events.send(VmEvent::WorkerError {
            message: message.clone(),
            fatal,
        });
        if fatal && self.config.stop_on_worker_error {
            self.shutdown(Error::Stopped);
        }
    }
}

async fn read(inner: Weak<VmInner>, mut listener: Listener) {
    while let Some(frame) = listener.listen().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle(frame);
    }
    if let Some(inner) = inner.upgrade() {
        if inner.shutdown(Error::Stopped) {
            warn!("worker hung up");
        }
    }
}

async fn watch(inner: Weak<VmInner>, interval: Duration, threshold: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let silent_for = {
            let state = inner.lock();
            if state.status == Status::Stopped {
                return;
            }
            if let Err(e) = state.shout(&Message::Ping) {
                debug!(error = %e, "cannot ping worker");
                return;
            }
            state.last_pong.elapsed()
        };
        if silent_for > threshold {
            warn!(
                silent_ms = silent_for.as_millis() as u64,
                "worker unresponsive"
            );
            inner.events.send(VmEvent::Unresponsive);
            inner.shutdown(Error::Stopped);
            return;
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::InvalidMessage(e.to_string()))
}

/// Handle to a running enclosure VM. Cheap to clone.
///
/// Dropping the last handle stops the worker.
#[derive(Clone)]
pub struct Vm {
    inner: Arc<VmInner>,
}

impl Vm {
    /// Boot a VM whose worker runs on its own thread.
    pub async fn start(config: VmConfig) -> Result<Self> {
        let sandbox = ThreadSandbox::new(config.worker.clone());
        Self::start_with(sandbox, config).await
    }

    /// Boot a VM whose worker is launched by `sandbox`.
    ///
    /// Fails with `BootTimeout` if the worker does not resolve the boot tunnel
    /// within `config.boot_timeout`.
    pub async fn start_with<S: Sandbox>(sandbox: S, config: VmConfig) -> Result<Self> {
        let id = Uuid::new_v4();
        let span = info_span!("vm", %id);
        let (shouter, listener) = sandbox.launch()?.split();

        let (boot_tx, boot_rx) = oneshot::channel();
        let mut tunnels = Tunnels::new();
        tunnels.open_boot(Pending {
            reply: boot_tx,
            commit: None,
            undo: None,
        });

        let inner = Arc::new(VmInner {
            id,
            state: Mutex::new(HostState {
                table: EnclosureTable::new(),
                tunnels,
                functions: Vec::new(),
                shouter: Some(shouter),
                status: Status::Booting,
                last_pong: Instant::now(),
                booted_in: Duration::ZERO,
            }),
            events: Events::new(EVENT_CAPACITY),
            runtime: Handle::current(),
            span: span.clone(),
            config,
        });
        tokio::spawn(read(Arc::downgrade(&inner), listener).instrument(span.clone()));

        let boot_timeout = inner.config.boot_timeout;
        let booted = match time::timeout(boot_timeout, boot_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Stopped),
            Err(_) => {
                let timeout_ms = u64::try_from(boot_timeout.as_millis()).unwrap_or(u64::MAX);
                let error = Error::BootTimeout(timeout_ms);
                let _ = inner.lock().tunnels.reject(BOOT_TUNNEL, error.clone());
                Err(error)
            }
        };

        let elapsed_ms = match booted {
            Ok(payload) => payload.as_u64().unwrap_or_default(),
            Err(e) => {
                span.in_scope(|| error!(error = %e, "boot failed"));
                inner.shutdown(Error::Stopped);
                return Err(e);
            }
        };

        {
            let mut state = inner.lock();
            if state.status == Status::Stopped {
                return Err(Error::Stopped);
            }
            state.status = Status::Running;
            state.last_pong = Instant::now();
            state.booted_in = Duration::from_millis(elapsed_ms);
        }
        span.in_scope(|| info!(elapsed_ms, "vm booted"));
        inner.events.send(VmEvent::Booted { elapsed_ms });
        tokio::spawn(
            watch(
                Arc::downgrade(&inner),
                inner.config.ping_interval,
                inner.config.unresponsive_after,
            )
            .instrument(span),
        );

        Ok(Self { inner })
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &VmConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().status == Status::Running
    }

    /// How long the worker took to boot, as it reported.
    ///
    /// `Booted` is broadcast before any handle exists, so this is where the
    /// boot time stays observable.
    pub fn boot_elapsed(&self) -> Duration {
        self.inner.lock().booted_in
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<VmEvent> {
        self.inner.events.subscribe()
    }

    /// Stop the VM; pending requests are rejected with `Stopped`.
    ///
    /// Returns `false` if it had already stopped.
    pub fn stop(&self) -> bool {
        let _guard = self.inner.span.enter();
        self.inner.shutdown(Error::Stopped)
    }

    /// Tear the VM down; pending requests are rejected with `Deleted`.
    pub fn dispose(&self) -> bool {
        let _guard = self.inner.span.enter();
        self.inner.shutdown(Error::Deleted)
    }

    /// Send a request and wait for the worker's answer.
    ///
    /// `owner` names the enclosure on whose behalf the tunnel is opened;
    /// deleting it rejects the request with `Deleted`. `commit` is applied to
    /// the mirror when the worker confirms.
    async fn request<B>(
        &self,
        owner: Option<&str>,
        commit: Option<Commit>,
        build: B,
    ) -> Result<Value>
    where
        B: FnOnce(TunnelId) -> Message,
    {
        self.request_or_undo(owner, commit, None, build).await
    }

    /// [`request`](Self::request), with `undo` applied to the mirror if the
    /// worker refuses.
    async fn request_or_undo<B>(
        &self,
        owner: Option<&str>,
        commit: Option<Commit>,
        undo: Option<Commit>,
        build: B,
    ) -> Result<Value>
    where
        B: FnOnce(TunnelId) -> Message,
    {
        let rx = {
            let mut state = self.inner.lock();
            state.ensure_live()?;
            let port = owner.map(|n| state.table.port_of(n)).transpose()?;

            let (tx, rx) = oneshot::channel();
            let tunnel = state.tunnels.open(
                port,
                Pending {
                    reply: tx,
                    commit,
                    undo,
                },
            );
            if let Some(port) = port {
                state.table.attach_tunnel(port, tunnel);
            }

            let message = build(tunnel);
            debug!(parent: &self.inner.span, name = message.name(), tunnel, "request");
            if let Err(e) = state.shout(&message) {
                let _ = state.tunnels.take(tunnel);
                if let Some(port) = port {
                    state.table.detach_tunnel(port, tunnel);
                }
                return Err(e);
            }
            rx
        };
        rx.await.map_err(|_| Error::Stopped)?
    }

    /// Create an enclosure. Its parent must already exist.
    pub async fn create(&self, enclosure: &str) -> Result<()> {
        name::validate(enclosure)?;
        let name = enclosure.to_string();
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.create(&name) {
                warn!(error = %e, "mirror diverged on create");
            }
        });
        self.request(None, Some(commit), |tunnel| Message::Create {
            enclosure: enclosure.to_string(),
            tunnel,
        })
        .await?;
        Ok(())
    }

    /// Delete an enclosure and all its descendants, returning the removed
    /// names. Requests pending on behalf of any of them are rejected with
    /// `Deleted`.
    pub async fn delete(&self, enclosure: &str) -> Result<Vec<String>> {
        name::validate(enclosure)?;
        let name = enclosure.to_string();
        let commit: Commit =
            Box::new(
                move |state: &mut HostState| match state.table.delete(&name) {
                    Ok(deletion) => {
                        for (tunnel, pending) in state.tunnels.take_many(deletion.tunnels) {
                            debug!(tunnel, "rejecting request of deleted enclosure");
                            pending.reject(Error::Deleted);
                        }
                    }
                    Err(e) => warn!(error = %e, "mirror diverged on delete"),
                },
            );
        let removed = self
            .request(None, Some(commit), |tunnel| Message::Delete {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(removed)
    }

    /// Fold an enclosure into its parent.
    pub async fn merge(&self, enclosure: &str) -> Result<()> {
        let name = enclosure.to_string();
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.merge(&name) {
                warn!(error = %e, "mirror diverged on merge");
            }
        });
        self.request(Some(enclosure), Some(commit), |tunnel| Message::Merge {
            enclosure: enclosure.to_string(),
            tunnel,
        })
        .await?;
        Ok(())
    }

    /// Link `target` to `enclosure`; returns whether a link was added.
    pub async fn link(&self, enclosure: &str, target: &str) -> Result<bool> {
        let (name, linked) = (enclosure.to_string(), target.to_string());
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.link(&name, &linked) {
                warn!(error = %e, "mirror diverged on link");
            }
        });
        let added = self
            .request(Some(enclosure), Some(commit), |tunnel| Message::Link {
                enclosure: enclosure.to_string(),
                target: target.to_string(),
                tunnel,
            })
            .await?;
        decode(added)
    }

    /// Remove a link; returns whether it existed.
    pub async fn unlink(&self, enclosure: &str, target: &str) -> Result<bool> {
        let (name, linked) = (enclosure.to_string(), target.to_string());
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.unlink(&name, &linked) {
                warn!(error = %e, "mirror diverged on unlink");
            }
        });
        let removed = self
            .request(Some(enclosure), Some(commit), |tunnel| Message::Unlink {
                enclosure: enclosure.to_string(),
                target: target.to_string(),
                tunnel,
            })
            .await?;
        decode(removed)
    }

    /// Stop forwarding user events across the boundary; returns the previous value.
    pub async fn mute(&self, enclosure: &str) -> Result<bool> {
        let name = enclosure.to_string();
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.mute(&name) {
                warn!(error = %e, "mirror diverged on mute");
            }
        });
        let previous = self
            .request(Some(enclosure), Some(commit), |tunnel| Message::Mute {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(previous)
    }

    /// Resume forwarding user events; returns the previous value.
    pub async fn unmute(&self, enclosure: &str) -> Result<bool> {
        let name = enclosure.to_string();
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.unmute(&name) {
                warn!(error = %e, "mirror diverged on unmute");
            }
        });
        let previous = self
            .request(Some(enclosure), Some(commit), |tunnel| Message::Unmute {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(previous)
    }

    pub async fn is_muted(&self, enclosure: &str) -> Result<bool> {
        let muted = self
            .request(Some(enclosure), None, |tunnel| Message::IsMuted {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(muted)
    }

    pub async fn list_root_enclosures(&self) -> Result<Vec<String>> {
        let roots = self
            .request(None, None, |tunnel| Message::ListRootEnclosures { tunnel })
            .await?;
        decode(roots)
    }

    /// Every dependency visible in `enclosure`, inherited ones included.
    pub async fn list_installed(&self, enclosure: &str) -> Result<Vec<String>> {
        let installed = self
            .request(Some(enclosure), None, |tunnel| Message::ListInstalled {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(installed)
    }

    pub async fn list_links_to(&self, enclosure: &str) -> Result<Vec<String>> {
        let links = self
            .request(Some(enclosure), None, |tunnel| Message::ListLinksTo {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(links)
    }

    pub async fn list_linked_from(&self, enclosure: &str) -> Result<Vec<String>> {
        let linkers = self
            .request(Some(enclosure), None, |tunnel| Message::ListLinkedFrom {
                enclosure: enclosure.to_string(),
                tunnel,
            })
            .await?;
        decode(linkers)
    }

    /// Descendants at most `depth` segments deeper; `0` means unlimited.
    pub async fn sub_enclosures(&self, enclosure: &str, depth: usize) -> Result<Vec<String>> {
        let subs = self
            .request(Some(enclosure), None, |tunnel| Message::GetSubEnclosures {
                enclosure: enclosure.to_string(),
                depth,
                tunnel,
            })
            .await?;
        decode(subs)
    }

    /// Run `dependency` once and cache its result in `enclosure` under its name.
    pub async fn install(&self, enclosure: &str, dependency: Dependency) -> Result<()> {
        let (name, dependency_name) = (enclosure.to_string(), dependency.name().to_string());
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.define(&name, &dependency_name, ()) {
                warn!(error = %e, "mirror diverged on install");
            }
        });
        self.request(Some(enclosure), Some(commit), |tunnel| Message::Install {
            enclosure: enclosure.to_string(),
            tunnel,
            dependency,
        })
        .await?;
        Ok(())
    }

    /// Install a set of dependencies that may import each other, in an order
    /// where every import is installed before its importer.
    pub async fn install_all(&self, enclosure: &str, dependencies: Vec<Dependency>) -> Result<()> {
        let installed: BTreeSet<String> =
            self.list_installed(enclosure).await?.into_iter().collect();
        let ordered = graph::sort(dependencies, |n| installed.contains(n))?;
        for dependency in ordered {
            self.install(enclosure, dependency).await?;
        }
        Ok(())
    }

    /// Run `dependency` in `enclosure` with `args` and return its result.
    pub async fn execute(
        &self,
        enclosure: &str,
        dependency: Dependency,
        args: Map<String, Value>,
    ) -> Result<Value> {
        if args.len() > MAX_ARGUMENTS {
            return Err(Error::TooManyArguments {
                count: args.len(),
                limit: MAX_ARGUMENTS,
            });
        }
        self.request(Some(enclosure), None, |tunnel| Message::Execute {
            enclosure: enclosure.to_string(),
            tunnel,
            dependency,
            args,
        })
        .await
    }

    /// Bind `function` in `enclosure` to a host function.
    pub async fn predefine<F>(&self, enclosure: &str, function: &str, f: F) -> Result<()>
    where
        F: HostFunction + 'static,
    {
        let idx = {
            let mut state = self.inner.lock();
            state.ensure_live()?;
            state.functions.push(Some(Arc::new(f)));
            state.functions.len() - 1
        };
        let (name, function_name) = (enclosure.to_string(), function.to_string());
        let commit: Commit = Box::new(move |state: &mut HostState| {
            if let Err(e) = state.table.define(&name, &function_name, ()) {
                warn!(error = %e, "mirror diverged on predefine");
            }
        });
        let undo: Commit = Box::new(move |state: &mut HostState| {
            if let Some(slot) = state.functions.get_mut(idx) {
                *slot = None;
            }
        });
        let bound = self
            .request_or_undo(Some(enclosure), Some(commit), Some(undo), |tunnel| {
                Message::Predefine {
                    enclosure: enclosure.to_string(),
                    tunnel,
                    idx: idx as u64,
                    function: function.to_string(),
                }
            })
            .await;
        if bound.is_err() {
            // Rejections that never reached the worker (delete, stop) skip `undo`.
            if let Some(slot) = self.inner.lock().functions.get_mut(idx) {
                *slot = None;
            }
        }
        bound.map(|_| ())
    }

    /// Cast a user event on `enclosure`.
    ///
    /// Host listeners in the enclosure's audience run on their own tasks; the
    /// event is forwarded to the worker unless the enclosure is muted.
    pub fn emit(&self, enclosure: &str, event: &str, args: Vec<Value>) -> Result<()> {
        validate_event(event)?;
        let mut state = self.inner.lock();
        state.ensure_live()?;
        let muted = state.table.is_muted(enclosure)?;
        let dispatches = state.table.cast(enclosure, &user_event(event))?;
        if !muted {
            state.shout(&Message::Emit {
                enclosure: enclosure.to_string(),
                event: event.to_string(),
                args: args.clone(),
            })?;
        }
        drop(state);
        dispatch(
            &self.inner.runtime,
            &self.inner.events,
            dispatches,
            event,
            &args,
        );
        Ok(())
    }

    /// Listen for user events on `enclosure` matching `filter`.
    pub fn on<F>(&self, enclosure: &str, filter: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let filter = Self::user_filter(filter)?;
        self.inner
            .lock()
            .table
            .on(enclosure, filter, Arc::new(callback))
    }

    /// Like [`Vm::on`], but the listener is removed after its first call.
    pub fn once<F>(&self, enclosure: &str, filter: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&str, &[Value]) + Send + Sync + 'static,
    {
        let filter = Self::user_filter(filter)?;
        self.inner
            .lock()
            .table
            .once(enclosure, filter, Arc::new(callback))
    }

    /// Remove a listener; returns whether it was registered.
    pub fn off(&self, listener: ListenerId) -> bool {
        self.inner.lock().table.off(listener)
    }

    fn user_filter(filter: &str) -> Result<Filter> {
        Filter::compile(filter)?;
        Filter::compile(&user_event(filter)).map_err(|_| Error::InvalidFilter(filter.to_string()))
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().status == Status::Stopped
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.inner.id)
            .field("status", &self.inner.lock().status)
            .finish()
    }
}
