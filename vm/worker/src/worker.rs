//! The worker side of the boundary.
//!
//! A [`Worker`] owns the script engine, its own enclosure table and the
//! tunnels it has opened towards the host. It runs on a single thread and is
//! driven entirely by the frames it hears: every request is answered with one
//! `resolve` or `reject` on the request's tunnel.
//!
//! Event listeners are never called from inside `cast`. Matching callbacks are
//! queued and run after the current message has been handled, one batch per
//! turn.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Instant;

use boa_engine::object::{JsObject, ObjectInitializer};
use boa_engine::property::Attribute;
use boa_engine::{Context, JsArgs, JsString, JsValue};
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, trace, warn};

use enclosure_core::dependency::is_identifier;
use enclosure_core::{
    user_event, validate_event, Dependency, EnclosureTable, Error, Filter, ListenerId, Port,
    Result, TunnelId, Tunnels, BOOT_TUNNEL, EVENTS_BINDING, MAX_ARGUMENTS,
};
use enclosure_protocol::{Endpoint, Frame, Listener, Message, Shouter, TryListen, Undecodable};

use crate::config::WorkerConfig;
use crate::script::{self, native, object_of, script_error, throwable, type_error, Script};

/// Settlement functions of a promise handed to sandboxed code.
struct PendingCall {
    resolve: JsObject,
    reject: JsObject,
}

/// A listener callback waiting for its turn.
struct Invocation {
    enclosure: String,
    callback: JsObject,
    event: String,
    args: Vec<JsValue>,
}

struct WorkerState {
    table: EnclosureTable<JsObject, JsValue>,
    tunnels: Tunnels<PendingCall>,
    scheduled: VecDeque<Invocation>,
    shouter: Shouter,
}

type Shared = Rc<RefCell<WorkerState>>;

fn shout(state: &Shared, message: &Message) {
    if let Err(e) = state.borrow().shouter.shout(message) {
        debug!(name = message.name(), error = %e, "host is gone");
    }
}

fn reply(state: &Shared, tunnel: TunnelId, result: Result<Value>) {
    let message = match result {
        Ok(payload) => Message::resolve(tunnel, payload),
        Err(e) => {
            debug!(tunnel, error = %e, "rejecting");
            Message::reject(tunnel, &e)
        }
    };
    shout(state, &message);
}

fn name_of(state: &Shared, port: Port) -> Result<String> {
    state
        .borrow()
        .table
        .name_of(port)
        .map(str::to_string)
        .ok_or(Error::Deleted)
}

/// `events.cast` from sandboxed code: dispatch locally, then forward to the
/// host unless the enclosure is muted.
fn cast_user(
    state: &Shared,
    script: &Script,
    port: Port,
    event: &str,
    args: Vec<JsValue>,
    context: &mut Context,
) -> Result<()> {
    validate_event(event)?;
    let name = name_of(state, port)?;
    let muted = state.borrow().table.is_muted(&name)?;
    let forwarded = if muted {
        None
    } else {
        Some(
            args.iter()
                .map(|a| script.to_json(a, context))
                .collect::<Result<Vec<_>>>()?,
        )
    };

    {
        let mut state = state.borrow_mut();
        let dispatches = state.table.cast(&name, &user_event(event))?;
        for dispatch in dispatches {
            state.scheduled.push_back(Invocation {
                enclosure: dispatch.enclosure,
                callback: dispatch.callback,
                event: event.to_string(),
                args: args.clone(),
            });
        }
    }

    if let Some(args) = forwarded {
        shout(
            state,
            &Message::Emit {
                enclosure: name,
                event: event.to_string(),
                args,
            },
        );
    }
    Ok(())
}

fn add_listener(
    state: &Shared,
    port: Port,
    once: bool,
    args: &[JsValue],
    context: &mut Context,
) -> Result<ListenerId> {
    let pattern = args
        .get_or_undefined(0)
        .to_string(context)
        .map_err(script_error)?
        .to_std_string_escaped();
    let Some(callback) = object_of(args.get_or_undefined(1)).filter(JsObject::is_callable) else {
        return Err(Error::Script("listener is not a function".into()));
    };
    let filter = Filter::compile(&user_event(&pattern))
        .map_err(|_| Error::InvalidFilter(pattern.clone()))?;

    let name = name_of(state, port)?;
    let mut state = state.borrow_mut();
    if once {
        state.table.once(&name, filter, callback)
    } else {
        state.table.on(&name, filter, callback)
    }
}

/// A sandboxed call into host function `idx`. Returns a promise settled when
/// the host answers on the call's tunnel.
fn call_host(
    state: &Shared,
    script: &Script,
    port: Port,
    idx: u64,
    args: &[JsValue],
    context: &mut Context,
) -> Result<JsValue> {
    let name = name_of(state, port)?;
    let args = args
        .iter()
        .map(|a| script.to_json(a, context))
        .collect::<Result<Vec<_>>>()?;
    let (promise, resolve, reject) = script.pending(context);

    let tunnel = {
        let mut state = state.borrow_mut();
        let id = state
            .tunnels
            .open(Some(port), PendingCall { resolve, reject });
        state.table.attach_tunnel(port, id);
        id
    };
    trace!(enclosure = %name, idx, tunnel, "calling host");
    shout(
        state,
        &Message::Call {
            enclosure: name,
            tunnel,
            idx,
            args,
        },
    );
    Ok(promise)
}

/// The isolated half of an enclosure VM.
pub struct Worker {
    context: Context,
    script: Script,
    state: Shared,
    listener: Listener,
    started: Instant,
}

impl Worker {
    /// Set up the engine behind `endpoint`.
    ///
    /// If the engine cannot be prepared, the boot tunnel is rejected before
    /// the error is returned.
    pub fn new(endpoint: Endpoint, config: &WorkerConfig) -> Result<Self> {
        let started = Instant::now();
        let (shouter, listener) = endpoint.split();
        let mut context = script::context(config);
        let script = match Script::capture(&mut context) {
            Ok(script) => script,
            Err(e) => {
                error!(error = %e, "worker failed to boot");
                let _ = shouter.shout(&Message::reject(BOOT_TUNNEL, &e));
                return Err(e);
            }
        };

        Ok(Self {
            context,
            script,
            state: Rc::new(RefCell::new(WorkerState {
                table: EnclosureTable::new(),
                tunnels: Tunnels::new(),
                scheduled: VecDeque::new(),
                shouter,
            })),
            listener,
            started,
        })
    }

    /// Announce boot and serve frames until the host goes away.
    pub fn run(mut self) {
        let elapsed = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(elapsed_ms = elapsed, "worker booted");
        shout(&self.state, &Message::resolve(BOOT_TUNNEL, elapsed));

        loop {
            let idle = self.state.borrow().scheduled.is_empty();
            let frame = if idle {
                match self.listener.blocking_listen() {
                    Some(frame) => Some(frame),
                    None => break,
                }
            } else {
                match self.listener.try_listen() {
                    TryListen::Frame(frame) => Some(frame),
                    TryListen::Empty => None,
                    TryListen::Closed => break,
                }
            };

            if let Some(frame) = frame {
                self.handle(frame);
            }
            self.run_jobs();
            self.run_scheduled();
        }
        info!("worker stopped");
    }

    fn run_jobs(&mut self) {
        if let Err(e) = self.context.run_jobs() {
            warn!(error = %e, "job queue failed");
        }
    }

    /// Run the listener callbacks queued so far. Callbacks queued while this
    /// batch runs wait for the next turn.
    fn run_scheduled(&mut self) {
        let batch = std::mem::take(&mut self.state.borrow_mut().scheduled);
        if batch.is_empty() {
            return;
        }
        for invocation in batch {
            let mut args = Vec::with_capacity(invocation.args.len() + 1);
            args.push(JsValue::from(JsString::from(invocation.event.as_str())));
            args.extend(invocation.args);
            if let Err(e) = invocation
                .callback
                .call(&JsValue::undefined(), &args, &mut self.context)
            {
                warn!(enclosure = %invocation.enclosure, event = %invocation.event, error = %e, "listener failed");
                shout(
                    &self.state,
                    &Message::Error {
                        message: format!(
                            "listener on {} for {} failed: {}",
                            invocation.enclosure, invocation.event, e
                        ),
                        fatal: false,
                    },
                );
            }
        }
        self.run_jobs();
    }

    fn reply(&self, tunnel: TunnelId, result: Result<Value>) {
        reply(&self.state, tunnel, result);
    }

    /// Handle one frame from the host.
    pub fn handle(&mut self, frame: Frame) {
        let message = match frame {
            Ok(message) => message,
            Err(Undecodable {
                tunnel: Some(tunnel),
                error,
            }) => {
                warn!(tunnel, error = %error, "undecodable request");
                return self.reply(tunnel, Err(error));
            }
            Err(Undecodable { tunnel: None, error }) => {
                error!(error = %error, "undecodable frame");
                return shout(
                    &self.state,
                    &Message::Error {
                        message: error.to_string(),
                        fatal: true,
                    },
                );
            }
        };
        debug!(name = message.name(), tunnel = ?message.tunnel(), "received");

        match message {
            Message::Ping => shout(&self.state, &Message::Pong),
            Message::Create { enclosure, tunnel } => {
                let result = self.state.borrow_mut().table.create(&enclosure);
                self.reply(tunnel, result.map(|_| Value::Null));
            }
            Message::Delete { enclosure, tunnel } => {
                let result = self.delete(&enclosure);
                self.reply(tunnel, result);
            }
            Message::Merge { enclosure, tunnel } => {
                let result = self.state.borrow_mut().table.merge(&enclosure);
                self.reply(
                    tunnel,
                    result.map(|m| json!({ "into": m.into, "renamed": m.renamed })),
                );
            }
            Message::Mute { enclosure, tunnel } => {
                let result = self.state.borrow_mut().table.mute(&enclosure);
                self.reply(tunnel, result.map(Value::Bool));
            }
            Message::Unmute { enclosure, tunnel } => {
                let result = self.state.borrow_mut().table.unmute(&enclosure);
                self.reply(tunnel, result.map(Value::Bool));
            }
            Message::Link {
                enclosure,
                target,
                tunnel,
            } => {
                let result = self.state.borrow_mut().table.link(&enclosure, &target);
                self.reply(tunnel, result.map(Value::Bool));
            }
            Message::Unlink {
                enclosure,
                target,
                tunnel,
            } => {
                let result = self.state.borrow_mut().table.unlink(&enclosure, &target);
                self.reply(tunnel, result.map(Value::Bool));
            }
            Message::ListRootEnclosures { tunnel } => {
                let roots = self.state.borrow().table.list_root_enclosures();
                self.reply(tunnel, Ok(json!(roots)));
            }
            Message::ListInstalled { enclosure, tunnel } => {
                let result = self.state.borrow().table.list_installed(&enclosure);
                self.reply(tunnel, result.map(|v| json!(v)));
            }
            Message::ListLinksTo { enclosure, tunnel } => {
                let result = self.state.borrow().table.list_links_to(&enclosure);
                self.reply(tunnel, result.map(|v| json!(v)));
            }
            Message::ListLinkedFrom { enclosure, tunnel } => {
                let result = self.state.borrow().table.list_linked_from(&enclosure);
                self.reply(tunnel, result.map(|v| json!(v)));
            }
            Message::IsMuted { enclosure, tunnel } => {
                let result = self.state.borrow().table.is_muted(&enclosure);
                self.reply(tunnel, result.map(Value::Bool));
            }
            Message::GetSubEnclosures {
                enclosure,
                depth,
                tunnel,
            } => {
                let result = self.state.borrow().table.sub_enclosures(&enclosure, depth);
                self.reply(tunnel, result.map(|v| json!(v)));
            }
            Message::Install {
                enclosure,
                tunnel,
                dependency,
            } => self.install(&enclosure, tunnel, dependency),
            Message::Execute {
                enclosure,
                tunnel,
                dependency,
                args,
            } => self.execute(&enclosure, tunnel, &dependency, &args),
            Message::Predefine {
                enclosure,
                tunnel,
                idx,
                function,
            } => {
                let result = self.predefine(&enclosure, idx, &function);
                self.reply(tunnel, result);
            }
            Message::Resolve { tunnel, payload } => self.settle(tunnel, Ok(payload)),
            Message::Reject { tunnel, error } => self.settle(tunnel, Err(Error::Remote(error))),
            Message::Emit {
                enclosure,
                event,
                args,
            } => {
                if let Err(e) = self.cast_host(&enclosure, &event, args) {
                    warn!(enclosure = %enclosure, event = %event, error = %e, "emit dropped");
                    shout(
                        &self.state,
                        &Message::Error {
                            message: format!("emit {event} on {enclosure}: {e}"),
                            fatal: false,
                        },
                    );
                }
            }
            Message::Call { tunnel, .. } => self.reply(
                tunnel,
                Err(Error::InvalidMessage("call is only sent by the worker".into())),
            ),
            Message::Pong | Message::Error { .. } => {
                debug!("ignoring worker-bound copy of a host message");
            }
        }
    }

    fn delete(&mut self, enclosure: &str) -> Result<Value> {
        let (deletion, pending) = {
            let mut state = self.state.borrow_mut();
            let deletion = state.table.delete(enclosure)?;
            let pending = state.tunnels.take_many(deletion.tunnels.iter().copied());
            state
                .scheduled
                .retain(|i| !deletion.removed.contains(&i.enclosure));
            (deletion, pending)
        };

        let reason = throwable(&Error::Deleted).to_opaque(&mut self.context);
        for (tunnel, call) in pending {
            if let Err(e) = call.reject.call(
                &JsValue::undefined(),
                std::slice::from_ref(&reason),
                &mut self.context,
            ) {
                warn!(tunnel, error = %e, "failed to reject pending call");
            }
        }
        Ok(json!(deletion.removed))
    }

    /// Build the `events` binding for the enclosure behind `port`.
    fn events(&mut self, port: Port) -> Result<JsValue> {
        let cast = {
            let state = self.state.clone();
            let script = self.script.clone();
            native(&mut self.context, "cast", 1, move |_, args, ctx| {
                let event = args
                    .get_or_undefined(0)
                    .to_string(ctx)?
                    .to_std_string_escaped();
                let rest = args.get(1..).unwrap_or_default().to_vec();
                cast_user(&state, &script, port, &event, rest, ctx).map_err(|e| throwable(&e))?;
                Ok(JsValue::undefined())
            })
        };
        let on = {
            let state = self.state.clone();
            native(&mut self.context, "on", 2, move |_, args, ctx| {
                let id = add_listener(&state, port, false, args, ctx).map_err(|e| throwable(&e))?;
                Ok(JsValue::from(id as f64))
            })
        };
        let once = {
            let state = self.state.clone();
            native(&mut self.context, "once", 2, move |_, args, ctx| {
                let id = add_listener(&state, port, true, args, ctx).map_err(|e| throwable(&e))?;
                Ok(JsValue::from(id as f64))
            })
        };
        let off = {
            let state = self.state.clone();
            native(&mut self.context, "off", 1, move |_, args, ctx| {
                let id = args.get_or_undefined(0).to_number(ctx)?;
                if !id.is_finite() || id < 1.0 || id.fract() != 0.0 {
                    return Err(type_error("listener id must be a positive integer"));
                }
                Ok(JsValue::from(state.borrow_mut().table.off(id as ListenerId)))
            })
        };

        let events = ObjectInitializer::new(&mut self.context)
            .property(JsString::from("cast"), cast, Attribute::all())
            .property(JsString::from("on"), on, Attribute::all())
            .property(JsString::from("once"), once, Attribute::all())
            .property(JsString::from("off"), off, Attribute::all())
            .build();
        self.script.freeze(events.into(), &mut self.context)
    }

    /// Compile and call `dependency` in the enclosure behind `port`.
    fn run_dependency(
        &mut self,
        port: Port,
        dependency: &Dependency,
        args: &Map<String, Value>,
    ) -> Result<JsValue> {
        if args.len() > MAX_ARGUMENTS {
            return Err(Error::TooManyArguments {
                count: args.len(),
                limit: MAX_ARGUMENTS,
            });
        }
        if let Some(bad) = args.keys().find(|a| !is_identifier(a)) {
            return Err(Error::InvalidDependency(format!(
                "argument {:?} is not an identifier",
                bad
            )));
        }
        let shadowed: Vec<String> = args
            .keys()
            .filter(|a| *a == EVENTS_BINDING || dependency.imports().contains_key(*a))
            .cloned()
            .collect();
        if !shadowed.is_empty() {
            return Err(Error::ShadowedArgument(shadowed));
        }

        let (name, imported) = {
            let state = self.state.borrow();
            let name = state.table.name_of(port).ok_or(Error::Deleted)?.to_string();
            let mut missing = BTreeSet::new();
            let mut imported = Vec::with_capacity(dependency.imports().len());
            for target in dependency.imports().values() {
                match state.table.lookup(&name, target)? {
                    Some(value) => imported.push(value.clone()),
                    None => {
                        missing.insert(target.clone());
                    }
                }
            }
            if !missing.is_empty() {
                return Err(Error::MissingDependency(missing.into_iter().collect()));
            }
            (name, imported)
        };

        let mut params = vec![EVENTS_BINDING];
        params.extend(dependency.imports().keys().map(String::as_str));
        params.extend(args.keys().map(String::as_str));

        let mut values = Vec::with_capacity(params.len());
        values.push(self.events(port)?);
        values.extend(imported);
        for value in args.values() {
            values.push(self.script.from_json(value, &mut self.context)?);
        }

        let function = self
            .script
            .compile(&params, dependency.code(), &mut self.context)?;
        debug!(enclosure = %name, dependency = dependency.name(), "running");
        function
            .call(&JsValue::undefined(), &values, &mut self.context)
            .map_err(script_error)
    }

    /// Reply on `tunnel` once `value` is final, waiting for it if it is a
    /// thenable. `complete` turns the final value into the reply payload.
    fn finish<F>(&mut self, tunnel: TunnelId, value: JsValue, complete: F)
    where
        F: Fn(&Shared, &Script, &JsValue, &mut Context) -> Result<Value> + 'static,
    {
        let complete = Rc::new(complete);
        let on_fulfilled = {
            let state = self.state.clone();
            let script = self.script.clone();
            let complete = complete.clone();
            move |value: &JsValue, ctx: &mut Context| {
                let result = complete(&state, &script, value, ctx);
                reply(&state, tunnel, result);
            }
        };
        let on_rejected = {
            let state = self.state.clone();
            let script = self.script.clone();
            move |reason: &JsValue, ctx: &mut Context| {
                let message = script.describe(reason, ctx);
                reply(&state, tunnel, Err(Error::Script(message)));
            }
        };

        match self
            .script
            .when_settled(&value, on_fulfilled, on_rejected, &mut self.context)
        {
            Ok(true) => trace!(tunnel, "waiting for thenable"),
            Ok(false) => {
                let result = complete(&self.state, &self.script, &value, &mut self.context);
                self.reply(tunnel, result);
            }
            Err(e) => self.reply(tunnel, Err(e)),
        }
    }

    fn install(&mut self, enclosure: &str, tunnel: TunnelId, dependency: Dependency) {
        let started = self.start_install(enclosure, &dependency);
        let (port, value) = match started {
            Ok(started) => started,
            Err(e) => return self.reply(tunnel, Err(e)),
        };

        let dependency_name = dependency.name().to_string();
        self.finish(tunnel, value, move |state, script, value, ctx| {
            let frozen = script.freeze(value.clone(), ctx)?;
            let name = name_of(state, port)?;
            state
                .borrow_mut()
                .table
                .define(&name, &dependency_name, frozen)?;
            Ok(Value::Null)
        });
    }

    fn start_install(
        &mut self,
        enclosure: &str,
        dependency: &Dependency,
    ) -> Result<(Port, JsValue)> {
        let port = {
            let state = self.state.borrow();
            if state.table.lookup(enclosure, dependency.name())?.is_some() {
                return Err(Error::DuplicateDependency(dependency.name().to_string()));
            }
            state.table.port_of(enclosure)?
        };
        let value = self.run_dependency(port, dependency, &Map::new())?;
        Ok((port, value))
    }

    fn execute(
        &mut self,
        enclosure: &str,
        tunnel: TunnelId,
        dependency: &Dependency,
        args: &Map<String, Value>,
    ) {
        let port = self.state.borrow().table.port_of(enclosure);
        let value = match port.and_then(|port| self.run_dependency(port, dependency, args)) {
            Ok(value) => value,
            Err(e) => return self.reply(tunnel, Err(e)),
        };
        self.finish(tunnel, value, |_, script, value, ctx| {
            script.to_json(value, ctx)
        });
    }

    fn predefine(&mut self, enclosure: &str, idx: u64, function: &str) -> Result<Value> {
        if !is_identifier(function) || function == EVENTS_BINDING {
            return Err(Error::InvalidDependency(format!(
                "{:?} cannot be bound as a function",
                function
            )));
        }
        let port = {
            let state = self.state.borrow();
            if state.table.lookup(enclosure, function)?.is_some() {
                return Err(Error::DuplicateDependency(function.to_string()));
            }
            state.table.port_of(enclosure)?
        };

        let callable = {
            let state = self.state.clone();
            let script = self.script.clone();
            native(&mut self.context, function, 0, move |_, args, ctx| {
                call_host(&state, &script, port, idx, args, ctx).map_err(|e| throwable(&e))
            })
        };
        let callable = self.script.freeze(callable.into(), &mut self.context)?;
        self.state
            .borrow_mut()
            .table
            .define(enclosure, function, callable)?;
        Ok(Value::Null)
    }

    /// Settle a call this worker made into the host.
    fn settle(&mut self, tunnel: TunnelId, result: Result<Value>) {
        let taken = self.state.borrow_mut().tunnels.take(tunnel);
        let (owner, call) = match taken {
            Ok(taken) => taken,
            Err(e) => {
                warn!(tunnel, error = %e, "settlement for unknown tunnel");
                return;
            }
        };
        if let Some(port) = owner {
            self.state.borrow_mut().table.detach_tunnel(port, tunnel);
        }

        let outcome = match result.and_then(|p| self.script.from_json(&p, &mut self.context)) {
            Ok(value) => call
                .resolve
                .call(&JsValue::undefined(), &[value], &mut self.context),
            Err(e) => {
                let reason = throwable(&e).to_opaque(&mut self.context);
                call.reject
                    .call(&JsValue::undefined(), &[reason], &mut self.context)
            }
        };
        if let Err(e) = outcome {
            warn!(tunnel, error = %e, "failed to settle pending call");
        }
    }

    /// An event forwarded by the host: dispatch it locally under the user
    /// namespace.
    fn cast_host(&mut self, enclosure: &str, event: &str, args: Vec<Value>) -> Result<()> {
        validate_event(event)?;
        if !self.state.borrow().table.contains(enclosure) {
            return Err(Error::UnknownEnclosure(enclosure.to_string()));
        }
        let args = args
            .iter()
            .map(|a| self.script.from_json(a, &mut self.context))
            .collect::<Result<Vec<_>>>()?;

        let mut state = self.state.borrow_mut();
        let dispatches = state.table.cast(enclosure, &user_event(event))?;
        for dispatch in dispatches {
            state.scheduled.push_back(Invocation {
                enclosure: dispatch.enclosure,
                callback: dispatch.callback,
                event: event.to_string(),
                args: args.clone(),
            });
        }
        Ok(())
    }
}
