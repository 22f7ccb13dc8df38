//! Lifecycle events and host-side listener dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use enclosure_core::{Dispatch, ErrorKind};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::warn;

/// A host-side event listener. Receives the event name and its arguments.
pub type Callback = Arc<dyn Fn(&str, &[Value]) + Send + Sync>;

/// Something that happened to a VM as a whole.
#[derive(Debug, Clone, PartialEq)]
pub enum VmEvent {
    /// The worker announced boot completion.
    Booted { elapsed_ms: u64 },
    /// No `pong` arrived within the unresponsive threshold.
    Unresponsive,
    /// The worker reported an error outside any tunnel.
    WorkerError { message: String, fatal: bool },
    /// A non-fatal problem that was isolated, such as a failing listener.
    Diagnostic { message: String },
    /// The VM shut down; pending tunnels were rejected with `reason`.
    Stopped { reason: ErrorKind },
}

/// Broadcast side of a VM's lifecycle stream.
#[derive(Clone)]
pub(crate) struct Events {
    tx: broadcast::Sender<VmEvent>,
}

impl Events {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<VmEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn send(&self, event: VmEvent) {
        // nobody listening is fine
        let _ = self.tx.send(event);
    }

    pub(crate) fn diagnostic(&self, message: impl Into<String>) {
        self.send(VmEvent::Diagnostic {
            message: message.into(),
        });
    }
}

/// Run each matched listener on its own task, outside the caller's stack.
///
/// A panicking listener is reported as a diagnostic and affects no one else.
pub(crate) fn dispatch(
    runtime: &Handle,
    events: &Events,
    dispatches: Vec<Dispatch<Callback>>,
    event: &str,
    args: &[Value],
) {
    for dispatch in dispatches {
        let events = events.clone();
        let event = event.to_string();
        let args = args.to_vec();
        runtime.spawn(async move {
            let callback = dispatch.callback;
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&event, &args)));
            if outcome.is_err() {
                warn!(enclosure = %dispatch.enclosure, event = %event, "listener panicked");
                events.diagnostic(format!(
                    "listener {} on {} panicked handling {}",
                    dispatch.listener, dispatch.enclosure, event
                ));
            }
        });
    }
}
