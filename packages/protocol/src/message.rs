//! The message vocabulary.
//!
//! Each message is one JSON object whose `name` field selects the variant.
//! Field names are normative and shared with every implementation of the
//! other side.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use enclosure_core::{Dependency, Error, Result, TunnelId, UncheckedDependency, WireError};

/// Every message name this protocol understands.
pub const MESSAGE_NAMES: &[&str] = &[
    "ping",
    "pong",
    "resolve",
    "reject",
    "emit",
    "install",
    "execute",
    "predefine",
    "create",
    "delete",
    "merge",
    "mute",
    "unmute",
    "link",
    "unlink",
    "listRootEnclosures",
    "listInstalled",
    "listLinksTo",
    "listLinkedFrom",
    "isMuted",
    "getSubEnclosures",
    "call",
    "error",
];

/// A single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum Message {
    /// Liveness check, host to worker.
    Ping,
    /// Liveness answer, worker to host.
    Pong,
    /// Successful settlement of a tunnel.
    Resolve {
        tunnel: TunnelId,
        #[serde(default)]
        payload: Value,
    },
    /// Failed settlement of a tunnel.
    Reject { tunnel: TunnelId, error: WireError },
    /// A user event crossing the boundary. Not tunnel-correlated.
    Emit {
        enclosure: String,
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Install {
        enclosure: String,
        tunnel: TunnelId,
        dependency: Dependency,
    },
    Execute {
        enclosure: String,
        tunnel: TunnelId,
        dependency: Dependency,
        #[serde(default)]
        args: Map<String, Value>,
    },
    /// Bind `function` in the enclosure to host function number `idx`.
    Predefine {
        enclosure: String,
        tunnel: TunnelId,
        idx: u64,
        function: String,
    },
    Create {
        enclosure: String,
        tunnel: TunnelId,
    },
    Delete {
        enclosure: String,
        tunnel: TunnelId,
    },
    Merge {
        enclosure: String,
        tunnel: TunnelId,
    },
    Mute {
        enclosure: String,
        tunnel: TunnelId,
    },
    Unmute {
        enclosure: String,
        tunnel: TunnelId,
    },
    Link {
        enclosure: String,
        target: String,
        tunnel: TunnelId,
    },
    Unlink {
        enclosure: String,
        target: String,
        tunnel: TunnelId,
    },
    ListRootEnclosures {
        tunnel: TunnelId,
    },
    ListInstalled {
        enclosure: String,
        tunnel: TunnelId,
    },
    ListLinksTo {
        enclosure: String,
        tunnel: TunnelId,
    },
    ListLinkedFrom {
        enclosure: String,
        tunnel: TunnelId,
    },
    IsMuted {
        enclosure: String,
        tunnel: TunnelId,
    },
    GetSubEnclosures {
        enclosure: String,
        depth: usize,
        tunnel: TunnelId,
    },
    /// A sandboxed call into host function number `idx`, worker to host.
    Call {
        enclosure: String,
        tunnel: TunnelId,
        idx: u64,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// A worker-side failure outside any tunnel, worker to host.
    Error { message: String, fatal: bool },
}

impl Message {
    /// A `resolve` for `tunnel`.
    pub fn resolve(tunnel: TunnelId, payload: impl Into<Value>) -> Self {
        Message::Resolve {
            tunnel,
            payload: payload.into(),
        }
    }

    /// A `reject` for `tunnel`.
    pub fn reject(tunnel: TunnelId, error: &Error) -> Self {
        Message::Reject {
            tunnel,
            error: error.to_wire(),
        }
    }

    /// The wire name of this message.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Resolve { .. } => "resolve",
            Message::Reject { .. } => "reject",
            Message::Emit { .. } => "emit",
            Message::Install { .. } => "install",
            Message::Execute { .. } => "execute",
            Message::Predefine { .. } => "predefine",
            Message::Create { .. } => "create",
            Message::Delete { .. } => "delete",
            Message::Merge { .. } => "merge",
            Message::Mute { .. } => "mute",
            Message::Unmute { .. } => "unmute",
            Message::Link { .. } => "link",
            Message::Unlink { .. } => "unlink",
            Message::ListRootEnclosures { .. } => "listRootEnclosures",
            Message::ListInstalled { .. } => "listInstalled",
            Message::ListLinksTo { .. } => "listLinksTo",
            Message::ListLinkedFrom { .. } => "listLinkedFrom",
            Message::IsMuted { .. } => "isMuted",
            Message::GetSubEnclosures { .. } => "getSubEnclosures",
            Message::Call { .. } => "call",
            Message::Error { .. } => "error",
        }
    }

    /// The tunnel this message opens or settles, if any.
    pub fn tunnel(&self) -> Option<TunnelId> {
        match self {
            Message::Ping | Message::Pong | Message::Emit { .. } | Message::Error { .. } => None,
            Message::Resolve { tunnel, .. }
            | Message::Reject { tunnel, .. }
            | Message::Install { tunnel, .. }
            | Message::Execute { tunnel, .. }
            | Message::Predefine { tunnel, .. }
            | Message::Create { tunnel, .. }
            | Message::Delete { tunnel, .. }
            | Message::Merge { tunnel, .. }
            | Message::Mute { tunnel, .. }
            | Message::Unmute { tunnel, .. }
            | Message::Link { tunnel, .. }
            | Message::Unlink { tunnel, .. }
            | Message::ListRootEnclosures { tunnel }
            | Message::ListInstalled { tunnel, .. }
            | Message::ListLinksTo { tunnel, .. }
            | Message::ListLinkedFrom { tunnel, .. }
            | Message::IsMuted { tunnel, .. }
            | Message::GetSubEnclosures { tunnel, .. }
            | Message::Call { tunnel, .. } => Some(*tunnel),
        }
    }

    /// Serialize to a single JSON frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidMessage(e.to_string()))
    }
}

/// A frame that could not be turned into a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct Undecodable {
    /// The tunnel named by the frame, if one could be read.
    pub tunnel: Option<TunnelId>,
    pub error: Error,
}

/// Decode a JSON frame.
///
/// A frame with an unrecognised `name` fails with `UnknownMessage`; a
/// recognised name with malformed fields fails with `InvalidMessage`, except
/// that a well-formed dependency failing validation keeps its own error (for
/// example `TooManyImports`). Either way the tunnel is reported when the frame carries one, so the receiver can
/// reject it instead of treating the frame as fatal.
pub fn decode(frame: &str) -> std::result::Result<Message, Undecodable> {
    let value: Value = serde_json::from_str(frame).map_err(|e| Undecodable {
        tunnel: None,
        error: Error::InvalidMessage(e.to_string()),
    })?;

    let tunnel = value.get("tunnel").and_then(Value::as_u64);
    let Some(name) = value.get("name").and_then(Value::as_str) else {
        return Err(Undecodable {
            tunnel,
            error: Error::InvalidMessage("missing message name".to_string()),
        });
    };
    if !MESSAGE_NAMES.contains(&name) {
        return Err(Undecodable {
            tunnel,
            error: Error::UnknownMessage(name.to_string()),
        });
    }

    // Keep the typed reason for a well-formed but invalid dependency.
    if let Some(dependency) = value.get("dependency") {
        if let Ok(unchecked) = UncheckedDependency::deserialize(dependency) {
            unchecked
                .validate()
                .map_err(|error| Undecodable { tunnel, error })?;
        }
    }

    serde_json::from_value(value).map_err(|e| Undecodable {
        tunnel,
        error: Error::InvalidMessage(e.to_string()),
    })
}
