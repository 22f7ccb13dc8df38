//! # Enclosure Protocol
//!
//! The wire vocabulary spoken between an enclosure host and its isolated
//! worker, and the channel it travels over.
//!
//! Every message is one JSON object tagged by `name`. Requests that change or
//! query worker state carry a `tunnel` id and are answered by exactly one
//! `resolve` or `reject` bearing the same id; `ping`, `pong`, `emit` and
//! `error` are not tunnel-correlated.
//!
//! ```rust
//! use enclosure_protocol::{decode, Message};
//!
//! let frame = Message::Create { enclosure: "app".into(), tunnel: 1 }.encode().unwrap();
//! assert_eq!(frame, r#"{"name":"create","enclosure":"app","tunnel":1}"#);
//! assert_eq!(decode(&frame).unwrap().tunnel(), Some(1));
//! ```

pub mod channel;
pub mod message;
pub mod sandbox;

pub use channel::{Endpoint, Frame, Listener, Shouter, TryListen};
pub use message::{decode, Message, Undecodable, MESSAGE_NAMES};
pub use sandbox::{LaunchFn, Sandbox};
