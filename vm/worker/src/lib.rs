//! # Enclosure Worker
//!
//! The isolated half of an enclosure VM. A worker embeds a JavaScript engine,
//! keeps its own enclosure table, and runs dependency code bodies against
//! exactly the bindings they are granted: the enclosure's `events` caster, one
//! binding per import and one per argument.
//!
//! Workers are launched through a [`Sandbox`](enclosure_protocol::Sandbox);
//! [`ThreadSandbox`] runs each one on a dedicated thread.

pub mod config;
pub mod sandbox;
pub mod script;
pub mod worker;

pub use config::WorkerConfig;
pub use sandbox::ThreadSandbox;
pub use worker::Worker;
