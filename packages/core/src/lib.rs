//! # Enclosure Core
//!
//! The state that both sides of an enclosure VM keep: the hierarchical
//! enclosure table, event filters, the dependency model with its install
//! ordering, and tunnel bookkeeping for correlating requests with responses.
//!
//! Nothing in this crate performs I/O or runs code. The host controller and
//! the isolated worker each own an [`EnclosureTable`] and a [`Tunnels`]
//! multiplexer and keep them structurally analogous by applying the same
//! operations in the same order.
//!
//! ## Enclosures
//!
//! Enclosures are named with dot-separated segments (`"app.plugins.search"`).
//! A child can only be created after its parent, sees its parent's
//! dependencies, and hears events cast on its ancestors and descendants.
//!
//! ```rust
//! use enclosure_core::{EnclosureTable, Filter};
//!
//! let mut table: EnclosureTable<&str, i32> = EnclosureTable::new();
//! table.create("app").unwrap();
//! table.create("app.plugin").unwrap();
//! table.define("app", "answer", 42).unwrap();
//! assert_eq!(table.lookup("app.plugin", "answer").unwrap(), Some(&42));
//!
//! table.on("app", Filter::compile("ready:*").unwrap(), "listener").unwrap();
//! let dispatches = table.cast("app.plugin", "ready:now").unwrap();
//! assert_eq!(dispatches.len(), 1);
//! ```

pub mod dependency;
pub mod error;
pub mod event;
pub mod graph;
pub mod name;
pub mod table;
pub mod tunnel;

pub use dependency::{Dependency, UncheckedDependency, EVENTS_BINDING, MAX_ARGUMENTS, MAX_IMPORTS};
pub use error::{Error, ErrorKind, Result, WireError};
pub use event::{user_event, validate_event, Filter, USER_NAMESPACE};
pub use table::{Deletion, Dispatch, Enclosure, EnclosureTable, ListenerId, Merge, Port};
pub use tunnel::{Settle, TunnelId, Tunnels, BOOT_TUNNEL};
