//! # Enclosure Host
//!
//! The controlling half of an enclosure VM. A [`Vm`] boots an isolated worker,
//! forwards every enclosure operation to it as a message, and resolves the
//! returned futures when the worker answers on the request's tunnel.
//!
//! The host keeps its own listeners and mute flags. User events cast on one
//! side reach listeners on the other unless the enclosure they are cast on is
//! muted on the sending side.
//!
//! ```no_run
//! # async fn demo() -> enclosure_core::Result<()> {
//! use enclosure_core::Dependency;
//! use enclosure_host::{Vm, VmConfig};
//! use serde_json::{json, Map};
//!
//! let vm = Vm::start(VmConfig::default()).await?;
//! vm.create("app").await?;
//!
//! let double = Dependency::leaf("double", "return x * 2;")?;
//! let mut args = Map::new();
//! args.insert("x".into(), json!(21));
//! assert_eq!(vm.execute("app", double, args).await?, json!(42));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod event;
pub mod function;
pub mod vm;

pub use config::VmConfig;
pub use event::{Callback, VmEvent};
pub use function::HostFunction;
pub use vm::Vm;
