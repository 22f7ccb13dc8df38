//! Enclosure VMs: hierarchical namespaces for running untrusted dependency
//! code in an isolated worker.
//!
//! A VM is split in two halves that only exchange JSON messages:
//!
//! - **Host** ([`Vm`]): the controlling side. Every operation opens a tunnel,
//!   sends one request and completes when the worker answers on it.
//! - **Worker** ([`Worker`]): owns the script engine and runs dependency code
//!   against exactly the bindings it is granted.
//!
//! Workers are launched by a [`Sandbox`]. [`ThreadSandbox`] gives each worker
//! its own thread; other sandboxes only need to hand back an [`Endpoint`].
//!
//! # Example
//!
//! ```no_run
//! use enclosure_vm::{Dependency, Vm, VmConfig};
//! use serde_json::{json, Map};
//!
//! # async fn demo() -> enclosure_vm::Result<()> {
//! let vm = Vm::start(VmConfig::default()).await?;
//! vm.create("app").await?;
//! vm.create("app.plugin").await?;
//!
//! vm.install("app", Dependency::leaf("greeting", "return 'hello';")?).await?;
//! let main = Dependency::new(
//!     "main",
//!     "return greeting + ', ' + who;",
//!     [("greeting".to_string(), "greeting".to_string())].into(),
//! )?;
//! let mut args = Map::new();
//! args.insert("who".into(), json!("world"));
//! assert_eq!(vm.execute("app.plugin", main, args).await?, json!("hello, world"));
//! # Ok(())
//! # }
//! ```

pub use enclosure_core::{
    Dependency, Error, ErrorKind, Filter, ListenerId, Result, WireError, MAX_ARGUMENTS,
    MAX_IMPORTS,
};
pub use enclosure_host::{Callback, HostFunction, Vm, VmConfig, VmEvent};
pub use enclosure_protocol::{Endpoint, LaunchFn, Message, Sandbox};
pub use enclosure_worker::{ThreadSandbox, Worker, WorkerConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn children_see_parent_dependencies() {
        let vm = Vm::start(VmConfig::default()).await.unwrap();
        vm.create("app").await.unwrap();
        vm.create("app.plugin").await.unwrap();
        vm.install("app", Dependency::leaf("greeting", "return 'hello';").unwrap())
            .await
            .unwrap();

        let main = Dependency::new(
            "main",
            "return greeting + ', ' + who;",
            [("greeting".to_string(), "greeting".to_string())].into(),
        )
        .unwrap();
        let mut args = Map::new();
        args.insert("who".into(), json!("world"));
        assert_eq!(
            vm.execute("app.plugin", main, args).await.unwrap(),
            json!("hello, world")
        );
        assert!(vm.stop());
    }
}
