//! End-to-end tests against a real worker thread.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use collection_literals::btree;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;

use enclosure_core::{Dependency, ErrorKind, Result, MAX_ARGUMENTS};
use enclosure_host::{HostFunction, Vm, VmConfig, VmEvent};

async fn boot() -> Vm {
    Vm::start(VmConfig::default()).await.unwrap()
}

fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn run(vm: &Vm, enclosure: &str, code: &str) -> Result<Value> {
    vm.execute(enclosure, Dependency::leaf("main", code)?, Map::new())
        .await
}

/// Never answers; signals when it has been called.
struct Stall(Arc<Notify>);

#[async_trait]
impl HostFunction for Stall {
    async fn call(&self, _args: Vec<Value>) -> Result<Value> {
        self.0.notify_one();
        std::future::pending().await
    }
}

/// Start an execution in `p.c` that waits on the host forever.
async fn stalled(vm: &Vm) -> tokio::task::JoinHandle<Result<Value>> {
    vm.create("p").await.unwrap();
    vm.create("p.c").await.unwrap();
    let called = Arc::new(Notify::new());
    vm.predefine("p.c", "slow", Stall(called.clone()))
        .await
        .unwrap();

    let waiting = vm.clone();
    let handle = tokio::spawn(async move {
        let dependency = Dependency::new(
            "waits",
            "return slow();",
            btree! { "slow".to_string() => "slow".to_string() },
        )?;
        waiting.execute("p.c", dependency, Map::new()).await
    });
    timeout(Duration::from_secs(5), called.notified())
        .await
        .expect("host function never called");
    handle
}

#[tokio::test]
async fn execute_returns_the_code_result() {
    let vm = boot().await;
    assert!(vm.is_running());
    vm.create("app").await.unwrap();

    let double = Dependency::leaf("double", "return x * 2;").unwrap();
    let out = vm
        .execute("app", double, args(&[("x", json!(5))]))
        .await
        .unwrap();
    assert_eq!(out, json!(10));

    assert_eq!(run(&vm, "app", "let y = 1;").await.unwrap(), Value::Null);
}

#[tokio::test]
async fn structure_round_trips() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    vm.create("app.a").await.unwrap();
    vm.create("app.b").await.unwrap();

    assert_eq!(vm.list_root_enclosures().await.unwrap(), vec!["app"]);
    assert_eq!(
        vm.sub_enclosures("app", 0).await.unwrap(),
        vec!["app.a", "app.b"]
    );

    assert!(vm.link("app.a", "app.b").await.unwrap());
    assert!(!vm.link("app.a", "app.b").await.unwrap());
    assert_eq!(vm.list_links_to("app.a").await.unwrap(), vec!["app.b"]);
    assert_eq!(vm.list_linked_from("app.b").await.unwrap(), vec!["app.a"]);
    assert!(vm.unlink("app.a", "app.b").await.unwrap());
    assert!(vm.list_links_to("app.a").await.unwrap().is_empty());

    assert!(!vm.mute("app.a").await.unwrap());
    assert!(vm.is_muted("app.a").await.unwrap());
    assert!(vm.unmute("app.a").await.unwrap());

    assert_eq!(vm.delete("app.a").await.unwrap(), vec!["app.a"]);
    vm.merge("app.b").await.unwrap();
    assert!(vm.sub_enclosures("app", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn structural_errors_keep_their_kind() {
    let vm = boot().await;
    vm.create("app").await.unwrap();

    let kind = |r: Result<()>| r.unwrap_err().kind();
    assert_eq!(
        kind(vm.create("nope.child").await),
        ErrorKind::MissingParent
    );
    assert_eq!(kind(vm.create("app").await), ErrorKind::DuplicateName);
    assert_eq!(kind(vm.merge("app").await), ErrorKind::NoParent);
    assert_eq!(kind(vm.create("bad name").await), ErrorKind::InvalidName);
    assert_eq!(
        vm.list_installed("ghost").await.unwrap_err().kind(),
        ErrorKind::UnknownEnclosure
    );
    assert!(vm.is_running());
}

#[tokio::test]
async fn install_all_orders_imports() {
    let vm = boot().await;
    vm.create("app").await.unwrap();

    let a = Dependency::leaf("a", "return 1;").unwrap();
    let b = Dependency::new(
        "b",
        "return a + 1;",
        btree! { "a".to_string() => "a".to_string() },
    )
    .unwrap();
    let c = Dependency::new(
        "c",
        "return b + 1;",
        btree! { "b".to_string() => "b".to_string() },
    )
    .unwrap();
    vm.install_all("app", vec![c, b, a]).await.unwrap();
    assert_eq!(vm.list_installed("app").await.unwrap(), vec!["a", "b", "c"]);

    let main = Dependency::new(
        "main",
        "return c * 10;",
        btree! { "c".to_string() => "c".to_string() },
    )
    .unwrap();
    assert_eq!(
        vm.execute("app", main, Map::new()).await.unwrap(),
        json!(30)
    );

    let again = Dependency::leaf("a", "return 2;").unwrap();
    assert_eq!(
        vm.install("app", again).await.unwrap_err().kind(),
        ErrorKind::DuplicateDependency
    );
}

#[tokio::test]
async fn too_many_arguments_fail_before_sending() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    let many: Map<String, Value> = (0..=MAX_ARGUMENTS)
        .map(|i| (format!("a{i}"), json!(i)))
        .collect();
    let err = vm
        .execute("app", Dependency::leaf("main", "return 0;").unwrap(), many)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyArguments);
}

#[tokio::test]
async fn predefined_closures_run_on_the_host() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    vm.predefine("app", "twice", |args: Vec<Value>| -> Result<Value> {
        Ok(json!(args.first().and_then(Value::as_i64).unwrap_or(0) * 2))
    })
    .await
    .unwrap();
    assert_eq!(vm.list_installed("app").await.unwrap(), vec!["twice"]);

    let main = Dependency::new(
        "main",
        "return twice(21);",
        btree! { "twice".to_string() => "twice".to_string() },
    )
    .unwrap();
    assert_eq!(
        vm.execute("app", main, Map::new()).await.unwrap(),
        json!(42)
    );
}

#[tokio::test]
async fn events_cross_the_boundary() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    vm.create("app.child").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    vm.on("app", "greeted", move |event, args| {
        let _ = tx.send((event.to_string(), args.to_vec()));
    })
    .unwrap();

    run(
        &vm,
        "app.child",
        "events.on('hello:*', (event, who) => events.cast('greeted', who));",
    )
    .await
    .unwrap();
    vm.emit("app", "hello:world", vec![json!("bob")]).unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, ("greeted".to_string(), vec![json!("bob")]));
}

#[tokio::test]
async fn muted_enclosures_still_reach_local_listeners() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    vm.mute("app").await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = vm
        .once("app", "tick:**", move |event, _| {
            let _ = tx.send(event.to_string());
        })
        .unwrap();
    vm.emit("app", "tick:a:b", vec![]).unwrap();
    vm.emit("app", "tick:c", vec![]).unwrap();

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
    assert_eq!(first.as_deref(), Some("tick:a:b"));
    assert!(!vm.off(id));
}

#[tokio::test]
async fn invalid_events_and_filters_are_rejected() {
    let vm = boot().await;
    vm.create("app").await.unwrap();
    assert_eq!(
        vm.emit("app", "not valid", vec![]).unwrap_err().kind(),
        ErrorKind::InvalidEventName
    );
    assert_eq!(
        vm.on("app", "a:**:**", |_, _| {}).unwrap_err().kind(),
        ErrorKind::InvalidFilter
    );
    assert_eq!(
        vm.emit("ghost", "hi", vec![]).unwrap_err().kind(),
        ErrorKind::UnknownEnclosure
    );
}

#[tokio::test]
async fn deleting_an_enclosure_rejects_its_requests() {
    let vm = boot().await;
    let pending = stalled(&vm).await;

    assert_eq!(vm.delete("p").await.unwrap(), vec!["p", "p.c"]);
    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deleted);
    assert!(vm.is_running());
}

#[tokio::test]
async fn stop_rejects_pending_requests_once() {
    let vm = boot().await;
    let mut events = vm.subscribe();
    let pending = stalled(&vm).await;

    assert!(vm.stop());
    assert!(!vm.stop());
    assert!(!vm.dispose());
    assert_eq!(
        pending.await.unwrap().unwrap_err().kind(),
        ErrorKind::Stopped
    );
    assert_eq!(
        events.recv().await.unwrap(),
        VmEvent::Stopped {
            reason: ErrorKind::Stopped
        }
    );

    assert!(vm.is_stopped());
    assert_eq!(
        vm.create("late").await.unwrap_err().kind(),
        ErrorKind::Stopped
    );
}

#[tokio::test]
async fn dispose_rejects_with_deleted() {
    let vm = boot().await;
    let pending = stalled(&vm).await;

    assert!(vm.dispose());
    assert_eq!(
        pending.await.unwrap().unwrap_err().kind(),
        ErrorKind::Deleted
    );
}
