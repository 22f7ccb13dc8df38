//! Boot and liveness against scripted fake workers.

use std::thread;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use enclosure_core::{Error, ErrorKind, Result, BOOT_TUNNEL};
use enclosure_host::{Vm, VmConfig, VmEvent};
use enclosure_protocol::{Endpoint, LaunchFn, Message};

/// A worker that boots and then never answers anything.
fn mute_worker() -> LaunchFn<impl FnOnce() -> Result<Endpoint> + Send + 'static> {
    LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        worker.shout(&Message::resolve(BOOT_TUNNEL, 1))?;
        thread::spawn(move || {
            let (_shouter, mut listener) = worker.split();
            while listener.blocking_listen().is_some() {}
        });
        Ok(host)
    })
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<VmEvent>) -> VmEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event")
        .expect("event stream closed")
}

#[tokio::test]
async fn pongs_keep_the_vm_alive() {
    let config = VmConfig::default()
        .with_ping_interval(Duration::from_millis(20))
        .with_unresponsive_after(Duration::from_millis(300));
    let vm = Vm::start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(vm.is_running());
}

#[tokio::test]
async fn reported_boot_time_is_kept() {
    let vm = Vm::start_with(mute_worker(), VmConfig::default())
        .await
        .unwrap();
    assert_eq!(vm.boot_elapsed(), Duration::from_millis(1));

    let real = Vm::start(VmConfig::default()).await.unwrap();
    assert!(real.boot_elapsed() < VmConfig::default().boot_timeout);
}

#[tokio::test]
async fn silent_worker_is_shut_down_once() {
    let config = VmConfig::default()
        .with_ping_interval(Duration::from_millis(20))
        .with_unresponsive_after(Duration::from_millis(100));
    let vm = Vm::start_with(mute_worker(), config).await.unwrap();
    let mut events = vm.subscribe();

    assert_eq!(next_event(&mut events).await, VmEvent::Unresponsive);
    assert_eq!(
        next_event(&mut events).await,
        VmEvent::Stopped {
            reason: ErrorKind::Stopped
        }
    );
    assert!(!vm.is_running());
    assert!(!vm.stop());
    assert_eq!(vm.create("app").await.unwrap_err(), Error::Stopped);
}

#[tokio::test]
async fn boot_times_out() {
    let silent = LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        thread::spawn(move || {
            let (_shouter, mut listener) = worker.split();
            while listener.blocking_listen().is_some() {}
        });
        Ok(host)
    });
    let config = VmConfig::default().with_boot_timeout(Duration::from_millis(100));
    let err = Vm::start_with(silent, config).await.unwrap_err();
    assert_eq!(err, Error::BootTimeout(100));
}

#[tokio::test]
async fn boot_rejection_is_returned() {
    let failing = LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        worker.shout(&Message::reject(
            BOOT_TUNNEL,
            &Error::Script("SyntaxError: nope".into()),
        ))?;
        thread::spawn(move || {
            let (_shouter, mut listener) = worker.split();
            while listener.blocking_listen().is_some() {}
        });
        Ok(host)
    });
    let err = Vm::start_with(failing, VmConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Script);
}

#[tokio::test]
async fn fatal_worker_errors_stop_the_vm() {
    let quitter = LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        worker.shout(&Message::resolve(BOOT_TUNNEL, 1))?;
        thread::spawn(move || {
            let (shouter, mut listener) = worker.split();
            if let Some(Ok(Message::Ping)) = listener.blocking_listen() {
                let _ = shouter.shout(&Message::Error {
                    message: "out of memory".into(),
                    fatal: true,
                });
            }
        });
        Ok(host)
    });
    let vm = Vm::start_with(quitter, VmConfig::default()).await.unwrap();
    let mut events = vm.subscribe();

    assert_eq!(
        next_event(&mut events).await,
        VmEvent::WorkerError {
            message: "out of memory".into(),
            fatal: true
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        VmEvent::Stopped {
            reason: ErrorKind::Stopped
        }
    );
    assert!(!vm.is_running());
}

#[tokio::test]
async fn undecodable_replies_are_rejected_back() {
    let sloppy = LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        worker.shout(&Message::resolve(BOOT_TUNNEL, json!(3)))?;
        worker
            .shouter
            .shout_raw(r#"{"name":"teleport","tunnel":77}"#)?;
        let (shouter, mut listener) = worker.split();
        thread::spawn(move || {
            while let Some(frame) = listener.blocking_listen() {
                if let Ok(Message::Reject { tunnel: 77, error }) = frame {
                    let _ = shouter.shout(&Message::Error {
                        message: error.kind.to_string(),
                        fatal: false,
                    });
                }
            }
        });
        Ok(host)
    });
    let vm = Vm::start_with(sloppy, VmConfig::default()).await.unwrap();
    let mut events = vm.subscribe();
    match next_event(&mut events).await {
        VmEvent::WorkerError { message, fatal } => {
            assert!(!fatal);
            assert_eq!(message, ErrorKind::UnknownMessage.to_string());
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(vm.is_running());
}

#[tokio::test]
async fn refused_host_functions_are_not_callable() {
    // Accepts creates, refuses every binding, then tries to call it anyway.
    let refusing = LaunchFn(|| -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        worker.shout(&Message::resolve(BOOT_TUNNEL, 1))?;
        let (shouter, mut listener) = worker.split();
        thread::spawn(move || {
            while let Some(frame) = listener.blocking_listen() {
                let reply = match frame {
                    Ok(Message::Create { tunnel, .. }) => Message::resolve(tunnel, json!(null)),
                    Ok(Message::Predefine {
                        tunnel,
                        idx,
                        function,
                        ..
                    }) => {
                        let _ = shouter.shout(&Message::reject(
                            tunnel,
                            &Error::DuplicateDependency(function),
                        ));
                        Message::Call {
                            enclosure: "app".into(),
                            tunnel: 900,
                            idx,
                            args: vec![],
                        }
                    }
                    Ok(Message::Resolve { tunnel: 900, .. }) => Message::Error {
                        message: "called".into(),
                        fatal: false,
                    },
                    Ok(Message::Reject { tunnel: 900, error }) => Message::Error {
                        message: error.kind.to_string(),
                        fatal: false,
                    },
                    _ => continue,
                };
                let _ = shouter.shout(&reply);
            }
        });
        Ok(host)
    });
    let vm = Vm::start_with(refusing, VmConfig::default()).await.unwrap();
    let mut events = vm.subscribe();
    vm.create("app").await.unwrap();

    let err = vm
        .predefine("app", "f", |_args: Vec<serde_json::Value>| -> Result<serde_json::Value> {
            Ok(json!("ran"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateDependency);
    assert_eq!(
        next_event(&mut events).await,
        VmEvent::WorkerError {
            message: ErrorKind::InvalidMessage.to_string(),
            fatal: false
        }
    );
}
