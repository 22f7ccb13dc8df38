//! The default sandbox: a worker on its own OS thread.

use std::thread;

use tracing::{error, info_span};

use enclosure_core::{Error, Result};
use enclosure_protocol::{Endpoint, Sandbox};

use crate::config::WorkerConfig;
use crate::worker::Worker;

const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Runs each worker in a dedicated thread with its own script engine.
///
/// The worker shares no memory with the host; the channel endpoint is the only
/// thing handed across. The thread exits when the host drops its endpoint.
#[derive(Debug, Clone, Default)]
pub struct ThreadSandbox {
    config: WorkerConfig,
}

impl ThreadSandbox {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }
}

impl Sandbox for ThreadSandbox {
    fn launch(self) -> Result<Endpoint> {
        let (host, worker) = Endpoint::pair();
        let config = self.config;
        thread::Builder::new()
            .name("enclosure-worker".into())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || {
                let _span = info_span!("worker").entered();
                if let Ok(worker) = Worker::new(worker, &config) {
                    worker.run();
                }
            })
            .map_err(|e| {
                error!(error = %e, "failed to spawn worker thread");
                Error::Stopped
            })?;
        Ok(host)
    }
}
