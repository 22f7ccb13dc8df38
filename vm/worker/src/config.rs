//! Worker configuration.

use boa_engine::vm::RuntimeLimits;
use serde::{Deserialize, Serialize};

/// Limits applied to the embedded script engine.
///
/// Exceeding a limit aborts the running code body with an uncatchable error,
/// which surfaces to the host as a `Script` rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum iterations of any single loop.
    pub loop_iteration_limit: u64,
    /// Maximum call depth.
    pub recursion_limit: usize,
    /// Maximum size of the engine's value stack.
    pub stack_size_limit: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            loop_iteration_limit: 100_000_000,
            recursion_limit: 512,
            stack_size_limit: 10 * 1024,
        }
    }
}

impl WorkerConfig {
    pub fn with_loop_iteration_limit(mut self, limit: u64) -> Self {
        self.loop_iteration_limit = limit;
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn with_stack_size_limit(mut self, limit: usize) -> Self {
        self.stack_size_limit = limit;
        self
    }

    pub(crate) fn runtime_limits(&self) -> RuntimeLimits {
        let mut limits = RuntimeLimits::default();
        limits.set_loop_iteration_limit(self.loop_iteration_limit);
        limits.set_recursion_limit(self.recursion_limit);
        limits.set_stack_size_limit(self.stack_size_limit);
        limits
    }
}
