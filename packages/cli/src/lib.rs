//! # enclosure-cli
//!
//! Runs a dependency manifest inside a fresh enclosure VM.
//!
//! A manifest names the enclosures to create, the dependencies to install in
//! each, and one entry dependency to execute:
//!
//! ```json
//! {
//!   "enclosures": ["app", "app.plugin"],
//!   "install": {
//!     "app": [{ "name": "base", "code": "return 20;" }]
//!   },
//!   "entry": {
//!     "enclosure": "app.plugin",
//!     "dependency": {
//!       "name": "main",
//!       "code": "return base + n;",
//!       "dependencies": { "base": "base" }
//!     },
//!     "args": { "n": 22 }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use enclosure_vm::{Dependency, Vm, VmConfig};

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Vm(#[from] enclosure_vm::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// What to run.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Enclosures to create. Parents are created before their children
    /// regardless of order.
    #[serde(default)]
    pub enclosures: Vec<String>,

    /// Dependencies to install, by enclosure.
    #[serde(default)]
    pub install: BTreeMap<String, Vec<Dependency>>,

    pub entry: Entry,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entry {
    pub enclosure: String,
    pub dependency: Dependency,
    #[serde(default)]
    pub args: Map<String, Value>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

/// Load a VM configuration file; missing fields keep their defaults.
pub fn load_config(path: Option<&Path>) -> Result<VmConfig> {
    match path {
        Some(path) => read_json(path),
        None => Ok(VmConfig::default()),
    }
}

/// Boot a VM, apply `manifest` and return the entry's result.
pub async fn run(manifest: Manifest, config: VmConfig) -> Result<Value> {
    let vm = Vm::start(config).await?;
    info!(id = %vm.id(), "vm started");
    let result = apply(&vm, manifest).await;
    vm.stop();
    result
}

async fn apply(vm: &Vm, manifest: Manifest) -> Result<Value> {
    let mut enclosures = manifest.enclosures;
    enclosures.sort_by_key(|name| name.matches('.').count());
    for name in &enclosures {
        debug!(enclosure = %name, "creating");
        vm.create(name).await?;
    }

    for (enclosure, dependencies) in manifest.install {
        debug!(enclosure = %enclosure, count = dependencies.len(), "installing");
        vm.install_all(&enclosure, dependencies).await?;
    }

    let Entry {
        enclosure,
        dependency,
        args,
    } = manifest.entry;
    info!(enclosure = %enclosure, dependency = dependency.name(), "executing entry");
    Ok(vm.execute(&enclosure, dependency, args).await?)
}
