//! The enclosure table: a hierarchical namespace of enclosures.
//!
//! Each side of the boundary keeps its own table. The tables are kept
//! structurally analogous by applying the same operations in the same order,
//! never by sharing storage.
//!
//! The table is generic over the listener callback type `C` and the
//! dependency value type `V`, so the worker can store script values and the
//! host can store whatever it needs to mirror installs.
//!
//! Dependency lookup walks the parent chain: an enclosure stores only its
//! local entries and falls back to its parent's table. Every enclosure also
//! has a port, a stable integer handle that survives merge renames; freed
//! ports are never reused.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::event::{self, Filter};
use crate::name;
use crate::tunnel::TunnelId;

/// Stable handle to an enclosure.
pub type Port = u64;

/// Handle returned when registering a listener.
pub type ListenerId = u64;

struct Listener<C> {
    filter: Filter,
    callback: C,
    once: bool,
}

/// One enclosure in the table.
pub struct Enclosure<C, V> {
    name: String,
    port: Port,
    dependencies: BTreeMap<String, V>,
    linked: BTreeSet<String>,
    muted: bool,
    listeners: BTreeMap<ListenerId, Listener<C>>,
    tunnels: BTreeSet<TunnelId>,
}

impl<C, V> Enclosure<C, V> {
    fn new(name: String, port: Port) -> Self {
        Self {
            name,
            port,
            dependencies: BTreeMap::new(),
            linked: BTreeSet::new(),
            muted: false,
            listeners: BTreeMap::new(),
            tunnels: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Enclosures that also receive events cast here.
    pub fn linked(&self) -> &BTreeSet<String> {
        &self.linked
    }

    /// Dependencies defined locally, excluding inherited ones.
    pub fn local_dependencies(&self) -> &BTreeMap<String, V> {
        &self.dependencies
    }

    /// Tunnels awaiting a response on behalf of this enclosure.
    pub fn tunnels(&self) -> &BTreeSet<TunnelId> {
        &self.tunnels
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Outcome of deleting an enclosure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    /// The enclosure and all its descendants, sorted.
    pub removed: Vec<String>,
    /// Ports that no longer resolve.
    pub ports: Vec<Port>,
    /// Tunnels owned by removed enclosures, ascending.
    pub tunnels: Vec<TunnelId>,
}

/// Outcome of merging an enclosure into its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merge {
    /// The parent that absorbed the enclosure.
    pub into: String,
    /// `(old, new)` names of re-parented descendants, sorted by old name.
    pub renamed: Vec<(String, String)>,
}

/// A listener selected by [`EnclosureTable::cast`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch<C> {
    pub listener: ListenerId,
    pub enclosure: String,
    pub callback: C,
}

/// The hierarchical enclosure namespace.
pub struct EnclosureTable<C, V> {
    enclosures: BTreeMap<String, Enclosure<C, V>>,
    ports: BTreeMap<Port, String>,
    next_port: Port,
    next_listener: ListenerId,
}

impl<C, V> Default for EnclosureTable<C, V> {
    fn default() -> Self {
        Self {
            enclosures: BTreeMap::new(),
            ports: BTreeMap::new(),
            next_port: 1,
            next_listener: 1,
        }
    }
}

impl<C, V> EnclosureTable<C, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.enclosures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enclosures.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.enclosures.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Enclosure<C, V>> {
        self.enclosures.get(name)
    }

    fn get_existing(&self, name: &str) -> Result<&Enclosure<C, V>> {
        self.enclosures
            .get(name)
            .ok_or_else(|| Error::UnknownEnclosure(name.to_string()))
    }

    fn get_existing_mut(&mut self, name: &str) -> Result<&mut Enclosure<C, V>> {
        self.enclosures
            .get_mut(name)
            .ok_or_else(|| Error::UnknownEnclosure(name.to_string()))
    }

    /// Port of an existing enclosure.
    pub fn port_of(&self, name: &str) -> Result<Port> {
        self.get_existing(name).map(Enclosure::port)
    }

    /// Current name behind a port, following merges.
    pub fn name_of(&self, port: Port) -> Option<&str> {
        self.ports.get(&port).map(String::as_str)
    }

    /// All names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.enclosures.keys().map(String::as_str)
    }

    /// Strict descendants of `name`, sorted.
    fn descendants(&self, name: &str) -> Vec<String> {
        let prefix = format!("{}{}", name, name::SEPARATOR);
        self.enclosures
            .range(prefix.clone()..)
            .map(|(n, _)| n)
            .take_while(|n| n.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Create an enclosure, returning its new port.
    pub fn create(&mut self, name: &str) -> Result<Port> {
        name::validate(name)?;
        if self.enclosures.contains_key(name) {
            return Err(Error::DuplicateName(name.to_string()));
        }
        if let Some(parent) = name::parent(name) {
            if !self.enclosures.contains_key(parent) {
                return Err(Error::MissingParent(parent.to_string()));
            }
        }

        let port = self.next_port;
        self.next_port += 1;
        self.ports.insert(port, name.to_string());
        self.enclosures
            .insert(name.to_string(), Enclosure::new(name.to_string(), port));
        Ok(port)
    }

    /// Delete an enclosure and all its descendants.
    pub fn delete(&mut self, name: &str) -> Result<Deletion> {
        self.get_existing(name)?;

        let mut removed = self.descendants(name);
        removed.push(name.to_string());
        removed.sort();
        let removed_set: BTreeSet<&str> = removed.iter().map(String::as_str).collect();

        let mut tunnels = BTreeSet::new();
        for n in &removed {
            if let Some(enclosure) = self.enclosures.remove(n) {
                tunnels.extend(enclosure.tunnels);
            }
        }

        let ports: Vec<Port> = self
            .ports
            .iter()
            .filter(|(_, n)| removed_set.contains(n.as_str()))
            .map(|(p, _)| *p)
            .collect();
        for port in &ports {
            self.ports.remove(port);
        }

        for enclosure in self.enclosures.values_mut() {
            enclosure
                .linked
                .retain(|target| !removed_set.contains(target.as_str()));
        }

        Ok(Deletion {
            removed,
            ports,
            tunnels: tunnels.into_iter().collect(),
        })
    }

    /// Fold an enclosure into its parent.
    ///
    /// Tunnels, listeners, links and local dependencies move to the parent and
    /// the enclosure's port is redirected to it. Descendants are re-parented
    /// under the parent with their relative sub-path preserved; a descendant
    /// that becomes a direct child of the parent inherits from it, deeper ones
    /// keep inheriting through their renamed ancestors.
    pub fn merge(&mut self, name: &str) -> Result<Merge> {
        let child = self.get_existing(name)?;
        let parent = name::parent(name)
            .ok_or_else(|| Error::NoParent(name.to_string()))?
            .to_string();

        let descendants = self.descendants(name);
        let renamed: Vec<(String, String)> = descendants
            .iter()
            .filter_map(|d| name::rebase(d, name, &parent).map(|new| (d.clone(), new)))
            .collect();

        let moving: BTreeSet<&str> = descendants
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(name))
            .collect();
        if let Some((_, new)) = renamed
            .iter()
            .find(|(_, new)| self.contains(new) && !moving.contains(new.as_str()))
        {
            return Err(Error::NameCollision(new.clone()));
        }

        let parent_deps = &self.get_existing(&parent)?.dependencies;
        if let Some(conflict) = child
            .dependencies
            .keys()
            .find(|dep| parent_deps.contains_key(*dep))
        {
            return Err(Error::DuplicateDependency(conflict.clone()));
        }

        // Validation done; from here on nothing fails.
        let mut renames: BTreeMap<String, String> = renamed.iter().cloned().collect();
        renames.insert(name.to_string(), parent.clone());

        let mut moved_descendants = Vec::with_capacity(descendants.len());
        for d in &descendants {
            if let Some(enclosure) = self.enclosures.remove(d) {
                moved_descendants.push(enclosure);
            }
        }
        if let Some(child) = self.enclosures.remove(name) {
            if let Some(target) = self.enclosures.get_mut(&parent) {
                target.dependencies.extend(child.dependencies);
                target.listeners.extend(child.listeners);
                target.tunnels.extend(child.tunnels);
                target.linked.extend(child.linked);
            }
        }
        for mut enclosure in moved_descendants {
            if let Some(new) = renames.get(&enclosure.name) {
                enclosure.name = new.clone();
            }
            self.enclosures.insert(enclosure.name.clone(), enclosure);
        }

        for current in self.ports.values_mut() {
            if let Some(new) = renames.get(current.as_str()) {
                *current = new.clone();
            }
        }

        for enclosure in self.enclosures.values_mut() {
            let owner = enclosure.name.clone();
            enclosure.linked = std::mem::take(&mut enclosure.linked)
                .into_iter()
                .map(|target| renames.get(&target).cloned().unwrap_or(target))
                .filter(|target| *target != owner && !name::is_related(target, &owner))
                .collect();
        }

        Ok(Merge {
            into: parent,
            renamed,
        })
    }

    /// Link `target` to `name`, so that `target`'s listeners hear events cast on `name`.
    ///
    /// Returns `false` without linking if `target` is `name`, an ancestor or
    /// descendant of it, or already linked.
    pub fn link(&mut self, name: &str, target: &str) -> Result<bool> {
        self.get_existing(target)?;
        let enclosure = self.get_existing_mut(name)?;
        if target == name || name::is_related(target, name) {
            return Ok(false);
        }
        Ok(enclosure.linked.insert(target.to_string()))
    }

    /// Remove a link, returning whether it existed.
    pub fn unlink(&mut self, name: &str, target: &str) -> Result<bool> {
        self.get_existing(target)?;
        Ok(self.get_existing_mut(name)?.linked.remove(target))
    }

    /// Mute an enclosure, returning the previous value.
    pub fn mute(&mut self, name: &str) -> Result<bool> {
        let enclosure = self.get_existing_mut(name)?;
        Ok(std::mem::replace(&mut enclosure.muted, true))
    }

    /// Unmute an enclosure, returning the previous value.
    pub fn unmute(&mut self, name: &str) -> Result<bool> {
        let enclosure = self.get_existing_mut(name)?;
        Ok(std::mem::replace(&mut enclosure.muted, false))
    }

    pub fn is_muted(&self, name: &str) -> Result<bool> {
        self.get_existing(name).map(Enclosure::is_muted)
    }

    /// Look up a dependency, falling through the parent chain.
    pub fn lookup(&self, name: &str, dependency: &str) -> Result<Option<&V>> {
        self.get_existing(name)?;
        Ok(std::iter::once(name)
            .chain(name::ancestors(name))
            .find_map(|n| self.enclosures.get(n)?.dependencies.get(dependency)))
    }

    /// Define a dependency locally, failing if the name is already visible.
    pub fn define(&mut self, name: &str, dependency: &str, value: V) -> Result<()> {
        if self.lookup(name, dependency)?.is_some() {
            return Err(Error::DuplicateDependency(dependency.to_string()));
        }
        self.get_existing_mut(name)?
            .dependencies
            .insert(dependency.to_string(), value);
        Ok(())
    }

    /// Names of every dependency visible in `name`, local or inherited, sorted.
    pub fn list_installed(&self, name: &str) -> Result<Vec<String>> {
        self.get_existing(name)?;
        let visible: BTreeSet<&String> = std::iter::once(name)
            .chain(name::ancestors(name))
            .filter_map(|n| self.enclosures.get(n))
            .flat_map(|e| e.dependencies.keys())
            .collect();
        Ok(visible.into_iter().cloned().collect())
    }

    /// Enclosures `name` links to, sorted.
    pub fn list_links_to(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.get_existing(name)?.linked.iter().cloned().collect())
    }

    /// Enclosures that link to `name`, sorted.
    pub fn list_linked_from(&self, name: &str) -> Result<Vec<String>> {
        self.get_existing(name)?;
        Ok(self
            .enclosures
            .values()
            .filter(|e| e.linked.contains(name))
            .map(|e| e.name.clone())
            .collect())
    }

    /// Enclosures without a parent, sorted.
    pub fn list_root_enclosures(&self) -> Vec<String> {
        self.enclosures
            .keys()
            .filter(|n| name::parent(n).is_none())
            .cloned()
            .collect()
    }

    /// Descendants of `name` at most `depth` segments deeper; `0` means unlimited.
    pub fn sub_enclosures(&self, name: &str, depth: usize) -> Result<Vec<String>> {
        self.get_existing(name)?;
        let base = name::depth(name);
        Ok(self
            .descendants(name)
            .into_iter()
            .filter(|d| depth == 0 || name::depth(d) - base <= depth)
            .collect())
    }

    /// Register a listener on `name`.
    pub fn on(&mut self, name: &str, filter: Filter, callback: C) -> Result<ListenerId> {
        self.add_listener(name, filter, callback, false)
    }

    /// Register a listener that is removed after its first dispatch.
    pub fn once(&mut self, name: &str, filter: Filter, callback: C) -> Result<ListenerId> {
        self.add_listener(name, filter, callback, true)
    }

    fn add_listener(
        &mut self,
        name: &str,
        filter: Filter,
        callback: C,
        once: bool,
    ) -> Result<ListenerId> {
        let id = self.next_listener;
        self.get_existing_mut(name)?.listeners.insert(
            id,
            Listener {
                filter,
                callback,
                once,
            },
        );
        self.next_listener += 1;
        Ok(id)
    }

    /// Remove a listener, returning whether it was registered.
    pub fn off(&mut self, listener: ListenerId) -> bool {
        self.enclosures
            .values_mut()
            .any(|e| e.listeners.remove(&listener).is_some())
    }

    /// Every enclosure that hears events cast on `name`: itself, its
    /// ancestors, its descendants and the enclosures it links to.
    pub fn audience(&self, name: &str) -> Result<BTreeSet<String>> {
        let enclosure = self.get_existing(name)?;
        let mut audience: BTreeSet<String> = std::iter::once(name)
            .chain(name::ancestors(name))
            .map(str::to_string)
            .collect();
        audience.extend(self.descendants(name));
        audience.extend(
            enclosure
                .linked
                .iter()
                .filter(|l| self.enclosures.contains_key(*l))
                .cloned(),
        );
        Ok(audience)
    }

    /// Record that tunnel `id` is pending on behalf of the enclosure behind `port`.
    pub fn attach_tunnel(&mut self, port: Port, id: TunnelId) -> bool {
        let Some(name) = self.ports.get(&port) else {
            return false;
        };
        match self.enclosures.get_mut(name) {
            Some(enclosure) => enclosure.tunnels.insert(id),
            None => false,
        }
    }

    /// Forget a settled tunnel.
    pub fn detach_tunnel(&mut self, port: Port, id: TunnelId) -> bool {
        let Some(name) = self.ports.get(&port) else {
            return false;
        };
        match self.enclosures.get_mut(name) {
            Some(enclosure) => enclosure.tunnels.remove(&id),
            None => false,
        }
    }
}

impl<C: Clone, V> EnclosureTable<C, V> {
    /// Select every listener in the audience of `name` whose filter matches `event`.
    ///
    /// The caller is responsible for invoking the callbacks later, outside the
    /// current call stack. Listeners registered with `once` are removed here.
    pub fn cast(&mut self, name: &str, event: &str) -> Result<Vec<Dispatch<C>>> {
        event::validate_event(event)?;
        let audience = self.audience(name)?;

        let mut dispatches = Vec::new();
        for target in audience {
            let Some(enclosure) = self.enclosures.get_mut(&target) else {
                continue;
            };
            let mut spent = Vec::new();
            for (id, listener) in &enclosure.listeners {
                if listener.filter.matches(event) {
                    dispatches.push(Dispatch {
                        listener: *id,
                        enclosure: target.clone(),
                        callback: listener.callback.clone(),
                    });
                    if listener.once {
                        spent.push(*id);
                    }
                }
            }
            for id in spent {
                enclosure.listeners.remove(&id);
            }
        }
        Ok(dispatches)
    }
}
