//! Request/response correlation across the message channel.
//!
//! Every state-changing request opens one tunnel and is settled by exactly one
//! `resolve` or `reject`. The multiplexer is generic over the pending handler
//! so each side can store whatever completes its calls (a oneshot sender on
//! the host, script promise resolvers in the worker).

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::table::Port;

/// Correlation id carried by request, `resolve` and `reject` messages.
pub type TunnelId = u64;

/// Tunnel reserved for boot completion.
pub const BOOT_TUNNEL: TunnelId = 0;

/// Something that completes a pending call.
pub trait Settle {
    type Value;

    fn resolve(self, value: Self::Value);
    fn reject(self, error: Error);
}

struct Pending<T> {
    owner: Option<Port>,
    handler: T,
}

/// Open tunnels on one side of the boundary.
pub struct Tunnels<T> {
    open: BTreeMap<TunnelId, Pending<T>>,
    next_id: TunnelId,
}

impl<T> Default for Tunnels<T> {
    fn default() -> Self {
        Self {
            open: BTreeMap::new(),
            next_id: BOOT_TUNNEL + 1,
        }
    }
}

impl<T> Tunnels<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a tunnel on behalf of the enclosure behind `owner`.
    pub fn open(&mut self, owner: Option<Port>, handler: T) -> TunnelId {
        let id = self.next_id;
        self.next_id += 1;
        self.open.insert(id, Pending { owner, handler });
        id
    }

    /// Open the reserved boot tunnel.
    pub fn open_boot(&mut self, handler: T) -> TunnelId {
        self.open.insert(
            BOOT_TUNNEL,
            Pending {
                owner: None,
                handler,
            },
        );
        BOOT_TUNNEL
    }

    /// Remove a tunnel, returning its owner and handler.
    pub fn take(&mut self, id: TunnelId) -> Result<(Option<Port>, T)> {
        self.open
            .remove(&id)
            .map(|p| (p.owner, p.handler))
            .ok_or(Error::UnknownTunnel(id))
    }

    /// Remove every tunnel in `ids` that is still open, in ascending id order.
    pub fn take_many(&mut self, ids: impl IntoIterator<Item = TunnelId>) -> Vec<(TunnelId, T)> {
        let mut ids: Vec<TunnelId> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.into_iter()
            .filter_map(|id| self.open.remove(&id).map(|p| (id, p.handler)))
            .collect()
    }

    /// Remove every open tunnel, in ascending id order.
    pub fn drain(&mut self) -> Vec<(TunnelId, T)> {
        std::mem::take(&mut self.open)
            .into_iter()
            .map(|(id, p)| (id, p.handler))
            .collect()
    }

    pub fn owner(&self, id: TunnelId) -> Option<Port> {
        self.open.get(&id).and_then(|p| p.owner)
    }

    pub fn contains(&self, id: TunnelId) -> bool {
        self.open.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl<T: Settle> Tunnels<T> {
    /// Settle a tunnel successfully.
    pub fn resolve(&mut self, id: TunnelId, value: T::Value) -> Result<Option<Port>> {
        let (owner, handler) = self.take(id)?;
        handler.resolve(value);
        Ok(owner)
    }

    /// Settle a tunnel with an error.
    pub fn reject(&mut self, id: TunnelId, error: Error) -> Result<Option<Port>> {
        let (owner, handler) = self.take(id)?;
        handler.reject(error);
        Ok(owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        label: &'static str,
        log: Log,
    }

    impl Settle for Recorder {
        type Value = i64;

        fn resolve(self, value: i64) {
            self.log.borrow_mut().push(format!("{}:ok:{}", self.label, value));
        }

        fn reject(self, error: Error) {
            self.log
                .borrow_mut()
                .push(format!("{}:err:{}", self.label, error.kind()));
        }
    }

    fn recorder(label: &'static str, log: &Log) -> Recorder {
        Recorder {
            label,
            log: log.clone(),
        }
    }

    #[test]
    fn ids_start_after_boot() {
        let log = Log::default();
        let mut tunnels = Tunnels::new();
        assert_eq!(tunnels.open(None, recorder("a", &log)), 1);
        assert_eq!(tunnels.open(Some(7), recorder("b", &log)), 2);
        assert_eq!(tunnels.owner(2), Some(7));
        assert_eq!(tunnels.open_boot(recorder("boot", &log)), BOOT_TUNNEL);
        assert_eq!(tunnels.len(), 3);
    }

    #[test]
    fn settles_exactly_once() {
        let log = Log::default();
        let mut tunnels = Tunnels::new();
        let id = tunnels.open(None, recorder("a", &log));

        tunnels.resolve(id, 42).unwrap();
        assert_eq!(tunnels.resolve(id, 1), Err(Error::UnknownTunnel(id)));
        assert_eq!(tunnels.reject(id, Error::Stopped), Err(Error::UnknownTunnel(id)));
        assert_eq!(*log.borrow(), vec!["a:ok:42"]);
    }

    #[test]
    fn reject_invokes_error_path() {
        let log = Log::default();
        let mut tunnels = Tunnels::new();
        let id = tunnels.open(Some(3), recorder("a", &log));
        assert_eq!(tunnels.reject(id, Error::Deleted), Ok(Some(3)));
        assert_eq!(*log.borrow(), vec!["a:err:Deleted"]);
        assert!(tunnels.is_empty());
    }

    #[test]
    fn take_many_is_ascending_and_skips_closed() {
        let log = Log::default();
        let mut tunnels = Tunnels::new();
        let a = tunnels.open(None, recorder("a", &log));
        let b = tunnels.open(None, recorder("b", &log));
        let c = tunnels.open(None, recorder("c", &log));
        tunnels.take(b).unwrap();

        let taken: Vec<TunnelId> = tunnels
            .take_many([c, b, a, c])
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(taken, vec![a, c]);
        assert!(tunnels.is_empty());
    }

    #[test]
    fn drain_empties_table() {
        let log = Log::default();
        let mut tunnels = Tunnels::new();
        tunnels.open(None, recorder("a", &log));
        tunnels.open(None, recorder("b", &log));
        let drained: Vec<TunnelId> = tunnels.drain().into_iter().map(|(id, _)| id).collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(tunnels.is_empty());
    }
}
