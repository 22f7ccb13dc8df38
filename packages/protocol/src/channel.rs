//! The message channel between host and worker.
//!
//! Frames are JSON text carried over tokio channels. Each side holds an
//! [`Endpoint`]: it can shout messages at the other side and listen for the
//! ones coming back. Unbounded channels keep `shout` synchronous, so either
//! side can send from non-async code without blocking.

use tokio::sync::mpsc;
use tracing::trace;

use enclosure_core::{Error, Result};

use crate::message::{decode, Message, Undecodable};

/// One decoded frame, or the reason it could not be decoded.
pub type Frame = std::result::Result<Message, Undecodable>;

/// Sending half of an endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shouter {
    tx: mpsc::UnboundedSender<String>,
}

impl Shouter {
    /// Send a message. Fails with `Stopped` once the other side is gone.
    pub fn shout(&self, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        trace!(name = message.name(), "shout");
        self.tx.send(frame).map_err(|_| Error::Stopped)
    }

    /// Send a raw frame, bypassing encoding.
    pub fn shout_raw(&self, frame: impl Into<String>) -> Result<()> {
        self.tx.send(frame.into()).map_err(|_| Error::Stopped)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Outcome of a non-blocking receive.
#[derive(Debug)]
pub enum TryListen {
    Frame(Frame),
    Empty,
    Closed,
}

/// Receiving half of an endpoint.
#[derive(Debug)]
pub struct Listener {
    rx: mpsc::UnboundedReceiver<String>,
}

impl Listener {
    /// Wait for the next frame. `None` once the other side is gone.
    pub async fn listen(&mut self) -> Option<Frame> {
        self.rx.recv().await.map(|frame| decode(&frame))
    }

    /// Wait for the next frame on a thread outside any async runtime.
    pub fn blocking_listen(&mut self) -> Option<Frame> {
        self.rx.blocking_recv().map(|frame| decode(&frame))
    }

    /// Take the next frame if one is already queued.
    pub fn try_listen(&mut self) -> TryListen {
        match self.rx.try_recv() {
            Ok(frame) => TryListen::Frame(decode(&frame)),
            Err(mpsc::error::TryRecvError::Empty) => TryListen::Empty,
            Err(mpsc::error::TryRecvError::Disconnected) => TryListen::Closed,
        }
    }

    /// Stop accepting frames; queued frames can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// One side of a bidirectional channel.
#[derive(Debug)]
pub struct Endpoint {
    pub shouter: Shouter,
    pub listener: Listener,
}

impl Endpoint {
    /// Create a connected pair. Whatever one endpoint shouts, the other hears.
    pub fn pair() -> (Self, Self) {
        let (tx1, rx1) = mpsc::unbounded_channel();
        let (tx2, rx2) = mpsc::unbounded_channel();

        let a = Self {
            shouter: Shouter { tx: tx1 },
            listener: Listener { rx: rx2 },
        };
        let b = Self {
            shouter: Shouter { tx: tx2 },
            listener: Listener { rx: rx1 },
        };
        (a, b)
    }

    pub fn shout(&self, message: &Message) -> Result<()> {
        self.shouter.shout(message)
    }

    pub async fn listen(&mut self) -> Option<Frame> {
        self.listener.listen().await
    }

    pub fn split(self) -> (Shouter, Listener) {
        (self.shouter, self.listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclosure_core::ErrorKind;

    #[tokio::test]
    async fn pair_is_bidirectional() {
        let (mut host, mut worker) = Endpoint::pair();

        host.shout(&Message::Ping).unwrap();
        assert_eq!(worker.listen().await.unwrap().unwrap(), Message::Ping);

        worker.shout(&Message::Pong).unwrap();
        assert_eq!(host.listen().await.unwrap().unwrap(), Message::Pong);
    }

    #[tokio::test]
    async fn delivery_is_in_send_order() {
        let (host, mut worker) = Endpoint::pair();
        for tunnel in 1..=5 {
            host.shout(&Message::ListRootEnclosures { tunnel }).unwrap();
        }
        for tunnel in 1..=5 {
            let msg = worker.listen().await.unwrap().unwrap();
            assert_eq!(msg.tunnel(), Some(tunnel));
        }
    }

    #[test]
    fn try_listen_states() {
        let (host, worker) = Endpoint::pair();
        let (_, mut listener) = worker.split();
        assert!(matches!(listener.try_listen(), TryListen::Empty));

        host.shout(&Message::Ping).unwrap();
        assert!(matches!(listener.try_listen(), TryListen::Frame(Ok(Message::Ping))));

        drop(host);
        assert!(matches!(listener.try_listen(), TryListen::Closed));
    }

    #[test]
    fn undecodable_frames_are_surfaced() {
        let (host, worker) = Endpoint::pair();
        let (_, mut listener) = worker.split();
        host.shouter
            .shout_raw(r#"{"name":"warp","tunnel":3}"#)
            .unwrap();
        match listener.try_listen() {
            TryListen::Frame(Err(undecodable)) => {
                assert_eq!(undecodable.tunnel, Some(3));
                assert_eq!(undecodable.error.kind(), ErrorKind::UnknownMessage);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn shout_after_peer_drop_is_stopped() {
        let (host, worker) = Endpoint::pair();
        drop(worker);
        assert_eq!(host.shout(&Message::Ping), Err(Error::Stopped));
        assert!(host.shouter.is_closed());
    }
}
