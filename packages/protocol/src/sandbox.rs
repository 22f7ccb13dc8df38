//! The isolation seam.
//!
//! A sandbox starts a worker somewhere the host cannot reach into and hands
//! back the host's end of the channel. The host never learns how the worker is
//! isolated; it only shouts and listens.

use enclosure_core::Result;

use crate::channel::Endpoint;

/// Something that can launch an isolated worker.
pub trait Sandbox: Send + 'static {
    /// Start the worker and return the host's endpoint.
    ///
    /// The worker must announce boot completion by resolving the boot tunnel
    /// with its boot duration in milliseconds.
    fn launch(self) -> Result<Endpoint>;
}

/// A sandbox built from a closure, for wiring custom transports.
pub struct LaunchFn<F>(pub F);

impl<F> Sandbox for LaunchFn<F>
where
    F: FnOnce() -> Result<Endpoint> + Send + 'static,
{
    fn launch(self) -> Result<Endpoint> {
        (self.0)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use enclosure_core::BOOT_TUNNEL;

    #[tokio::test]
    async fn closure_sandbox_hands_back_host_end() {
        let sandbox = LaunchFn(|| {
            let (host, worker) = Endpoint::pair();
            worker.shout(&Message::resolve(BOOT_TUNNEL, 0))?;
            drop(worker);
            Ok(host)
        });

        let mut host = sandbox.launch().unwrap();
        let booted = host.listen().await.unwrap().unwrap();
        assert_eq!(booted.tunnel(), Some(BOOT_TUNNEL));
        assert!(host.listen().await.is_none());
    }
}
