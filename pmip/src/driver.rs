//! The access driver contract.
//!
//! A driver watches the access links for terminals associating and
//! dissociating, and reports those events into the MAG strand through a
//! [`DriverHandle`]. How a driver learns about attachments is its own
//! business: link-layer sniffing, accounting feeds, a vendor API, or a
//! plain timer for testing. The core only maps the reported link-layer
//! address through the node database.

use std::io;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mac::MacAddress;

/// A link-layer attachment change on an access link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentEvent {
    /// A terminal associated.
    Attach { ll_addr: MacAddress, link: u32 },
    /// A terminal dissociated.
    Detach { ll_addr: MacAddress, link: u32 },
}

/// The handle a driver delivers its events through. Events land on the MAG
/// strand and are processed in delivery order.
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<AttachmentEvent>,
}

impl DriverHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<AttachmentEvent>) -> Self {
        DriverHandle { tx }
    }

    /// Report a terminal association.
    pub fn attach(&self, ll_addr: MacAddress, link: u32) {
        let _ = self.tx.send(AttachmentEvent::Attach { ll_addr, link });
    }

    /// Report a terminal dissociation.
    pub fn detach(&self, ll_addr: MacAddress, link: u32) {
        let _ = self.tx.send(AttachmentEvent::Detach { ll_addr, link });
    }
}

/// The capability set the MAG core expects from an attachment detector.
pub trait AccessDriver: Send + 'static {
    /// Start watching and deliver events through the given handle until
    /// [`AccessDriver::stop`] is called.
    fn start(&mut self, handle: DriverHandle) -> io::Result<()>;

    /// Stop watching. Events already delivered stay queued.
    fn stop(&mut self);
}

/// A deterministic driver for demos and tests: walks its client list on a
/// fixed period and flips one terminal between attached and detached per
/// tick.
pub struct DummyDriver {
    clients: Vec<(MacAddress, u32)>,
    period: Duration,
    cancel: Option<CancellationToken>,
}

impl DummyDriver {
    /// Create a new `DummyDriver` over the given (terminal, link) list.
    pub fn new(clients: Vec<(MacAddress, u32)>, period: Duration) -> Self {
        DummyDriver {
            clients,
            period,
            cancel: None,
        }
    }
}

impl AccessDriver for DummyDriver {
    fn start(&mut self, handle: DriverHandle) -> io::Result<()> {
        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let clients = self.clients.clone();
        let period = self.period;
        tokio::spawn(async move {
            let mut attached = vec![false; clients.len()];
            let mut cursor = 0usize;
            let mut ticker = tokio::time::interval(period);
            loop {
                select! {
                    _ = ticker.tick() => {}
                    _ = token.cancelled() => return,
                }
                if clients.is_empty() {
                    continue;
                }

                let (ll_addr, link) = clients[cursor];
                if attached[cursor] {
                    debug!(%ll_addr, link, "Dummy driver detaching terminal");
                    handle.detach(ll_addr, link);
                } else {
                    debug!(%ll_addr, link, "Dummy driver attaching terminal");
                    handle.attach(ll_addr, link);
                }
                attached[cursor] = !attached[cursor];
                cursor = (cursor + 1) % clients.len();
            }
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::{AccessDriver, AttachmentEvent, DriverHandle, DummyDriver};
    use crate::mac::MacAddress;

    #[tokio::test(start_paused = true)]
    async fn dummy_driver_flips_clients() {
        let mac: MacAddress = "aa:bb:cc:00:00:01".parse().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut driver = DummyDriver::new(vec![(mac, 2)], Duration::from_secs(5));
        driver.start(DriverHandle::new(tx)).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(AttachmentEvent::Attach { ll_addr: mac, link: 2 })
        );
        assert_eq!(
            rx.recv().await,
            Some(AttachmentEvent::Detach { ll_addr: mac, link: 2 })
        );
        assert_eq!(
            rx.recv().await,
            Some(AttachmentEvent::Attach { ll_addr: mac, link: 2 })
        );

        driver.stop();
    }
}
