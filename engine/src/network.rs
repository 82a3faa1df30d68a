//! Connectivity signal.
//!
//! The host application owns the sending half of a `watch` channel and
//! publishes [`Connectivity`] changes into it. The engine only reads the
//! current value; the trigger coordinator awaits transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Whether the remote service is believed reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Connectivity {
    Online,
    Offline,
}

impl Connectivity {
    pub fn is_online(&self) -> bool {
        matches!(self, Connectivity::Online)
    }
}

impl From<bool> for Connectivity {
    fn from(online: bool) -> Self {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }
}

pub type ConnectivitySender = watch::Sender<Connectivity>;
pub type ConnectivityReceiver = watch::Receiver<Connectivity>;

/// A new connectivity channel starting at `initial`.
pub fn channel(initial: Connectivity) -> (ConnectivitySender, ConnectivityReceiver) {
    watch::channel(initial)
}
