//! The seam between the control loop and whatever carries its commands.
//!
//! The control loop never touches sockets.  It hands each decided
//! [`Command`] to a [`CommandLink`] and reads back the [`LinkStatus`].
//! [`TransportSession`] is the production implementation; tests substitute a
//! recording link.

use async_trait::async_trait;
use rcctl_types::{Command, LinkStatus, RcError};

use crate::session::TransportSession;

/// Every command transport must implement this trait.
///
/// # Contract
///
/// * `publish` – never blocks.  `Ok` means the command was accepted for
///   delivery; any error means it was dropped and must not be recorded as
///   sent.
/// * `status` – the link state as of now.
/// * `disconnect` – flush what was accepted, close, and stop; idempotent.
#[async_trait]
pub trait CommandLink: Send {
    fn publish(&self, cmd: &Command) -> Result<(), RcError>;

    fn status(&self) -> LinkStatus;

    async fn disconnect(&mut self);
}

#[async_trait]
impl CommandLink for TransportSession {
    fn publish(&self, cmd: &Command) -> Result<(), RcError> {
        TransportSession::publish(self, cmd)
    }

    fn status(&self) -> LinkStatus {
        TransportSession::status(self)
    }

    async fn disconnect(&mut self) {
        TransportSession::disconnect(self).await;
    }
}
