//! Transport driver interface.
//!
//! The host core does not talk to hardware. A transport registers a
//! [`Driver`] descriptor with its capabilities: `open` brings up the link,
//! `send` transmits one fully framed command buffer. Inbound packets are
//! handed to the core through [`Host::deliver`](crate::Host::deliver).
//!
//! [`h4`] provides a ready-made UART (H4) framing on top of `bt-hci` and
//! `embedded-io`.

pub mod h4;

use crate::buf::Buffer;
use crate::error::DriverError;
use crate::hci::AclHdr;

/// Link bring-up capability.
pub type OpenFn<'d> = &'d (dyn Fn() -> Result<(), DriverError> + Sync);

/// Command transmit capability.
///
/// Called once per command from the command context. The buffer holds the
/// command header and parameters, preceded by the driver's `head_reserve`
/// bytes of headroom. The core keeps ownership: the buffer stays in flight
/// until the controller acknowledges it.
pub type SendFn<'d> = &'d (dyn Fn(&mut Buffer<'_>) + Sync);

/// Descriptor of a registered HCI transport.
#[derive(Clone, Copy)]
pub struct Driver<'d> {
    /// Driver name, also used to match `unregister` against `register`.
    pub name: &'static str,
    /// Bytes of headroom the driver needs in front of the command header.
    pub head_reserve: usize,
    pub open: Option<OpenFn<'d>>,
    pub send: Option<SendFn<'d>>,
}

impl<'d> Driver<'d> {
    /// A driver with no capabilities yet.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            head_reserve: 0,
            open: None,
            send: None,
        }
    }

    pub fn with_head_reserve(mut self, head_reserve: usize) -> Self {
        self.head_reserve = head_reserve;
        self
    }

    pub fn with_open(mut self, open: OpenFn<'d>) -> Self {
        self.open = Some(open);
        self
    }

    pub fn with_send(mut self, send: SendFn<'d>) -> Self {
        self.send = Some(send);
        self
    }
}

impl core::fmt::Debug for Driver<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name)
            .field("head_reserve", &self.head_reserve)
            .field("open", &self.open.is_some())
            .field("send", &self.send.is_some())
            .finish()
    }
}

/// Consumer of validated inbound ACL data (the L2CAP layer).
///
/// `payload` holds exactly `hdr.len` bytes with the ACL header stripped.
pub trait AclHandler: Sync {
    fn recv(&self, hdr: AclHdr, payload: Buffer<'_>);
}
