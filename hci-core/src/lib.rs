#![cfg_attr(not(test), no_std)]
#![doc = "Bluetooth HCI host core."]
#![doc = ""]
#![doc = "Owns the command and receive channels between the upper stack and a"]
#![doc = "controller transport: a fixed buffer pool, single-credit command flow"]
#![doc = "control, event decoding and the controller bring-up sequence."]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod buf;
pub mod config;
pub mod driver;
pub mod error;
pub mod hci;
pub mod state;

mod event;
mod host;
mod init;

pub use buf::{BufKind, BufPool, Buffer};
pub use config::Config;
pub use driver::{AclHandler, Driver};
pub use error::{BufError, DriverError, Error};
pub use event::Status;
pub use host::Host;
pub use state::{BdAddr, DevState};
