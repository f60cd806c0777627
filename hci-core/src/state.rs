//! Local controller state, as learned during bring-up.

use crate::hci::{le, lmp};

/// Bluetooth device address, in HCI (little-endian) byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BdAddr(pub [u8; 6]);

/// Identity, capabilities and flow-control state of the local controller.
///
/// Written only by the event decoder and the initialization sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevState {
    /// Local device address.
    pub bdaddr: BdAddr,

    pub hci_version: u8,
    pub hci_revision: u16,
    pub manufacturer: u16,

    /// BR/EDR features, page 0.
    pub features: [u8; 8],
    /// LE features.
    pub le_features: [u8; 8],

    /// Controller ACL buffer size. LE values take precedence over BR/EDR.
    pub le_mtu: u16,
    pub le_pkts: u16,

    /// Number of commands the controller accepts right now (0 or 1).
    pub ncmd: u8,
}

impl DevState {
    pub const fn new() -> Self {
        Self {
            bdaddr: BdAddr([0; 6]),
            hci_version: 0,
            hci_revision: 0,
            manufacturer: 0,
            features: [0; 8],
            le_features: [0; 8],
            le_mtu: 0,
            le_pkts: 0,
            ncmd: 0,
        }
    }

    /// Controller supports LE.
    pub fn le_capable(&self) -> bool {
        self.features[lmp::FEATURES_BYTE] & lmp::LE != 0
    }

    /// Controller supports BR/EDR.
    pub fn bredr_capable(&self) -> bool {
        self.features[lmp::FEATURES_BYTE] & lmp::NO_BREDR == 0
    }

    /// Controller supports LE encryption.
    pub fn le_encryption(&self) -> bool {
        self.le_features[0] & le::ENCRYPTION != 0
    }

    /// Forget everything learned from the controller, keeping the credit.
    pub(crate) fn clear_identity(&mut self) {
        *self = Self {
            ncmd: self.ncmd,
            ..Self::new()
        };
    }
}
