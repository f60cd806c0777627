//! Command completion decoding.
//!
//! A Command Complete event is decoded into a [`Completion`]: the opcode, the
//! controller status and, for commands the host tracks, the typed return
//! parameters. Return parameters are only decoded when the status reports
//! success, so a rejected command never touches [`DevState`].

use crate::hci::Opcode;
use crate::state::{BdAddr, DevState};

/// Controller status byte from a completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(pub u8);

impl Status {
    pub const SUCCESS: Self = Self(0);
    /// Unspecified Error. Stands in for a status the controller left out.
    pub const UNSPECIFIED: Self = Self(0x1f);

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

/// Return parameters of a completed command, past the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnParams {
    /// Command carries no state-relevant return parameters, or failed.
    None,
    LocalVersion {
        hci_version: u8,
        hci_revision: u16,
        manufacturer: u16,
    },
    LocalFeatures([u8; 8]),
    BufferSize {
        acl_mtu: u16,
        acl_pkts: u16,
    },
    BdAddr(BdAddr),
    LeBufferSize {
        le_mtu: u16,
        le_pkts: u8,
    },
    LeLocalFeatures([u8; 8]),
    /// Return parameters shorter than the command defines.
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    pub opcode: u16,
    pub status: Status,
    pub ret: ReturnParams,
}

impl Completion {
    /// Decode the return parameters of a Command Complete event.
    ///
    /// Only NOP may omit the status byte. Any other opcode completing without
    /// one is reported as truncated with [`Status::UNSPECIFIED`].
    pub fn complete(opcode: u16, params: &[u8]) -> Self {
        let (status, rest) = match params.split_first() {
            Some((status, rest)) => (Status(*status), rest),
            None if opcode == Opcode::NOP => (Status::SUCCESS, params),
            None => {
                return Self {
                    opcode,
                    status: Status::UNSPECIFIED,
                    ret: ReturnParams::Truncated,
                }
            }
        };

        let ret = if status.is_success() {
            decode(Opcode::from_raw(opcode), rest)
        } else {
            ReturnParams::None
        };

        Self {
            opcode,
            status,
            ret,
        }
    }

    /// A Command Status event: status only, no return parameters.
    pub fn status(opcode: u16, status: u8) -> Self {
        Self {
            opcode,
            status: Status(status),
            ret: ReturnParams::None,
        }
    }

    /// Record the completion in the controller state.
    pub fn apply(&self, state: &mut DevState) {
        match self.ret {
            ReturnParams::None => {}
            ReturnParams::LocalVersion {
                hci_version,
                hci_revision,
                manufacturer,
            } => {
                state.hci_version = hci_version;
                state.hci_revision = hci_revision;
                state.manufacturer = manufacturer;
            }
            ReturnParams::LocalFeatures(features) => state.features = features,
            ReturnParams::BufferSize { acl_mtu, acl_pkts } => {
                // LE buffers, when present, take precedence.
                if state.le_mtu == 0 {
                    state.le_mtu = acl_mtu;
                    state.le_pkts = acl_pkts;
                }
            }
            ReturnParams::BdAddr(addr) => state.bdaddr = addr,
            ReturnParams::LeBufferSize { le_mtu, le_pkts } => {
                state.le_mtu = le_mtu;
                state.le_pkts = le_pkts as u16;
            }
            ReturnParams::LeLocalFeatures(features) => state.le_features = features,
            ReturnParams::Truncated => {
                error!(
                    "[hci] truncated return parameters for opcode 0x{:04X}",
                    self.opcode
                );
            }
        }
    }
}

fn decode(opcode: Opcode, p: &[u8]) -> ReturnParams {
    let parsed = match opcode {
        Opcode::Reset | Opcode::SetEventMask | Opcode::WriteLeHostSupp | Opcode::Nop => {
            Some(ReturnParams::None)
        }
        Opcode::ReadLocalVersionInfo => match p {
            [ver, rev_lo, rev_hi, _lmp, man_lo, man_hi, ..] => Some(ReturnParams::LocalVersion {
                hci_version: *ver,
                hci_revision: u16::from_le_bytes([*rev_lo, *rev_hi]),
                manufacturer: u16::from_le_bytes([*man_lo, *man_hi]),
            }),
            _ => None,
        },
        Opcode::ReadLocalFeatures => features(p).map(ReturnParams::LocalFeatures),
        Opcode::ReadBufferSize => match p {
            [mtu_lo, mtu_hi, _sco_mtu, num_lo, num_hi, ..] => Some(ReturnParams::BufferSize {
                acl_mtu: u16::from_le_bytes([*mtu_lo, *mtu_hi]),
                acl_pkts: u16::from_le_bytes([*num_lo, *num_hi]),
            }),
            _ => None,
        },
        Opcode::ReadBdAddr => p
            .get(..6)
            .and_then(|a| a.try_into().ok())
            .map(|a| ReturnParams::BdAddr(BdAddr(a))),
        Opcode::LeReadBufferSize => match p {
            [mtu_lo, mtu_hi, num, ..] => Some(ReturnParams::LeBufferSize {
                le_mtu: u16::from_le_bytes([*mtu_lo, *mtu_hi]),
                le_pkts: *num,
            }),
            _ => None,
        },
        Opcode::LeReadLocalFeatures => features(p).map(ReturnParams::LeLocalFeatures),
        Opcode::Other(raw) => {
            debug!("[hci] no handler for opcode 0x{:04X}", raw);
            Some(ReturnParams::None)
        }
    };

    parsed.unwrap_or(ReturnParams::Truncated)
}

fn features(p: &[u8]) -> Option<[u8; 8]> {
    p.get(..8).and_then(|f| f.try_into().ok())
}
