//! HCI wire definitions: opcodes, event codes, packet headers and the
//! bring-up parameter encodings.
//!
//! All multi-octet fields are little-endian, as on the HCI wire.

use bt_hci::cmd::{controller_baseband, info, le as le_cmd, Cmd};

/// Raw opcode of a bt-hci command type.
const fn opcode<C: Cmd>() -> u16 {
    C::OPCODE.to_raw()
}

/// Commands the host core knows how to issue or decode.
///
/// Anything else is carried as [`Opcode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    /// No operation. Used by controllers to grant credit unsolicited.
    Nop,
    SetEventMask,
    Reset,
    WriteLeHostSupp,
    ReadLocalVersionInfo,
    ReadLocalFeatures,
    ReadBufferSize,
    ReadBdAddr,
    LeReadBufferSize,
    LeReadLocalFeatures,
    Other(u16),
}

impl Opcode {
    pub const NOP: u16 = 0x0000;
    pub const SET_EVENT_MASK: u16 = opcode::<controller_baseband::SetEventMask>();
    pub const RESET: u16 = opcode::<controller_baseband::Reset>();
    // No bt-hci command type for Write LE Host Support or Read Buffer Size.
    pub const WRITE_LE_HOST_SUPP: u16 = 0x0c6d;
    pub const READ_LOCAL_VERSION_INFO: u16 = opcode::<info::ReadLocalVersionInformation>();
    pub const READ_LOCAL_FEATURES: u16 = opcode::<info::ReadLocalSupportedFeatures>();
    pub const READ_BUFFER_SIZE: u16 = 0x1005;
    pub const READ_BD_ADDR: u16 = opcode::<info::ReadBdAddr>();
    pub const LE_READ_BUFFER_SIZE: u16 = opcode::<le_cmd::LeReadBufferSize>();
    pub const LE_READ_LOCAL_FEATURES: u16 = opcode::<le_cmd::LeReadLocalSupportedFeatures>();

    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            Self::NOP => Self::Nop,
            Self::SET_EVENT_MASK => Self::SetEventMask,
            Self::RESET => Self::Reset,
            Self::WRITE_LE_HOST_SUPP => Self::WriteLeHostSupp,
            Self::READ_LOCAL_VERSION_INFO => Self::ReadLocalVersionInfo,
            Self::READ_LOCAL_FEATURES => Self::ReadLocalFeatures,
            Self::READ_BUFFER_SIZE => Self::ReadBufferSize,
            Self::READ_BD_ADDR => Self::ReadBdAddr,
            Self::LE_READ_BUFFER_SIZE => Self::LeReadBufferSize,
            Self::LE_READ_LOCAL_FEATURES => Self::LeReadLocalFeatures,
            other => Self::Other(other),
        }
    }

    pub const fn raw(self) -> u16 {
        match self {
            Self::Nop => Self::NOP,
            Self::SetEventMask => Self::SET_EVENT_MASK,
            Self::Reset => Self::RESET,
            Self::WriteLeHostSupp => Self::WRITE_LE_HOST_SUPP,
            Self::ReadLocalVersionInfo => Self::READ_LOCAL_VERSION_INFO,
            Self::ReadLocalFeatures => Self::READ_LOCAL_FEATURES,
            Self::ReadBufferSize => Self::READ_BUFFER_SIZE,
            Self::ReadBdAddr => Self::READ_BD_ADDR,
            Self::LeReadBufferSize => Self::LE_READ_BUFFER_SIZE,
            Self::LeReadLocalFeatures => Self::LE_READ_LOCAL_FEATURES,
            Self::Other(raw) => raw,
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> Self {
        op.raw()
    }
}

/// Event codes handled by the receive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventCode {
    CmdComplete,
    CmdStatus,
    Other(u8),
}

impl EventCode {
    pub const CMD_COMPLETE: u8 = 0x0e;
    pub const CMD_STATUS: u8 = 0x0f;

    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            Self::CMD_COMPLETE => Self::CmdComplete,
            Self::CMD_STATUS => Self::CmdStatus,
            other => Self::Other(other),
        }
    }
}

/// Command packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdHdr {
    pub opcode: u16,
    pub param_len: u8,
}

impl CmdHdr {
    pub const SIZE: usize = 3;

    pub fn write(&self, out: &mut [u8]) {
        out[..2].copy_from_slice(&self.opcode.to_le_bytes());
        out[2] = self.param_len;
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [lo, hi, param_len, ..] => Some(Self {
                opcode: u16::from_le_bytes([*lo, *hi]),
                param_len: *param_len,
            }),
            _ => None,
        }
    }
}

/// Event packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvtHdr {
    pub evt: u8,
    pub len: u8,
}

impl EvtHdr {
    pub const SIZE: usize = 2;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [evt, len, ..] => Some(Self {
                evt: *evt,
                len: *len,
            }),
            _ => None,
        }
    }
}

/// Command Complete event parameters preceding the return parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdCompleteHdr {
    pub ncmd: u8,
    pub opcode: u16,
}

impl CmdCompleteHdr {
    pub const SIZE: usize = 3;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [ncmd, lo, hi, ..] => Some(Self {
                ncmd: *ncmd,
                opcode: u16::from_le_bytes([*lo, *hi]),
            }),
            _ => None,
        }
    }
}

/// Command Status event parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdStatusHdr {
    pub status: u8,
    pub ncmd: u8,
    pub opcode: u16,
}

impl CmdStatusHdr {
    pub const SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [status, ncmd, lo, hi, ..] => Some(Self {
                status: *status,
                ncmd: *ncmd,
                opcode: u16::from_le_bytes([*lo, *hi]),
            }),
            _ => None,
        }
    }
}

/// ACL data packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AclHdr {
    /// Connection handle (12 bits).
    pub handle: u16,
    /// Packet boundary and broadcast flags (upper 4 bits of the handle field).
    pub flags: u8,
    /// Declared payload length.
    pub len: u16,
}

impl AclHdr {
    pub const SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [h_lo, h_hi, l_lo, l_hi, ..] => {
                let raw = u16::from_le_bytes([*h_lo, *h_hi]);
                Some(Self {
                    handle: raw & 0x0fff,
                    flags: (raw >> 12) as u8,
                    len: u16::from_le_bytes([*l_lo, *l_hi]),
                })
            }
            _ => None,
        }
    }
}

/// LMP feature bits (page 0), byte 4.
pub mod lmp {
    pub const FEATURES_BYTE: usize = 4;
    /// BR/EDR not supported.
    pub const NO_BREDR: u8 = 0x20;
    /// LE supported (controller).
    pub const LE: u8 = 0x40;
}

/// LE feature bits, byte 0.
pub mod le {
    pub const ENCRYPTION: u8 = 0x01;
}

/// Build the Set Event Mask parameter.
///
/// Enables disconnection complete, read remote version complete, command
/// complete/status, hardware error, number of completed packets, data buffer
/// overflow and LE meta events. Encryption change and key refresh complete
/// are added when the controller supports LE encryption.
pub fn event_mask(le_encryption: bool) -> [u8; 8] {
    let mut ev = [0u8; 8];
    ev[0] |= 0x10; // Disconnection Complete
    ev[1] |= 0x08; // Read Remote Version Information Complete
    ev[1] |= 0x20; // Command Complete
    ev[1] |= 0x40; // Command Status
    ev[1] |= 0x80; // Hardware Error
    ev[2] |= 0x04; // Number of Completed Packets
    ev[3] |= 0x02; // Data Buffer Overflow
    ev[7] |= 0x20; // LE Meta-Event

    if le_encryption {
        ev[0] |= 0x80; // Encryption Change
        ev[5] |= 0x80; // Encryption Key Refresh Complete
    }
    ev
}

/// Write LE Host Supported parameters: `(le, simultaneous_le_host)`.
pub const LE_HOST_SUPP: [u8; 2] = [0x01, 0x00];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes_map_both_ways() {
        for raw in [
            Opcode::RESET,
            Opcode::READ_BD_ADDR,
            Opcode::LE_READ_LOCAL_FEATURES,
            Opcode::WRITE_LE_HOST_SUPP,
            0xfc01,
        ] {
            assert_eq!(Opcode::from_raw(raw).raw(), raw);
        }
        assert_eq!(Opcode::from_raw(0x0c03), Opcode::Reset);
        assert_eq!(Opcode::from_raw(0xfc01), Opcode::Other(0xfc01));
    }

    #[test]
    fn bring_up_opcodes_match_the_wire() {
        assert_eq!(
            [
                Opcode::SET_EVENT_MASK,
                Opcode::RESET,
                Opcode::READ_LOCAL_VERSION_INFO,
                Opcode::READ_LOCAL_FEATURES,
                Opcode::READ_BD_ADDR,
                Opcode::LE_READ_BUFFER_SIZE,
                Opcode::LE_READ_LOCAL_FEATURES,
            ],
            [0x0c01, 0x0c03, 0x1001, 0x1003, 0x1009, 0x2002, 0x2003]
        );
    }

    #[test]
    fn cmd_hdr_is_little_endian() {
        let mut out = [0u8; 3];
        CmdHdr {
            opcode: Opcode::SET_EVENT_MASK,
            param_len: 8,
        }
        .write(&mut out);
        assert_eq!(out, [0x01, 0x0c, 0x08]);
        assert_eq!(CmdHdr::parse(&out).map(|h| h.opcode), Some(0x0c01));
    }

    #[test]
    fn acl_hdr_splits_handle_and_flags() {
        let hdr = AclHdr::parse(&[0x01, 0x20, 0x0a, 0x00]).unwrap();
        assert_eq!(hdr.handle, 0x001);
        assert_eq!(hdr.flags, 0x2);
        assert_eq!(hdr.len, 10);
    }

    #[test]
    fn short_headers_do_not_parse() {
        assert_eq!(EvtHdr::parse(&[0x0e]), None);
        assert_eq!(CmdCompleteHdr::parse(&[0x01, 0x03]), None);
        assert_eq!(CmdStatusHdr::parse(&[0x00, 0x01, 0x03]), None);
        assert_eq!(AclHdr::parse(&[0x01, 0x00, 0x0a]), None);
    }

    #[test]
    fn event_mask_matches_bring_up_bits() {
        assert_eq!(
            event_mask(false),
            [0x10, 0xe8, 0x04, 0x02, 0x00, 0x00, 0x00, 0x20]
        );
        assert_eq!(
            event_mask(true),
            [0x90, 0xe8, 0x04, 0x02, 0x00, 0x80, 0x00, 0x20]
        );
    }
}
