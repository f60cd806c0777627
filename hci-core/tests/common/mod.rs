//! Simulated controller shared by the integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::Mutex;

use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use futures_executor::block_on;
use hci_core::hci::{lmp, Opcode};
use hci_core::{BufKind, Buffer, DriverError, Host};

/// Status the controller answers to commands listed in `Profile::fail`.
pub const COMMAND_DISALLOWED: u8 = 0x0c;

/// Command Complete for NOP granting one credit.
pub const NOP_CREDIT: [u8; 5] = [0x0e, 0x03, 0x01, 0x00, 0x00];

#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub features: [u8; 8],
    pub le_features: [u8; 8],
    pub hci_version: u8,
    pub hci_revision: u16,
    pub manufacturer: u16,
    pub bdaddr: [u8; 6],
    pub le_mtu: u16,
    pub le_pkts: u8,
    pub acl_mtu: u16,
    pub acl_pkts: u16,
    /// Command answered with `COMMAND_DISALLOWED`.
    pub fail: Option<u16>,
    /// Accept commands but never answer.
    pub mute: bool,
    /// Command accepted but never answered.
    pub drop: Option<u16>,
    /// Command whose completion is preceded by an unsolicited NOP granting credit.
    pub nop_before: Option<u16>,
}

impl Profile {
    /// LE-only controller with dedicated LE buffers.
    pub fn le_only() -> Self {
        let mut features = [0u8; 8];
        features[lmp::FEATURES_BYTE] = lmp::LE | lmp::NO_BREDR;
        Self {
            features,
            le_features: [0; 8],
            hci_version: 9,
            hci_revision: 0x0102,
            manufacturer: 0x05f1,
            bdaddr: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
            le_mtu: 251,
            le_pkts: 8,
            acl_mtu: 0,
            acl_pkts: 0,
            fail: None,
            mute: false,
            drop: None,
            nop_before: None,
        }
    }

    /// Dual-mode controller that shares its ACL buffers between LE and BR/EDR.
    pub fn dual_mode_shared_buffers() -> Self {
        let mut features = [0u8; 8];
        features[lmp::FEATURES_BYTE] = lmp::LE;
        Self {
            features,
            le_mtu: 0,
            le_pkts: 0,
            acl_mtu: 1021,
            acl_pkts: 6,
            ..Self::le_only()
        }
    }

    /// BR/EDR controller without LE support.
    pub fn bredr_only() -> Self {
        Self {
            features: [0xff, 0xff, 0x8f, 0xfe, 0x9b, 0xff, 0x59, 0x83],
            ..Self::dual_mode_shared_buffers()
        }
    }
}

pub struct Controller {
    profile: Profile,
    log: Mutex<Vec<(u16, Vec<u8>)>>,
    wire: Channel<CriticalSectionRawMutex, Vec<u8>, 4>,
}

impl Controller {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            log: Mutex::new(Vec::new()),
            wire: Channel::new(),
        }
    }

    /// Driver send capability.
    pub fn transmit(&self, buf: &mut Buffer<'_>) {
        self.forward(buf.data());
    }

    /// Accept one command packet (header and parameters).
    pub fn forward(&self, cmd: &[u8]) {
        let opcode = u16::from_le_bytes([cmd[0], cmd[1]]);
        assert_eq!(cmd[2] as usize, cmd.len() - 3, "parameter length");
        self.log.lock().unwrap().push((opcode, cmd[3..].to_vec()));

        if !self.profile.mute {
            self.wire.try_send(cmd.to_vec()).expect("more than one command in flight");
        }
    }

    pub async fn next_command(&self) -> Vec<u8> {
        self.wire.receive().await
    }

    /// Opcodes received so far, in order.
    pub fn opcodes(&self) -> Vec<u16> {
        self.log.lock().unwrap().iter().map(|(op, _)| *op).collect()
    }

    /// Parameters of the last `opcode` command received.
    pub fn params(&self, opcode: u16) -> Option<Vec<u8>> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(op, _)| *op == opcode)
            .map(|(_, params)| params.clone())
    }

    /// Command Complete event (without transport framing) answering `cmd`.
    pub fn reply(&self, cmd: &[u8]) -> Vec<u8> {
        let p = &self.profile;
        let opcode = u16::from_le_bytes([cmd[0], cmd[1]]);

        let mut ret = Vec::new();
        if p.fail == Some(opcode) {
            ret.push(COMMAND_DISALLOWED);
        } else {
            match opcode {
                Opcode::RESET | Opcode::SET_EVENT_MASK | Opcode::WRITE_LE_HOST_SUPP => ret.push(0),
                Opcode::READ_LOCAL_FEATURES => {
                    ret.push(0);
                    ret.extend_from_slice(&p.features);
                }
                Opcode::READ_LOCAL_VERSION_INFO => {
                    ret.extend_from_slice(&[0, p.hci_version]);
                    ret.extend_from_slice(&p.hci_revision.to_le_bytes());
                    ret.push(p.hci_version);
                    ret.extend_from_slice(&p.manufacturer.to_le_bytes());
                    ret.extend_from_slice(&[0x00, 0x00]);
                }
                Opcode::READ_BD_ADDR => {
                    ret.push(0);
                    ret.extend_from_slice(&p.bdaddr);
                }
                Opcode::LE_READ_LOCAL_FEATURES => {
                    ret.push(0);
                    ret.extend_from_slice(&p.le_features);
                }
                Opcode::LE_READ_BUFFER_SIZE => {
                    ret.push(0);
                    ret.extend_from_slice(&p.le_mtu.to_le_bytes());
                    ret.push(p.le_pkts);
                }
                Opcode::READ_BUFFER_SIZE => {
                    ret.push(0);
                    ret.extend_from_slice(&p.acl_mtu.to_le_bytes());
                    ret.push(64);
                    ret.extend_from_slice(&p.acl_pkts.to_le_bytes());
                    ret.extend_from_slice(&[0x01, 0x00]);
                }
                // Unknown HCI Command
                _ => ret.push(0x01),
            }
        }

        let mut evt = vec![0x0e, (3 + ret.len()) as u8, 1];
        evt.extend_from_slice(&opcode.to_le_bytes());
        evt.extend_from_slice(&ret);
        evt
    }

    /// Answer every command by delivering its completion straight to `host`.
    pub async fn serve(&self, host: &Host<'_>) -> ! {
        loop {
            let cmd = self.next_command().await;
            let opcode = u16::from_le_bytes([cmd[0], cmd[1]]);

            if self.profile.nop_before == Some(opcode) {
                Self::deliver(host, &NOP_CREDIT).await;
            }
            if self.profile.drop == Some(opcode) {
                continue;
            }
            Self::deliver(host, &self.reply(&cmd)).await;
        }
    }

    async fn deliver(host: &Host<'_>, evt: &[u8]) {
        let mut buf = host.pool().alloc(BufKind::Evt, 0).await;
        buf.extend_from_slice(evt).unwrap();
        host.deliver(buf).await;
    }
}

pub fn open_ok() -> Result<(), DriverError> {
    Ok(())
}

/// Poll the host runner and the controller alongside `app` until `app` ends.
pub fn run<R>(host: &Host<'_>, ctrl: &Controller, app: impl Future<Output = R>) -> R {
    block_on(async {
        match select3(host.run(), ctrl.serve(host), app).await {
            Either3::Third(r) => r,
            Either3::First(never) | Either3::Second(never) => never,
        }
    })
}

pub const LE_BRING_UP: [u16; 7] = [
    Opcode::RESET,
    Opcode::READ_LOCAL_FEATURES,
    Opcode::READ_LOCAL_VERSION_INFO,
    Opcode::READ_BD_ADDR,
    Opcode::LE_READ_LOCAL_FEATURES,
    Opcode::LE_READ_BUFFER_SIZE,
    Opcode::SET_EVENT_MASK,
];
