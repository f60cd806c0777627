//! Controller bring-up.
//!
//! Commands whose results are only needed later are queued with
//! [`Host::send`]; the command context still issues them one at a time, in
//! order. A synchronous command acts as a barrier for everything queued
//! before it.

use crate::error::Error;
use crate::hci::{event_mask, Opcode, LE_HOST_SUPP};
use crate::host::Host;

impl<'a> Host<'a> {
    pub(crate) async fn hci_init(&self) -> Result<(), Error> {
        debug!("[hci] init");

        self.send(Opcode::RESET, None)?;
        self.send(Opcode::READ_LOCAL_FEATURES, None)?;
        self.send(Opcode::READ_LOCAL_VERSION_INFO, None)?;
        self.send_sync(Opcode::READ_BD_ADDR, None).await?;

        if !self.state().le_capable() {
            error!("[hci] controller is not LE capable");
            return Err(Error::NotSupported);
        }

        self.send(Opcode::LE_READ_LOCAL_FEATURES, None)?;
        self.send(Opcode::LE_READ_BUFFER_SIZE, None)?;

        // The event mask depends on the LE features queued above.
        self.wait_idle().await?;
        let mask = event_mask(self.state().le_encryption());
        let mut buf = self.cmd_create(Opcode::SET_EVENT_MASK, mask.len() as u8)?;
        buf.extend_from_slice(&mask)?;
        self.send_sync(Opcode::SET_EVENT_MASK, Some(buf)).await?;

        if self.state().bredr_capable() {
            if self.state().le_mtu == 0 {
                self.send(Opcode::READ_BUFFER_SIZE, None)?;
            }

            let mut buf = self.cmd_create(Opcode::WRITE_LE_HOST_SUPP, LE_HOST_SUPP.len() as u8)?;
            buf.extend_from_slice(&LE_HOST_SUPP)?;
            self.send_sync(Opcode::WRITE_LE_HOST_SUPP, Some(buf)).await?;
        }

        let state = self.state();
        info!(
            "[hci] HCI ver {} rev {}, manufacturer {}",
            state.hci_version, state.hci_revision, state.manufacturer
        );
        info!(
            "[hci] ACL buffers: pkts {} mtu {}",
            state.le_pkts, state.le_mtu
        );
        let a = state.bdaddr.0;
        info!(
            "[hci] BD_ADDR {:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        );

        Ok(())
    }
}
