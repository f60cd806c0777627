//! H4 (UART) framing on top of `bt-hci`.
//!
//! Every packet on the wire is preceded by a one-byte packet indicator.
//! [`H4Transport`] writes queued commands with bt-hci's [`WithIndicator`],
//! and [`H4Reader`] lets bt-hci deframe the inbound byte stream, copying each
//! event or ACL packet into a tagged pool buffer ready for
//! [`Host::deliver`](crate::Host::deliver).

use core::cell::RefCell;

use bt_hci::transport::WithIndicator;
use bt_hci::{ControllerToHostPacket, HostToControllerPacket, PacketKind, ReadHci, ReadHciError, WriteHci};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_io::Write;
use embedded_io_async::Read;

use crate::buf::{BufKind, BufPool, Buffer};
use crate::error::DriverError;

/// H4 packet indicators.
pub mod indicator {
    use bt_hci::PacketKind;

    pub const CMD: u8 = PacketKind::Cmd as u8;
    pub const ACL: u8 = PacketKind::AclData as u8;
    pub const EVT: u8 = PacketKind::Event as u8;
}

/// Indicator plus the largest event or ACL packet read from the wire.
const MAX_PACKET: usize = 1 + 4 + 255;

/// A queued command (header and parameters) handed to bt-hci for writing.
struct CmdPacket<'b>(&'b [u8]);

impl WriteHci for CmdPacket<'_> {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn write_hci<W: embedded_io::Write>(&self, mut writer: W) -> Result<(), W::Error> {
        writer.write_all(self.0)
    }

    async fn write_hci_async<W: embedded_io_async::Write>(&self, mut writer: W) -> Result<(), W::Error> {
        writer.write_all(self.0).await
    }
}

impl HostToControllerPacket for CmdPacket<'_> {
    const KIND: PacketKind = PacketKind::Cmd;
}

/// Outgoing half of an H4 link.
pub struct H4Transport<M: RawMutex, W> {
    tx: Mutex<M, RefCell<W>>,
}

impl<M: RawMutex, W: Write> H4Transport<M, W> {
    pub const fn new(tx: W) -> Self {
        Self {
            tx: Mutex::new(RefCell::new(tx)),
        }
    }

    /// Open capability: make sure the link accepts writes.
    pub fn open(&self) -> Result<(), DriverError> {
        self.tx.lock(|tx| {
            tx.borrow_mut()
                .flush()
                .map_err(|e| DriverError::Io(embedded_io::Error::kind(&e)))
        })
    }

    /// Send capability: write the command behind its packet indicator.
    pub fn send(&self, buf: &mut Buffer<'_>) {
        let data = buf.data();
        let end = data.len().min(64);
        trace!("[h4] tx cmd {} bytes: {:?}", data.len(), &data[..end]);

        let pkt = CmdPacket(data);
        let res = self.tx.lock(|tx| {
            let mut tx = tx.borrow_mut();
            WithIndicator::new(&pkt).write_hci(&mut *tx)?;
            tx.flush()
        });
        if let Err(e) = res {
            error!("[h4] tx failed: {:?}", embedded_io::Error::kind(&e));
        }
    }

    /// Give back the underlying writer.
    pub fn into_inner(self) -> W {
        self.tx.into_inner().into_inner()
    }
}

/// Error reading an H4 packet.
#[derive(Debug)]
pub enum H4Error<E: embedded_io::Error> {
    /// bt-hci could not deframe a packet from the stream.
    Read(ReadHciError<E>),
    /// Synchronous or isochronous data. Its bytes were consumed.
    Unsupported(u8),
    /// Packet larger than a pool buffer. Its bytes were consumed.
    TooLong(usize),
}

#[cfg(feature = "defmt")]
impl<E: embedded_io::Error> defmt::Format for H4Error<E> {
    fn format(&self, f: defmt::Formatter) {
        match self {
            H4Error::Read(e) => defmt::write!(f, "H4 read error: {:?}", defmt::Debug2Format(e)),
            H4Error::Unsupported(ind) => defmt::write!(f, "unsupported H4 packet 0x{:02X}", ind),
            H4Error::TooLong(len) => defmt::write!(f, "H4 packet of {} bytes does not fit a buffer", len),
        }
    }
}

impl<E: embedded_io::Error> core::fmt::Display for H4Error<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            H4Error::Read(e) => write!(f, "H4 read error: {:?}", e),
            H4Error::Unsupported(ind) => write!(f, "unsupported H4 packet 0x{:02X}", ind),
            H4Error::TooLong(len) => write!(f, "H4 packet of {} bytes does not fit a buffer", len),
        }
    }
}

impl<E: embedded_io::Error> core::error::Error for H4Error<E> {}

impl<E: embedded_io::Error> embedded_io::Error for H4Error<E> {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::Read(e) => e.kind(),
            Self::Unsupported(_) | Self::TooLong(_) => embedded_io::ErrorKind::InvalidData,
        }
    }
}

/// Records the bytes bt-hci pulls from the stream while deframing.
struct Tap<'r, R> {
    inner: &'r mut R,
    raw: &'r mut [u8; MAX_PACKET],
    pos: usize,
}

impl<R: Read> embedded_io::ErrorType for Tap<'_, R> {
    type Error = R::Error;
}

impl<R: Read> Read for Tap<'_, R> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = self.inner.read(buf).await?;
        let copy_end = (self.pos + n).min(MAX_PACKET);
        if self.pos < copy_end {
            let copy_n = copy_end - self.pos;
            self.raw[self.pos..copy_end].copy_from_slice(&buf[..copy_n]);
        }
        self.pos += n;
        Ok(n)
    }
}

/// Incoming half of an H4 link.
pub struct H4Reader<R> {
    rx: R,
    scratch: [u8; MAX_PACKET],
    raw: [u8; MAX_PACKET],
}

impl<R: Read> H4Reader<R> {
    pub const fn new(rx: R) -> Self {
        Self {
            rx,
            scratch: [0; MAX_PACKET],
            raw: [0; MAX_PACKET],
        }
    }

    /// Read one event or ACL packet into a buffer from `pool`.
    ///
    /// Waits for a free buffer once the whole packet is off the wire. The
    /// returned buffer holds the packet header and payload, without the
    /// indicator.
    pub async fn read<'p>(&mut self, pool: &'p BufPool) -> Result<Buffer<'p>, H4Error<R::Error>> {
        let mut tap = Tap {
            inner: &mut self.rx,
            raw: &mut self.raw,
            pos: 0,
        };

        let kind = match ControllerToHostPacket::read_hci_async(&mut tap, &mut self.scratch).await {
            Ok(ControllerToHostPacket::Event(_)) => BufKind::Evt,
            Ok(ControllerToHostPacket::Acl(_)) => BufKind::Acl,
            Ok(_) => {
                let ind = tap.raw[0];
                warn!("[h4] dropping packet with indicator 0x{:02X}", ind);
                return Err(H4Error::Unsupported(ind));
            }
            Err(e) => {
                warn!("[h4] rx failed after {} bytes", tap.pos);
                return Err(H4Error::Read(e));
            }
        };

        // Packet without its indicator.
        let len = tap.pos - 1;
        let mut buf = pool.alloc(kind, 0).await;
        if tap.pos > MAX_PACKET || buf.tailroom() < len {
            error!("[h4] {} byte packet does not fit a buffer", len);
            return Err(H4Error::TooLong(len));
        }

        // Room was checked above.
        let _ = buf.extend_from_slice(&tap.raw[1..tap.pos]);
        trace!("[h4] rx {:?} {} bytes", kind, buf.len());
        Ok(buf)
    }

    pub fn into_inner(self) -> R {
        self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use futures_executor::block_on;

    #[derive(Default)]
    struct Wire {
        bytes: [u8; 32],
        len: usize,
    }

    impl embedded_io::ErrorType for Wire {
        type Error = embedded_io::ErrorKind;
    }

    impl embedded_io::Write for Wire {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            let n = buf.len().min(self.bytes.len() - self.len);
            self.bytes[self.len..self.len + n].copy_from_slice(&buf[..n]);
            self.len += n;
            Ok(n)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn indicators_follow_packet_kinds() {
        assert_eq!(
            [indicator::CMD, indicator::ACL, indicator::EVT],
            [0x01, 0x02, 0x04]
        );
    }

    #[test]
    fn send_prefixes_command_indicator() {
        let pool = BufPool::new();
        let h4: H4Transport<NoopRawMutex, Wire> = H4Transport::new(Wire::default());

        let mut buf = pool.try_alloc(BufKind::Cmd, 0).unwrap();
        buf.extend_from_slice(&[0x03, 0x0c, 0x00]).unwrap();
        assert!(h4.open().is_ok());
        h4.send(&mut buf);

        assert_eq!(buf.data(), &[0x03, 0x0c, 0x00]);
        let wire = h4.into_inner();
        assert_eq!(&wire.bytes[..wire.len], &[0x01, 0x03, 0x0c, 0x00]);
    }

    #[test]
    fn reads_event_and_acl_packets() {
        let pool = BufPool::new();
        let stream: &[u8] = &[
            0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00, // Command Complete (Reset)
            0x02, 0x01, 0x20, 0x02, 0x00, 0xaa, 0xbb, // ACL, handle 1, 2 bytes
        ];
        let mut rx = H4Reader::new(stream);

        let evt = block_on(rx.read(&pool)).unwrap();
        assert_eq!(evt.kind(), BufKind::Evt);
        assert_eq!(evt.data(), &[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);

        let acl = block_on(rx.read(&pool)).unwrap();
        assert_eq!(acl.kind(), BufKind::Acl);
        assert_eq!(acl.data(), &[0x01, 0x20, 0x02, 0x00, 0xaa, 0xbb]);
    }

    #[test]
    fn rejects_bad_indicator_and_truncation() {
        let pool = BufPool::new();

        let mut rx = H4Reader::new(&[0x07u8, 0x00][..]);
        assert!(matches!(block_on(rx.read(&pool)), Err(H4Error::Read(_))));

        let mut rx = H4Reader::new(&[0x04u8, 0x0e, 0x04, 0x01][..]);
        assert!(matches!(block_on(rx.read(&pool)), Err(H4Error::Read(_))));
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn oversized_packet_is_consumed() {
        let pool = BufPool::new();
        let mut stream = [0u8; 3 + 255 + 7];
        stream[..6].copy_from_slice(&[indicator::EVT, 0x0e, 0xff, 0x01, 0x03, 0x0c]);
        stream[258..].copy_from_slice(&[0x04, 0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
        let mut rx = H4Reader::new(&stream[..]);

        assert!(matches!(block_on(rx.read(&pool)), Err(H4Error::TooLong(257))));
        assert_eq!(pool.outstanding(), 0);

        let evt = block_on(rx.read(&pool)).unwrap();
        assert_eq!(evt.data(), &[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]);
    }
}
