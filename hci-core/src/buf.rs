//! Fixed-capacity HCI buffer pool.
//!
//! The pool is an arena of [`NUM_BUFS`] slots of [`BUF_MAX_DATA`] bytes. Checking
//! out a slot yields a [`Buffer`], the only handle to that slot. The slot goes
//! back to the pool when the `Buffer` is dropped, so a buffer is released
//! exactly once and cannot be touched afterwards.
//!
//! Each buffer tracks a data window inside its slot:
//!
//! ```text
//! |<- headroom ->|<---- len ---->|<- tailroom ->|
//! start          data                           start + capacity
//! ```
//!
//! `headroom + len + tailroom == capacity` holds after every operation.

use core::cell::UnsafeCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::config::{BUF_MAX_DATA, NUM_BUFS};
use crate::error::BufError;

/// Frame type carried by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufKind {
    /// Host to controller command.
    Cmd,
    /// Controller to host event.
    Evt,
    /// ACL data, either direction.
    Acl,
}

/// Pool of reusable HCI buffers.
pub struct BufPool {
    slots: [UnsafeCell<[u8; BUF_MAX_DATA]>; NUM_BUFS],
    free: Channel<CriticalSectionRawMutex, u8, NUM_BUFS>,
}

// SAFETY: a slot index is held by at most one `Buffer` at a time (it is only
// handed out by `free` and only returned by `Buffer::drop`), so every slot is
// accessed by a single owner.
unsafe impl Sync for BufPool {}

impl BufPool {
    /// Create a pool with every slot free.
    pub fn new() -> Self {
        let pool = Self {
            slots: [const { UnsafeCell::new([0; BUF_MAX_DATA]) }; NUM_BUFS],
            free: Channel::new(),
        };
        for slot in 0..NUM_BUFS {
            let _ = pool.free.try_send(slot as u8);
        }
        pool
    }

    /// Check out a buffer, waiting until one is free.
    ///
    /// The returned buffer is empty with `reserve` bytes of headroom.
    pub async fn alloc(&self, kind: BufKind, reserve: usize) -> Buffer<'_> {
        let slot = self.free.receive().await;
        Buffer::new(self, slot, kind, reserve)
    }

    /// Check out a buffer without waiting. Returns `None` if the pool is empty.
    pub fn try_alloc(&self, kind: BufKind, reserve: usize) -> Option<Buffer<'_>> {
        match self.free.try_receive() {
            Ok(slot) => Some(Buffer::new(self, slot, kind, reserve)),
            Err(_) => {
                debug!("[buf] pool exhausted");
                None
            }
        }
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        NUM_BUFS - self.available()
    }

    fn put(&self, slot: u8) {
        if self.free.try_send(slot).is_err() {
            error!("[buf] slot {} returned to a full pool", slot);
        }
    }
}

impl Default for BufPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A buffer checked out of a [`BufPool`].
pub struct Buffer<'p> {
    pool: &'p BufPool,
    slot: u8,
    head: usize,
    len: usize,
    kind: BufKind,
    opcode: u16,
    sync: Option<u16>,
}

impl<'p> Buffer<'p> {
    fn new(pool: &'p BufPool, slot: u8, kind: BufKind, reserve: usize) -> Self {
        // Reserve is bounded at driver registration.
        let head = reserve.min(BUF_MAX_DATA);
        trace!("[buf] slot {} reserve {}", slot, head);
        Self {
            pool,
            slot,
            head,
            len: 0,
            kind,
            opcode: 0,
            sync: None,
        }
    }

    fn storage(&self) -> &[u8; BUF_MAX_DATA] {
        // SAFETY: this buffer is the unique owner of `slot`.
        unsafe { &*self.pool.slots[self.slot as usize].get() }
    }

    fn storage_mut(&mut self) -> &mut [u8; BUF_MAX_DATA] {
        // SAFETY: this buffer is the unique owner of `slot`.
        unsafe { &mut *self.pool.slots[self.slot as usize].get() }
    }

    pub fn kind(&self) -> BufKind {
        self.kind
    }

    pub fn set_kind(&mut self, kind: BufKind) {
        self.kind = kind;
    }

    /// Opcode of the command this buffer carries. Zero for non-command buffers.
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub(crate) fn set_opcode(&mut self, opcode: u16) {
        self.opcode = opcode;
    }

    pub(crate) fn sync_token(&self) -> Option<u16> {
        self.sync
    }

    pub(crate) fn set_sync_token(&mut self, token: u16) {
        self.sync = Some(token);
    }

    pub const fn capacity(&self) -> usize {
        BUF_MAX_DATA
    }

    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn tailroom(&self) -> usize {
        BUF_MAX_DATA - self.head - self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.storage()[self.head..self.head + self.len]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let (head, len) = (self.head, self.len);
        &mut self.storage_mut()[head..head + len]
    }

    /// Extend the data window by `n` bytes at the tail and return the new region.
    pub fn add(&mut self, n: usize) -> Result<&mut [u8], BufError> {
        if n > self.tailroom() {
            return Err(BufError::NoTailroom);
        }
        let start = self.head + self.len;
        self.len += n;
        Ok(&mut self.storage_mut()[start..start + n])
    }

    /// Append `bytes` at the tail.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), BufError> {
        self.add(bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    pub fn add_u8(&mut self, val: u8) -> Result<(), BufError> {
        self.extend_from_slice(&[val])
    }

    pub fn add_le16(&mut self, val: u16) -> Result<(), BufError> {
        self.extend_from_slice(&val.to_le_bytes())
    }

    /// Extend the data window by `n` bytes at the head and return the new region.
    pub fn push(&mut self, n: usize) -> Result<&mut [u8], BufError> {
        if n > self.head {
            return Err(BufError::NoHeadroom);
        }
        self.head -= n;
        self.len += n;
        let head = self.head;
        Ok(&mut self.storage_mut()[head..head + n])
    }

    /// Consume `n` bytes from the head and return them.
    pub fn pull(&mut self, n: usize) -> Result<&[u8], BufError> {
        if n > self.len {
            return Err(BufError::Underflow);
        }
        let start = self.head;
        self.head += n;
        self.len -= n;
        Ok(&self.storage()[start..start + n])
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        trace!("[buf] slot {} released", self.slot);
        self.pool.put(self.slot);
    }
}

impl core::fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("slot", &self.slot)
            .field("kind", &self.kind)
            .field("opcode", &self.opcode)
            .field("headroom", &self.head)
            .field("len", &self.len)
            .finish()
    }
}
