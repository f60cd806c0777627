//! HCI host context: driver registration, command and receive channels.
//!
//! A [`Host`] is the single owner of the controller state for one running
//! stack. It drives two worker contexts, both polled from [`Host::run`]:
//!
//! - the command context takes queued commands one at a time, waits for the
//!   controller's command credit, and hands each to the driver;
//! - the receive context takes inbound buffers delivered by the driver,
//!   decodes events and retires the in-flight command.
//!
//! At most one command is outstanding: sending consumes the single credit,
//! and only a Command Complete or Command Status event restores it.
//!
//! Only one initialization sequence may run at a time. [`Host::start`] and
//! [`Host::reset`] must not be called concurrently.

use core::cell::{Cell, RefCell};

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

use crate::buf::{BufKind, BufPool, Buffer};
use crate::config::{Config, BUF_MAX_DATA, NUM_BUFS};
use crate::driver::{AclHandler, Driver};
use crate::error::Error;
use crate::event::{Completion, Status};
use crate::hci::{AclHdr, CmdCompleteHdr, CmdHdr, CmdStatusHdr, EventCode, EvtHdr, Opcode};
use crate::state::DevState;

type RawMutex = CriticalSectionRawMutex;

/// Resolution of a synchronous command.
struct SyncDone {
    token: u16,
    result: Result<Status, Error>,
}

/// HCI host core.
///
/// # Example
///
/// ```no_run
/// use hci_core::{BufPool, Config, Driver, Host};
///
/// async fn bring_up(pool: &BufPool, open: &(dyn Fn() -> Result<(), hci_core::DriverError> + Sync),
///                   send: &(dyn Fn(&mut hci_core::Buffer<'_>) + Sync)) {
///     let host = Host::new(pool, Config::default());
///     host.register(Driver::new("uart").with_open(open).with_send(send)).unwrap();
///     // `host.run()` must be polled concurrently, e.g. from a spawned task.
///     let _ = embassy_futures::select::select(host.run(), host.start()).await;
/// }
/// ```
pub struct Host<'a> {
    pool: &'a BufPool,
    config: Config,

    driver: BlockingMutex<RawMutex, Cell<Option<Driver<'a>>>>,
    acl: BlockingMutex<RawMutex, Cell<Option<&'a dyn AclHandler>>>,
    state: BlockingMutex<RawMutex, RefCell<DevState>>,
    started: BlockingMutex<RawMutex, Cell<bool>>,
    run_signal: Signal<RawMutex, Driver<'a>>,

    // Command channel
    ncmd_signal: Signal<RawMutex, ()>,
    cmd_queue: Channel<RawMutex, Buffer<'a>, NUM_BUFS>,
    sent_cmd: BlockingMutex<RawMutex, RefCell<Option<Buffer<'a>>>>,
    idle: Signal<RawMutex, ()>,

    // Synchronous commands
    sync_lock: Mutex<RawMutex, ()>,
    sync_done: Signal<RawMutex, SyncDone>,
    sync_token: BlockingMutex<RawMutex, Cell<u16>>,

    // Receive channel
    rx_queue: Channel<RawMutex, Buffer<'a>, NUM_BUFS>,
}

impl<'a> Host<'a> {
    pub const fn new(pool: &'a BufPool, config: Config) -> Self {
        Self {
            pool,
            config,
            driver: BlockingMutex::new(Cell::new(None)),
            acl: BlockingMutex::new(Cell::new(None)),
            state: BlockingMutex::new(RefCell::new(DevState::new())),
            started: BlockingMutex::new(Cell::new(false)),
            run_signal: Signal::new(),
            ncmd_signal: Signal::new(),
            cmd_queue: Channel::new(),
            sent_cmd: BlockingMutex::new(RefCell::new(None)),
            idle: Signal::new(),
            sync_lock: Mutex::new(()),
            sync_done: Signal::new(),
            sync_token: BlockingMutex::new(Cell::new(0)),
            rx_queue: Channel::new(),
        }
    }

    /// Buffer pool shared with the driver for inbound packets.
    pub fn pool(&self) -> &'a BufPool {
        self.pool
    }

    //=========================================================================
    // Driver registration
    //=========================================================================

    /// Register the transport driver.
    ///
    /// Fails if a driver is already registered, if the driver lacks the open
    /// or send capability, or if its head reserve leaves no room for a command.
    pub fn register(&self, drv: Driver<'a>) -> Result<(), Error> {
        self.driver.lock(|slot| {
            if slot.get().is_some() {
                return Err(Error::AlreadyRegistered);
            }
            if drv.open.is_none() || drv.send.is_none() {
                return Err(Error::InvalidDriver);
            }
            if drv.head_reserve + CmdHdr::SIZE > BUF_MAX_DATA {
                return Err(Error::InvalidDriver);
            }
            slot.set(Some(drv));
            Ok(())
        })?;

        info!("[hci] driver {} registered", drv.name);
        Ok(())
    }

    /// Remove the registered driver. No-op if `drv` is not the one registered.
    pub fn unregister(&self, drv: &Driver<'a>) {
        self.driver.lock(|slot| match slot.get() {
            Some(current) if current.name == drv.name => {
                slot.set(None);
                info!("[hci] driver {} unregistered", drv.name);
            }
            Some(current) => {
                warn!(
                    "[hci] unregister of {} ignored, {} is registered",
                    drv.name, current.name
                );
            }
            None => {}
        });
    }

    fn driver(&self) -> Option<Driver<'a>> {
        self.driver.lock(|slot| slot.get())
    }

    /// Install the consumer of inbound ACL payloads.
    pub fn set_acl_handler(&self, handler: &'a dyn AclHandler) {
        self.acl.lock(|slot| slot.set(Some(handler)));
    }

    //=========================================================================
    // Lifecycle
    //=========================================================================

    /// Start the worker contexts, open the driver and bring the controller up.
    ///
    /// [`Host::run`] must be polled concurrently. If no driver is registered
    /// this fails with [`Error::NoDevice`] and the worker contexts stay parked.
    pub async fn start(&self) -> Result<(), Error> {
        let drv = self.driver().ok_or(Error::NoDevice)?;
        if self.started.lock(|started| started.replace(true)) {
            return Err(Error::AlreadyStarted);
        }

        // Grant the credit for the first command.
        self.update_state(|s| s.ncmd = 1);
        self.ncmd_signal.signal(());
        self.run_signal.signal(drv);

        if let Some(open) = drv.open {
            open()?;
        }

        self.hci_init().await
    }

    /// Re-run the initialization sequence from a cleared controller state.
    pub async fn reset(&self) -> Result<(), Error> {
        if !self.is_running() {
            return Err(Error::NotStarted);
        }
        self.update_state(DevState::clear_identity);
        self.hci_init().await
    }

    /// Whether [`Host::start`] got past its precondition checks.
    pub fn is_running(&self) -> bool {
        self.started.lock(|started| started.get())
    }

    /// Run both worker contexts. Parks until [`Host::start`] releases it.
    pub async fn run(&self) -> ! {
        let drv = self.run_signal.wait().await;
        debug!("[hci] worker contexts running");

        match select(self.cmd_loop(drv), self.rx_loop()).await {
            Either::First(never) | Either::Second(never) => never,
        }
    }

    //=========================================================================
    // Controller state
    //=========================================================================

    /// Snapshot of the controller state.
    pub fn state(&self) -> DevState {
        self.state.lock(|s| *s.borrow())
    }

    /// Current command credit (0 or 1).
    pub fn credits(&self) -> u8 {
        self.state.lock(|s| s.borrow().ncmd)
    }

    /// Opcode of the command awaiting acknowledgement, if any.
    pub fn in_flight(&self) -> Option<u16> {
        self.sent_cmd
            .lock(|sent| sent.borrow().as_ref().map(|buf| buf.opcode()))
    }

    pub(crate) fn update_state<R>(&self, f: impl FnOnce(&mut DevState) -> R) -> R {
        self.state.lock(|s| f(&mut s.borrow_mut()))
    }

    //=========================================================================
    // Command channel
    //=========================================================================

    /// Allocate a command buffer with the header for `opcode` already written.
    ///
    /// The caller appends `param_len` bytes of parameters.
    pub fn cmd_create(&self, opcode: u16, param_len: u8) -> Result<Buffer<'a>, Error> {
        let drv = self.driver().ok_or(Error::NoDevice)?;
        debug!("[hci] opcode 0x{:04X} param_len {}", opcode, param_len);

        let Some(mut buf) = self.pool.try_alloc(BufKind::Cmd, drv.head_reserve) else {
            error!("[hci] cannot get free buffer for opcode 0x{:04X}", opcode);
            return Err(Error::NoBufs);
        };
        buf.set_opcode(opcode);
        CmdHdr { opcode, param_len }.write(buf.add(CmdHdr::SIZE)?);
        Ok(buf)
    }

    /// Queue a command without waiting for its completion.
    ///
    /// Without `buf`, a parameterless command for `opcode` is created.
    pub fn send(&self, opcode: u16, buf: Option<Buffer<'a>>) -> Result<(), Error> {
        let buf = match buf {
            Some(buf) => buf,
            None => self.cmd_create(opcode, 0)?,
        };
        self.enqueue(buf)
    }

    /// Queue a command and wait until the controller acknowledges it.
    ///
    /// Returns the status reported by the Command Complete or Command Status
    /// event. Waits at most the configured command timeout, if any.
    pub async fn send_sync(&self, opcode: u16, buf: Option<Buffer<'a>>) -> Result<Status, Error> {
        self.send_sync_with(opcode, buf, self.config.cmd_timeout)
            .await
    }

    /// Like [`Host::send_sync`], waiting at most `timeout`.
    ///
    /// On timeout the command stays queued or in flight; its late completion
    /// is discarded.
    pub async fn send_sync_timeout(
        &self,
        opcode: u16,
        buf: Option<Buffer<'a>>,
        timeout: Duration,
    ) -> Result<Status, Error> {
        self.send_sync_with(opcode, buf, Some(timeout)).await
    }

    async fn send_sync_with(
        &self,
        opcode: u16,
        buf: Option<Buffer<'a>>,
        timeout: Option<Duration>,
    ) -> Result<Status, Error> {
        let _guard = self.sync_lock.lock().await;

        let mut buf = match buf {
            Some(buf) => buf,
            None => self.cmd_create(opcode, 0)?,
        };
        let token = self.sync_token.lock(|t| {
            let next = t.get().wrapping_add(1);
            t.set(next);
            next
        });
        buf.set_sync_token(token);
        self.sync_done.reset();
        self.enqueue(buf)?;

        let wait = async {
            loop {
                let done = self.sync_done.wait().await;
                if done.token == token {
                    return done.result;
                }
                debug!("[hci] discarding stale completion {}", done.token);
            }
        };

        match timeout {
            Some(timeout) => with_timeout(timeout, wait).await.map_err(|_| {
                warn!("[hci] opcode 0x{:04X} timed out", opcode);
                Error::Timeout
            })?,
            None => wait.await,
        }
    }

    fn enqueue(&self, buf: Buffer<'a>) -> Result<(), Error> {
        debug!("[hci] queue opcode 0x{:04X} len {}", buf.opcode(), buf.len());
        self.cmd_queue.try_send(buf).map_err(|_| Error::NoBufs)
    }

    /// Wait until every queued command has been acknowledged.
    ///
    /// Bounded by the configured command timeout, if any.
    pub(crate) async fn wait_idle(&self) -> Result<(), Error> {
        let idle = async {
            while !self.cmd_queue.is_empty() || self.in_flight().is_some() {
                self.idle.wait().await;
            }
        };

        match self.config.cmd_timeout {
            Some(timeout) => with_timeout(timeout, idle).await.map_err(|_| {
                warn!(
                    "[hci] queued commands not acknowledged, opcode {:?} in flight",
                    self.in_flight()
                );
                Error::Timeout
            }),
            None => {
                idle.await;
                Ok(())
            }
        }
    }

    async fn cmd_loop(&self, drv: Driver<'a>) -> ! {
        loop {
            // Wait until ncmd > 0 and the previous command is retired
            while self.credits() == 0 || self.in_flight().is_some() {
                self.ncmd_signal.wait().await;
            }

            let mut buf = self.cmd_queue.receive().await;
            self.update_state(|s| s.ncmd = 0);

            debug!("[hci] sending opcode 0x{:04X} to driver", buf.opcode());
            if let Some(send) = drv.send {
                send(&mut buf);
            }

            self.sent_cmd.lock(|sent| *sent.borrow_mut() = Some(buf));
        }
    }

    //=========================================================================
    // Receive channel
    //=========================================================================

    /// Hand an inbound packet to the receive context, waiting for queue space.
    pub async fn deliver(&self, buf: Buffer<'a>) {
        trace!("[hci] deliver {:?} len {}", buf.kind(), buf.len());
        self.rx_queue.send(buf).await
    }

    /// Hand an inbound packet to the receive context without waiting.
    ///
    /// Gives the buffer back if the queue is full.
    pub fn try_deliver(&self, buf: Buffer<'a>) -> Result<(), Buffer<'a>> {
        self.rx_queue.try_send(buf).map_err(|e| match e {
            TrySendError::Full(buf) => buf,
        })
    }

    async fn rx_loop(&self) -> ! {
        loop {
            let buf = self.rx_queue.receive().await;
            self.process(buf);
        }
    }

    pub(crate) fn process(&self, buf: Buffer<'a>) {
        trace!("[hci] rx {:?} len {}", buf.kind(), buf.len());

        match buf.kind() {
            BufKind::Acl => self.hci_acl(buf),
            BufKind::Evt => self.hci_event(buf),
            BufKind::Cmd => error!("[hci] command buffer on receive path dropped"),
        }
    }

    fn hci_acl(&self, mut buf: Buffer<'a>) {
        let hdr = buf.pull(AclHdr::SIZE).ok().and_then(AclHdr::parse);
        let Some(hdr) = hdr else {
            error!("[hci] ACL packet too short ({} bytes)", buf.len());
            return;
        };

        debug!(
            "[hci] ACL handle {} len {} flags {}",
            hdr.handle, hdr.len, hdr.flags
        );

        if buf.len() != hdr.len as usize {
            error!(
                "[hci] ACL data length mismatch ({} != {})",
                buf.len(),
                hdr.len
            );
            return;
        }

        match self.acl.lock(|slot| slot.get()) {
            Some(handler) => handler.recv(hdr, buf),
            None => trace!("[hci] no ACL consumer, dropping {} bytes", buf.len()),
        }
    }

    fn hci_event(&self, mut buf: Buffer<'a>) {
        let hdr = buf.pull(EvtHdr::SIZE).ok().and_then(EvtHdr::parse);
        let Some(hdr) = hdr else {
            error!("[hci] event packet too short");
            return;
        };

        debug!("[hci] event 0x{:02X} len {}", hdr.evt, hdr.len);

        if buf.len() != hdr.len as usize {
            warn!(
                "[hci] event 0x{:02X} length mismatch ({} != {})",
                hdr.evt,
                buf.len(),
                hdr.len
            );
        }

        match EventCode::from_raw(hdr.evt) {
            EventCode::CmdComplete => self.cmd_complete(&mut buf),
            EventCode::CmdStatus => self.cmd_status(&mut buf),
            EventCode::Other(evt) => error!("[hci] unknown event 0x{:02X}", evt),
        }
    }

    fn cmd_complete(&self, buf: &mut Buffer<'a>) {
        let evt = buf
            .pull(CmdCompleteHdr::SIZE)
            .ok()
            .and_then(CmdCompleteHdr::parse);
        let Some(evt) = evt else {
            error!("[hci] command complete event too short");
            return;
        };

        debug!("[hci] command complete opcode 0x{:04X}", evt.opcode);
        self.complete(Completion::complete(evt.opcode, buf.data()), evt.ncmd);
    }

    fn cmd_status(&self, buf: &mut Buffer<'a>) {
        let evt = buf
            .pull(CmdStatusHdr::SIZE)
            .ok()
            .and_then(CmdStatusHdr::parse);
        let Some(evt) = evt else {
            error!("[hci] command status event too short");
            return;
        };

        debug!("[hci] command status opcode 0x{:04X}", evt.opcode);
        self.complete(Completion::status(evt.opcode, evt.status), evt.ncmd);
    }

    fn complete(&self, cc: Completion, ncmd: u8) {
        if !cc.status.is_success() {
            warn!(
                "[hci] opcode 0x{:04X} failed with status 0x{:02X}",
                cc.opcode, cc.status.0
            );
        }

        self.update_state(|s| cc.apply(s));

        // NOP only grants credit.
        if cc.opcode != Opcode::NOP {
            self.cmd_done(cc.opcode, cc.status);
        }

        self.restore_credit(ncmd);
    }

    /// Retire the in-flight command.
    ///
    /// A completion for another opcode still retires it so a synchronous
    /// waiter cannot hang, but the waiter gets [`Error::UnexpectedOpcode`].
    fn cmd_done(&self, opcode: u16, status: Status) {
        let sent = self.sent_cmd.lock(|sent| sent.borrow_mut().take());
        let Some(sent) = sent else {
            warn!("[hci] completion of opcode 0x{:04X} with nothing in flight", opcode);
            return;
        };

        let result = if sent.opcode() == opcode {
            Ok(status)
        } else {
            error!(
                "[hci] unexpected completion of opcode 0x{:04X} (sent 0x{:04X})",
                opcode,
                sent.opcode()
            );
            Err(Error::UnexpectedOpcode {
                expected: sent.opcode(),
                got: opcode,
            })
        };

        // If the command was synchronous wake up its sender
        if let Some(token) = sent.sync_token() {
            self.sync_done.signal(SyncDone { token, result });
        }

        drop(sent);
        self.idle.signal(());
    }

    /// Re-open the command gate.
    ///
    /// Credit granted by a NOP while a command is in flight is held until
    /// that command completes.
    fn restore_credit(&self, ncmd: u8) {
        if ncmd > 0 {
            if let Some(opcode) = self.in_flight() {
                debug!("[hci] credit held, opcode 0x{:04X} in flight", opcode);
                return;
            }
        }

        let granted = self.update_state(|s| {
            if ncmd > 0 && s.ncmd == 0 {
                s.ncmd = 1;
                true
            } else {
                false
            }
        });

        // Allow next command to be sent
        if granted {
            self.ncmd_signal.signal(());
        }
    }
}
