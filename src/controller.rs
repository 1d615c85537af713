//! The per-port transfer engine
//!
//! A [`Controller`] owns one backend, and the state shared between the
//! dispatcher and the USB interrupt handler: the endpoint table, the bus
//! session, and the completion outbox. Dispatcher-side methods hold the
//! critical section only to update that state, or to arm descriptors.
//! Hardware wait loops run with interrupts enabled.

use heapless::Deque;
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use crate::{
    bus::{BusSession, BusState},
    chunk::{self, Chunk},
    critical::Shared,
    endpoint::{self, ControlState, EndpointTable},
    mailbox::Notification,
    transfer::{Completion, Connection, Refused, Transfer},
    Error, Speed, TransferBackend,
};

/// Completions that a controller can hold before the transport drains them
///
/// A transfer is only accepted when the outbox has room for its
/// completion, so posting never overflows.
pub const OUTBOX_DEPTH: usize = endpoint::RECORD_COUNT;

/// Largest max packet size of any endpoint type
const MAX_PACKET_SIZE: usize = 1024;

/// Largest USB device address
const MAX_ADDRESS: u8 = 127;

pub(crate) struct Outbox(Deque<Completion, OUTBOX_DEPTH>);

impl Outbox {
    pub(crate) fn post(
        &mut self,
        addr: EndpointAddress,
        transfer: Transfer,
        result: Result<usize, Error>,
    ) {
        trace!("EP{=usize} complete {}", endpoint::index(addr), result);
        if self.0.push_back(transfer.complete(addr, result)).is_err() {
            error!("Completion outbox overflow");
        }
    }
}

pub(crate) struct State {
    pub(crate) endpoints: EndpointTable,
    pub(crate) control: ControlState,
    pub(crate) session: Option<BusSession>,
    pub(crate) outbox: Outbox,
}

impl State {
    const fn new() -> Self {
        State {
            endpoints: EndpointTable::new(),
            control: ControlState::new(),
            session: None,
            outbox: Outbox(Deque::new()),
        }
    }

    /// Room for one more transfer's completion
    fn has_room(&self) -> bool {
        self.outbox.0.len() + self.endpoints.in_flight() < OUTBOX_DEPTH
    }

    fn session(&mut self) -> Result<&mut BusSession, Error> {
        self.session.as_mut().ok_or(Error::NotConfigured)
    }
}

/// Arm the next window of `transfer`
///
/// Runs inside the critical section. IN transfers arm up to the
/// backend's ring depth; OUT transfers arm one packet.
pub(crate) fn arm<B: TransferBackend>(
    backend: &B,
    addr: EndpointAddress,
    max_packet_size: usize,
    transfer: &mut Transfer,
) {
    let unit = backend.chunk_limit(addr, max_packet_size).max(1);
    let offset = transfer.transferred;

    match addr.direction() {
        UsbDirection::In => {
            let len = chunk::window(transfer.remaining(), unit, backend.ring_depth());
            debug_assert!(chunk::count(len, unit) <= backend.ring_depth().max(1));
            transfer.armed = len;
            for chunk in chunk::chain(offset, len, unit) {
                let data = &mut transfer.buffer[chunk.offset..chunk.offset + chunk.len];
                // Safety: the buffer stays in the endpoint record until the
                // window retires, or until the endpoint is aborted.
                unsafe { backend.arm_chunk(addr, &chunk, data) };
            }
        }
        UsbDirection::Out => {
            let capacity =
                chunk::out_capacity(transfer.remaining(), max_packet_size, backend.out_granule());
            let chunk = Chunk {
                offset,
                len: capacity,
                interrupt: true,
            };
            transfer.armed = capacity;
            // Safety: see above.
            unsafe { backend.arm_chunk(addr, &chunk, transfer.window_mut()) };
        }
    }

    backend.prime(addr);
}

/// A USB device controller
///
/// Wraps one [`TransferBackend`]. Use the methods from the dispatcher;
/// call [`on_interrupt`](Controller::on_interrupt) from the USB interrupt
/// handler.
pub struct Controller<B> {
    pub(crate) backend: B,
    pub(crate) state: Shared<State>,
}

impl<B: TransferBackend> Controller<B> {
    pub const fn new(backend: B) -> Self {
        Controller {
            backend,
            state: Shared::new(State::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Open the device for the class consumer, and attach to the bus
    ///
    /// Notifications go to `consumer`.
    pub fn open_device(&self, consumer: Connection, speed: Speed) -> Result<(), Error> {
        {
            let mut state = self.state.lock();
            if state.session.is_some() {
                return Err(Error::AlreadyConfigured);
            }
            state.session = Some(BusSession::new(consumer));
        }

        if let Err(err) = self.backend.attach(speed) {
            warn!("Attach failed: {}", err);
            self.backend.detach();
            self.state.lock().session = None;
            return Err(err);
        }

        debug!("Device open");
        Ok(())
    }

    /// Close every endpoint, and detach from the bus
    ///
    /// In-flight transfers complete with `IoCancelled`. Endpoints close
    /// while the controller still runs, since aborts need it.
    pub fn close_device(&self) -> Result<(), Error> {
        self.state
            .lock()
            .session
            .take()
            .ok_or(Error::NotConfigured)?;

        let mut result = Ok(());
        for idx in 0..endpoint::RECORD_COUNT {
            match self.close_endpoint(endpoint::address(idx)) {
                Ok(()) | Err(Error::NotConfigured) => {}
                Err(err) => result = Err(err),
            }
        }

        self.backend.detach();
        self.state.lock().control = ControlState::new();
        debug!("Device closed");
        result
    }

    pub fn open_endpoint(
        &self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet_size: usize,
    ) -> Result<(), Error> {
        if addr.index() >= self.backend.endpoint_count()
            || max_packet_size == 0
            || max_packet_size > MAX_PACKET_SIZE
        {
            return Err(Error::InvalidParams);
        }

        {
            let mut state = self.state.lock();
            state.session()?;
            state.endpoints.insert(addr, kind, max_packet_size)?;
        }

        if let Err(err) = self.backend.open_endpoint(addr, kind, max_packet_size) {
            let _ = self.state.lock().endpoints.remove(addr);
            return Err(err);
        }

        // A bus reset may have closed the record while the hardware was
        // being configured.
        if !self.state.lock().endpoints.is_open(addr) {
            self.backend.close_endpoint(addr);
            return Err(Error::IoCancelled);
        }

        debug!("EP{=usize} open, MPS {=usize}", endpoint::index(addr), max_packet_size);
        Ok(())
    }

    /// Close the endpoint
    ///
    /// An in-flight transfer completes with `IoCancelled` before this returns.
    pub fn close_endpoint(&self, addr: EndpointAddress) -> Result<(), Error> {
        let record = self.state.lock().endpoints.remove(addr)?;
        let aborted = self.backend.abort(addr);
        self.backend.close_endpoint(addr);
        self.cancel(addr, record.transfer);
        aborted
    }

    /// Abort the endpoint's pipeline
    ///
    /// An in-flight transfer completes with `IoCancelled` before this returns.
    pub fn flush(&self, addr: EndpointAddress) -> Result<(), Error> {
        let transfer = {
            let mut state = self.state.lock();
            let record = state.endpoints.get_mut(addr).ok_or(Error::NotConfigured)?;
            record.transfer.take()
        };
        let aborted = self.backend.abort(addr);
        self.cancel(addr, transfer);
        aborted
    }

    fn cancel(&self, addr: EndpointAddress, transfer: Option<Transfer>) {
        if let Some(transfer) = transfer {
            self.state
                .lock()
                .outbox
                .post(addr, transfer, Err(Error::IoCancelled));
        }
    }

    /// Stall, or clear the stall on, the endpoint
    ///
    /// Flushes the endpoint first.
    pub fn set_stall(&self, addr: EndpointAddress, stalled: bool) -> Result<(), Error> {
        self.flush(addr)?;
        self.backend.set_stalled(addr, stalled);
        Ok(())
    }

    pub fn is_stalled(&self, addr: EndpointAddress) -> Result<bool, Error> {
        if !self.state.lock().endpoints.is_open(addr) {
            return Err(Error::NotConfigured);
        }
        Ok(self.backend.is_stalled(addr))
    }

    /// Receive up to `len` bytes into `buffer` from an OUT endpoint
    ///
    /// The transfer finishes once `len` bytes arrive, or on a short packet.
    /// Collect the result with [`pop_completion`](Controller::pop_completion).
    pub fn read(
        &self,
        addr: EndpointAddress,
        connection: Connection,
        buffer: &'static mut [u8],
        len: usize,
    ) -> Result<(), Refused> {
        if addr.direction() != UsbDirection::Out || len > buffer.len() {
            return Err(Refused {
                error: Error::InvalidParams,
                buffer,
            });
        }
        self.start(addr, Transfer::new(connection, buffer, len))
    }

    /// Send all of `buffer` from an IN endpoint
    ///
    /// An empty buffer sends one zero-length packet.
    pub fn write(
        &self,
        addr: EndpointAddress,
        connection: Connection,
        buffer: &'static mut [u8],
    ) -> Result<(), Refused> {
        if addr.direction() != UsbDirection::In {
            return Err(Refused {
                error: Error::InvalidParams,
                buffer,
            });
        }
        let len = buffer.len();
        self.start(addr, Transfer::new(connection, buffer, len))
    }

    fn start(&self, addr: EndpointAddress, mut transfer: Transfer) -> Result<(), Refused> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let room = state.has_room();
        let Some(record) = state.endpoints.get_mut(addr) else {
            return Err(Refused {
                error: Error::NotConfigured,
                buffer: transfer.buffer,
            });
        };
        if record.transfer.is_some() || !room {
            return Err(Refused {
                error: Error::InProgress,
                buffer: transfer.buffer,
            });
        }

        if addr == endpoint::ep0_out() {
            if let Some(setup) = state.control.setup {
                if transfer.requested < setup.len() {
                    return Err(Refused {
                        error: Error::InvalidParams,
                        buffer: transfer.buffer,
                    });
                }
                state.control.setup = None;
                transfer.buffer[..setup.len()].copy_from_slice(&setup);
                state.outbox.post(addr, transfer, Ok(setup.len()));
                return Ok(());
            }
        }

        arm(&self.backend, addr, record.max_packet_size, &mut transfer);
        record.transfer = Some(transfer);
        Ok(())
    }

    /// The negotiated bus speed, if known
    pub fn speed(&self) -> Result<Option<Speed>, Error> {
        Ok(self.state.lock().session()?.speed())
    }

    pub fn bus_state(&self) -> Result<BusState, Error> {
        Ok(self.state.lock().session()?.state())
    }

    /// Request a new device address
    ///
    /// The address takes effect when the next EP0 IN transfer, the
    /// status stage of SET_ADDRESS, finishes.
    pub fn set_address(&self, address: u8) -> Result<(), Error> {
        if address > MAX_ADDRESS {
            return Err(Error::InvalidParams);
        }
        let mut state = self.state.lock();
        state.session()?;
        state.control.pending_address = Some(address);
        Ok(())
    }

    pub fn set_test_mode(&self, mode: u8) -> Result<(), Error> {
        self.state.lock().session()?;
        self.backend.set_test_mode(mode)
    }

    /// The consumer's sync request
    ///
    /// Returns a pending notification right away. Otherwise the request is
    /// parked, and the next notification comes out of
    /// [`take_notification`](Controller::take_notification).
    pub fn sync(&self) -> Result<Option<Notification>, Error> {
        self.state.lock().session()?.sync()
    }

    /// Collect a notification that answered a parked sync
    pub fn take_notification(&self) -> Option<(Connection, Notification)> {
        let mut state = self.state.lock();
        let session = state.session.as_mut()?;
        let notification = session.take_sent()?;
        Some((session.consumer(), notification))
    }

    pub fn pop_completion(&self) -> Option<Completion> {
        self.state.lock().outbox.0.pop_front()
    }
}
