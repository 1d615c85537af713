//! The USB interrupt handler
//!
//! Completions are handled before bus events, so a transfer that
//! finished just before a reset still reports its bytes.

use usb_device::{endpoint::EndpointAddress, UsbDirection};

use crate::{
    backend::Faults,
    controller::{arm, Controller, State},
    endpoint::{self, ControlState},
    transfer::Progress,
    BusEvents, Error, TransferBackend,
};

impl<B: TransferBackend> Controller<B> {
    /// Service the USB interrupt
    ///
    /// Call this from the controller's interrupt handler. It may also be
    /// polled, if interrupts are disabled.
    pub fn on_interrupt(&self) {
        let irq = self.backend.poll();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        log_faults(irq.faults);

        let mut complete = irq.complete;
        while complete != 0 {
            let idx = complete.trailing_zeros() as usize;
            complete &= complete - 1;

            let addr = endpoint::address(idx);
            self.backend.clear_complete(addr);
            self.complete(state, addr);
        }

        if irq.events.contains(BusEvents::SETUP) {
            self.setup(state);
        }
        if irq.events.contains(BusEvents::RESET) {
            self.reset(state);
        }
        if let Some(session) = state.session.as_mut() {
            if irq.events.contains(BusEvents::SUSPEND) {
                debug!("Suspend");
                session.on_suspend();
            }
            if irq.events.contains(BusEvents::PORT_CHANGE) {
                let speed = self.backend.speed();
                debug!("Port change, speed {}", speed);
                session.on_port_change(speed);
            }
        }
    }

    fn complete(&self, state: &mut State, addr: EndpointAddress) {
        let Some(record) = state.endpoints.get_mut(addr) else {
            trace!("EP{=usize} completion while closed", endpoint::index(addr));
            return;
        };
        let max_packet_size = record.max_packet_size;
        let Some(transfer) = record.transfer.as_mut() else {
            trace!("EP{=usize} spurious completion", endpoint::index(addr));
            return;
        };

        let retired = self.backend.retire(addr, transfer.window_mut());
        log_faults(retired.faults);

        let progress = match addr.direction() {
            UsbDirection::Out => transfer.out_retired(retired.remaining, max_packet_size),
            UsbDirection::In => transfer.in_retired(),
        };
        if Progress::Continue == progress {
            arm(&self.backend, addr, max_packet_size, transfer);
            return;
        }

        let Some(transfer) = record.transfer.take() else {
            return;
        };
        // The status stage of SET_ADDRESS just finished.
        if addr == endpoint::ep0_in() {
            if let Some(address) = state.control.pending_address.take() {
                debug!("Address {=u8}", address);
                self.backend.set_address(address);
            }
        }
        let transferred = transfer.transferred;
        state.outbox.post(addr, transfer, Ok(transferred));
    }

    /// A SETUP packet ends whatever control transfer was in progress
    fn setup(&self, state: &mut State) {
        let setup = match self.backend.read_setup() {
            Ok(setup) => setup,
            Err(err) => {
                warn!("Failed to read SETUP: {}", err);
                return;
            }
        };

        let ep0_in = endpoint::ep0_in();
        if let Some(transfer) = state
            .endpoints
            .get_mut(ep0_in)
            .and_then(|record| record.transfer.take())
        {
            let _ = self.backend.abort(ep0_in);
            state.outbox.post(ep0_in, transfer, Err(Error::IoCancelled));
        }

        let ep0_out = endpoint::ep0_out();
        match state
            .endpoints
            .get_mut(ep0_out)
            .and_then(|record| record.transfer.take())
        {
            Some(mut transfer) if transfer.requested >= setup.len() => {
                let _ = self.backend.abort(ep0_out);
                transfer.buffer[..setup.len()].copy_from_slice(&setup);
                state.outbox.post(ep0_out, transfer, Ok(setup.len()));
            }
            // Too small for the packet; the next read collects it.
            Some(transfer) => {
                let _ = self.backend.abort(ep0_out);
                state.outbox.post(ep0_out, transfer, Err(Error::IoCancelled));
                state.control.setup = Some(setup);
            }
            None => state.control.setup = Some(setup),
        }
    }

    fn reset(&self, state: &mut State) {
        debug!("Bus reset");
        if let Err(err) = self.backend.bus_reset() {
            warn!("Bus reset: {}", err);
        }

        for (addr, record) in state.endpoints.drain() {
            self.backend.close_endpoint(addr);
            if let Some(transfer) = record.transfer {
                state.outbox.post(addr, transfer, Err(Error::IoCancelled));
            }
        }
        state.control = ControlState::new();

        if let Some(session) = state.session.as_mut() {
            session.on_reset();
        }
    }
}

#[cfg_attr(not(debug_assertions), allow(unused_variables))]
fn log_faults(faults: Faults) {
    #[cfg(debug_assertions)]
    if !faults.is_empty() {
        warn!("USB faults {=u32:#x}", faults.bits());
    }
}
