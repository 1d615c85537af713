//! The ChipIdea transfer backend

use core::cell::Cell;

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use super::{
    qh::Qh,
    ral::{self, endpoint_control},
    state::{DescriptorState, Descriptors, QH_COUNT, TDS_PER_QH},
    td::Td,
    Peripherals, ENDPOINT_COUNT,
};
use crate::{
    backend::{BusEvents, Faults, Interrupts, Retired},
    cache,
    critical::{spin_until, SPIN_LIMIT},
    endpoint::index,
    Chunk, Error, Speed, TransferBackend,
};

/// A TD moves at most this many bytes; five page pointers, one of them
/// possibly unaligned.
const CHUNK_LIMIT: usize = 16 * 1024;

/// USBMODE[CM] value for device mode
const CM_DEVICE: u32 = 0b10;

/// The ChipIdea backend
///
/// Owns one controller's registers and descriptor memory. See the
/// [module documentation](super) for setup.
pub struct ChipIdea {
    usb: *const ral::usb::RegisterBlock,
    phy: *const ral::usbphy::RegisterBlock,
    descriptors: Descriptors,
    /// TDs in each QH's current window
    armed: [Cell<u8>; QH_COUNT],
}

// Safety: the register pointers are owned, per the Peripherals contract.
// The controller serializes access to descriptors and endpoint registers.
unsafe impl Send for ChipIdea {}
unsafe impl Sync for ChipIdea {}

/// The ENDPTPRIME / ENDPTFLUSH / ENDPTCOMPLETE bit for an endpoint
fn endpoint_bit(addr: EndpointAddress) -> u32 {
    match addr.direction() {
        UsbDirection::Out => 1 << addr.index(),
        UsbDirection::In => 1 << (addr.index() + 16),
    }
}

/// Translate ENDPTCOMPLETE into endpoint indices
fn completions(endptcomplete: u32) -> u32 {
    (0..ENDPOINT_COUNT).fold(0, |complete, n| {
        let out = (endptcomplete >> n) & 1;
        let in_ = (endptcomplete >> (n + 16)) & 1;
        complete | (out << (n * 2)) | (in_ << (n * 2 + 1))
    })
}

/// ENDPTCTRL TXT / RXT encoding
fn endpoint_type(kind: EndpointType) -> u32 {
    match kind {
        EndpointType::Control => 0,
        EndpointType::Isochronous { .. } => 1,
        EndpointType::Bulk => 2,
        EndpointType::Interrupt => 3,
    }
}

impl ChipIdea {
    /// Create the backend
    ///
    /// Returns `None` if `state` already serves another controller.
    pub fn new<P: Peripherals>(peripherals: P, state: &'static DescriptorState) -> Option<Self> {
        #[allow(clippy::declare_interior_mutable_const)]
        const UNARMED: Cell<u8> = Cell::new(0);
        let descriptors = state.take()?;
        Some(ChipIdea {
            usb: peripherals.usb().cast(),
            phy: peripherals.phy().cast(),
            descriptors,
            armed: [UNARMED; QH_COUNT],
        })
    }

    fn usb(&self) -> &ral::usb::RegisterBlock {
        // Safety: valid for the life of the program, per Peripherals.
        unsafe { &*self.usb }
    }

    fn phy(&self) -> &ral::usbphy::RegisterBlock {
        // Safety: see above.
        unsafe { &*self.phy }
    }

    #[allow(clippy::mut_from_ref)]
    fn qh(&self, index: usize) -> &mut Qh {
        // Safety: callers run under the controller's lock, or in the
        // interrupt handler; neither keeps the reference past the call.
        unsafe { self.descriptors.qh(index) }
    }

    #[allow(clippy::mut_from_ref)]
    fn td(&self, index: usize, slot: usize) -> &mut Td {
        // Safety: see qh().
        unsafe { self.descriptors.td(index, slot) }
    }

    /// Zero the TD window and terminate the QH overlay
    fn forget(&self, index: usize) {
        self.armed[index].set(0);
        let overlay = self.qh(index).overlay_mut();
        overlay.set_terminate();
        overlay.clear_status();
        self.qh(index).clean_invalidate_dcache();
    }
}

impl TransferBackend for ChipIdea {
    fn endpoint_count(&self) -> usize {
        ENDPOINT_COUNT
    }

    fn chunk_limit(&self, _: EndpointAddress, _: usize) -> usize {
        CHUNK_LIMIT
    }

    fn ring_depth(&self) -> usize {
        TDS_PER_QH
    }

    fn attach(&self, speed: Speed) -> Result<(), Error> {
        if speed == Speed::Low {
            return Err(Error::NotSupported);
        }

        let (usb, phy) = (self.usb(), self.phy());
        ral::write_reg!(ral::usbphy, phy, CTRL_SET, SFTRST: 1);
        ral::write_reg!(ral::usbphy, phy, CTRL_CLR, SFTRST: 1);
        ral::write_reg!(ral::usbphy, phy, CTRL_CLR, CLKGATE: 1);
        ral::write_reg!(ral::usbphy, phy, PWD, 0);

        ral::write_reg!(ral::usb, usb, USBCMD, RST: 1);
        spin_until(|| ral::read_reg!(ral::usb, usb, USBCMD, RST == 0))?;
        // Immediate interrupt threshold. Also zeros the other USBCMD fields.
        ral::write_reg!(ral::usb, usb, USBCMD, ITC: 0);

        ral::write_reg!(ral::usb, usb, USBMODE, CM: CM_DEVICE, SLOM: 1);
        ral::modify_reg!(ral::usb, usb, PORTSC1, PFSC: (speed == Speed::Full) as u32);
        ral::modify_reg!(ral::usb, usb, USBSTS, |usbsts| usbsts);

        let list = self.descriptors.qh_list_addr() as u32;
        ral::write_reg!(ral::usb, usb, ENDPTLISTADDR, list);
        ral::write_reg!(ral::usb, usb, USBINTR, UE: 1, UEE: 1, PCE: 1, URE: 1, SLE: 1);
        ral::modify_reg!(ral::usb, usb, USBCMD, RS: 1);
        debug!("ATTACH {}", speed);
        Ok(())
    }

    fn detach(&self) {
        let usb = self.usb();
        ral::write_reg!(ral::usb, usb, USBINTR, 0);
        ral::modify_reg!(ral::usb, usb, USBCMD, RS: 0);
        debug!("DETACH");
    }

    fn open_endpoint(
        &self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet_size: usize,
    ) -> Result<(), Error> {
        let index = index(addr);
        let control_out = kind == EndpointType::Control && addr.direction() == UsbDirection::Out;
        self.qh(index).configure(max_packet_size, control_out);
        self.forget(index);

        // Endpoint 0 is always enabled, and always a control endpoint.
        if addr.index() == 0 {
            return Ok(());
        }

        let ctrl = endpoint_control::register(self.usb(), addr.index());
        let ty = endpoint_type(kind);
        match addr.direction() {
            UsbDirection::In => {
                ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXE: 1, TXR: 1, TXT: ty);
                // An unused direction must not stay a control endpoint.
                if ral::read_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXE == 0) {
                    let bulk = endpoint_type(EndpointType::Bulk);
                    ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXT: bulk);
                }
            }
            UsbDirection::Out => {
                ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXE: 1, RXR: 1, RXT: ty);
                if ral::read_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXE == 0) {
                    let bulk = endpoint_type(EndpointType::Bulk);
                    ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXT: bulk);
                }
            }
        }
        Ok(())
    }

    fn close_endpoint(&self, addr: EndpointAddress) {
        self.forget(index(addr));
        if addr.index() == 0 {
            return;
        }
        let ctrl = endpoint_control::register(self.usb(), addr.index());
        match addr.direction() {
            UsbDirection::In => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXE: 0),
            UsbDirection::Out => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXE: 0),
        }
    }

    unsafe fn arm_chunk(&self, addr: EndpointAddress, chunk: &Chunk, data: &mut [u8]) {
        let index = index(addr);
        let slot = self.armed[index].get() as usize;
        debug_assert!(slot < TDS_PER_QH);

        cache::clean_invalidate(&*data);
        let td = self.td(index, slot);
        td.set_terminate();
        td.clear_status();
        td.set_buffer(data.as_mut_ptr(), data.len());
        td.set_interrupt_on_complete(chunk.interrupt);
        td.set_active();
        td.clean_invalidate_dcache();

        if slot > 0 {
            let previous = self.td(index, slot - 1);
            previous.set_next(self.td(index, slot));
            previous.clean_invalidate_dcache();
        }
        self.armed[index].set(slot as u8 + 1);
    }

    fn prime(&self, addr: EndpointAddress) {
        let index = index(addr);
        let first: *const Td = self.td(index, 0);
        let overlay = self.qh(index).overlay_mut();
        overlay.set_next(first);
        overlay.clear_status();
        self.qh(index).clean_invalidate_dcache();

        let bit = endpoint_bit(addr);
        ral::write_reg!(ral::usb, self.usb(), ENDPTPRIME, bit);
    }

    fn retire(&self, addr: EndpointAddress, data: &mut [u8]) -> Retired {
        let index = index(addr);
        let armed = self.armed[index].replace(0) as usize;

        let mut retired = Retired::default();
        for slot in 0..armed {
            let td = self.td(index, slot);
            td.clean_invalidate_dcache();
            retired.remaining += td.bytes_remaining();
            retired.faults |= td.status().faults();
        }
        if addr.direction() == UsbDirection::Out {
            cache::clean_invalidate(&*data);
        }
        retired
    }

    fn abort(&self, addr: EndpointAddress) -> Result<(), Error> {
        let usb = self.usb();
        let bit = endpoint_bit(addr);
        ral::write_reg!(ral::usb, usb, ENDPTFLUSH, bit);
        let flushed = spin_until(|| ral::read_reg!(ral::usb, usb, ENDPTFLUSH) & bit == 0);

        self.forget(index(addr));
        if addr.index() != 0 {
            let ctrl = endpoint_control::register(usb, addr.index());
            match addr.direction() {
                UsbDirection::In => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXR: 1),
                UsbDirection::Out => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXR: 1),
            }
        }
        flushed
    }

    fn poll(&self) -> Interrupts {
        use ral::usb::USBSTS;

        let usb = self.usb();
        let usbsts = ral::read_reg!(ral::usb, usb, USBSTS);
        ral::write_reg!(ral::usb, usb, USBSTS, usbsts);

        let mut events = BusEvents::empty();
        events.set(BusEvents::RESET, usbsts & USBSTS::URI::mask != 0);
        events.set(BusEvents::SUSPEND, usbsts & USBSTS::SLI::mask != 0);
        events.set(BusEvents::PORT_CHANGE, usbsts & USBSTS::PCI::mask != 0);
        events.set(
            BusEvents::SETUP,
            ral::read_reg!(ral::usb, usb, ENDPTSETUPSTAT) & 1 != 0,
        );

        let mut faults = Faults::empty();
        faults.set(Faults::TRANSACTION, usbsts & USBSTS::UEI::mask != 0);

        Interrupts {
            events,
            faults,
            complete: completions(ral::read_reg!(ral::usb, usb, ENDPTCOMPLETE)),
        }
    }

    fn clear_complete(&self, addr: EndpointAddress) {
        let bit = endpoint_bit(addr);
        ral::write_reg!(ral::usb, self.usb(), ENDPTCOMPLETE, bit);
    }

    fn read_setup(&self) -> Result<[u8; 8], Error> {
        let usb = self.usb();
        ral::write_reg!(ral::usb, usb, ENDPTSETUPSTAT, 1);

        // The controller may overwrite the setup buffer while we read it.
        // SUTW clears if that happens; read again until it survives.
        let qh = self.qh(0);
        for _ in 0..SPIN_LIMIT {
            ral::modify_reg!(ral::usb, usb, USBCMD, SUTW: 1);
            qh.clean_invalidate_dcache();
            let setup = qh.setup();
            if ral::read_reg!(ral::usb, usb, USBCMD, SUTW == 1) {
                ral::modify_reg!(ral::usb, usb, USBCMD, SUTW: 0);
                return Ok(setup.to_le_bytes());
            }
        }
        Err(Error::Hardware)
    }

    fn set_stalled(&self, addr: EndpointAddress, stalled: bool) {
        let ctrl = endpoint_control::register(self.usb(), addr.index());
        let stalled = stalled as u32;
        match addr.direction() {
            UsbDirection::In => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXS: stalled),
            UsbDirection::Out => ral::modify_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXS: stalled),
        }
    }

    fn is_stalled(&self, addr: EndpointAddress) -> bool {
        let ctrl = endpoint_control::register(self.usb(), addr.index());
        match addr.direction() {
            UsbDirection::In => ral::read_reg!(endpoint_control, &ctrl, ENDPTCTRL, TXS == 1),
            UsbDirection::Out => ral::read_reg!(endpoint_control, &ctrl, ENDPTCTRL, RXS == 1),
        }
    }

    fn set_address(&self, address: u8) {
        // The engine applies the address after the status stage, so we
        // don't need USBADRA.
        ral::write_reg!(ral::usb, self.usb(), DEVICEADDR, USBADR: address as u32);
        debug!("ADDRESS {}", address);
    }

    fn speed(&self) -> Option<Speed> {
        if ral::read_reg!(ral::usb, self.usb(), USBCMD, RS == 0) {
            return None;
        }
        match ral::read_reg!(ral::usb, self.usb(), PORTSC1, PSPD) {
            0 => Some(Speed::Full),
            1 => Some(Speed::Low),
            2 => Some(Speed::High),
            _ => None,
        }
    }

    fn bus_reset(&self) -> Result<(), Error> {
        let usb = self.usb();
        ral::modify_reg!(ral::usb, usb, ENDPTSETUPSTAT, |endptsetupstat| endptsetupstat);
        ral::modify_reg!(ral::usb, usb, ENDPTCOMPLETE, |endptcomplete| endptcomplete);
        ral::modify_reg!(ral::usb, usb, ENDPTNAK, |endptnak| endptnak);
        ral::write_reg!(ral::usb, usb, ENDPTNAKEN, 0);

        let flushed = spin_until(|| ral::read_reg!(ral::usb, usb, ENDPTPRIME) == 0).and_then(|()| {
            ral::write_reg!(ral::usb, usb, ENDPTFLUSH, u32::MAX);
            spin_until(|| ral::read_reg!(ral::usb, usb, ENDPTFLUSH) == 0)
        });

        for index in 0..QH_COUNT {
            self.forget(index);
        }
        ral::write_reg!(ral::usb, usb, DEVICEADDR, 0);
        debug!("RESET");
        flushed
    }

    fn set_test_mode(&self, mode: u8) -> Result<(), Error> {
        match mode {
            1..=5 => {
                ral::modify_reg!(ral::usb, self.usb(), PORTSC1, PTC: mode as u32);
                Ok(())
            }
            _ => Err(Error::InvalidParams),
        }
    }
}

#[cfg(test)]
mod tests {
    use usb_device::{
        endpoint::{EndpointAddress, EndpointType},
        UsbDirection,
    };

    use super::{completions, ChipIdea, DescriptorState, Peripherals};
    use crate::{
        chipidea::ral::{usb, usbphy},
        BusEvents, Chunk, Error, Faults, Speed, TransferBackend,
    };

    struct Registers {
        usb: &'static usb::RegisterBlock,
        phy: &'static usbphy::RegisterBlock,
    }

    unsafe impl Peripherals for Registers {
        fn usb(&self) -> *const () {
            (self.usb as *const usb::RegisterBlock).cast()
        }
        fn phy(&self) -> *const () {
            (self.phy as *const usbphy::RegisterBlock).cast()
        }
    }

    fn backend() -> (ChipIdea, &'static usb::RegisterBlock) {
        // Safety: all-zero is a valid register state.
        let usb: &'static usb::RegisterBlock =
            Box::leak(Box::new(unsafe { core::mem::zeroed::<usb::RegisterBlock>() }));
        let phy: &'static usbphy::RegisterBlock =
            Box::leak(Box::new(unsafe { core::mem::zeroed::<usbphy::RegisterBlock>() }));
        let state: &'static DescriptorState = Box::leak(Box::<DescriptorState>::default());
        (ChipIdea::new(Registers { usb, phy }, state).unwrap(), usb)
    }

    fn ep(index: u8, direction: UsbDirection) -> EndpointAddress {
        EndpointAddress::from_parts(index as usize, direction)
    }

    #[test]
    fn completion_bits_map_to_indices() {
        assert_eq!(completions(1), 1 << 0);
        assert_eq!(completions(1 << 16), 1 << 1);
        assert_eq!(completions((1 << 3) | (1 << 19)), (1 << 6) | (1 << 7));
    }

    #[test]
    fn open_sets_endpoint_control() {
        let (backend, usb) = backend();
        backend
            .open_endpoint(ep(2, UsbDirection::In), EndpointType::Interrupt, 64)
            .unwrap();
        let expected = (1 << 23) | (1 << 22) | (3 << 18) | (2 << 2);
        assert_eq!(usb.ENDPTCTRL[2].read(), expected);

        backend.close_endpoint(ep(2, UsbDirection::In));
        assert_eq!(usb.ENDPTCTRL[2].read() & (1 << 23), 0);
    }

    #[test]
    fn window_links_tds() {
        let (backend, usb) = backend();
        let addr = ep(1, UsbDirection::In);
        backend.open_endpoint(addr, EndpointType::Bulk, 512).unwrap();

        let data: &'static mut [u8] = Box::leak(vec![0; 96].into_boxed_slice());
        for (n, span) in data.chunks_mut(32).enumerate() {
            let chunk = Chunk {
                offset: n * 32,
                len: 32,
                interrupt: n == 2,
            };
            unsafe { backend.arm_chunk(addr, &chunk, span) };
        }
        backend.prime(addr);

        assert_eq!(usb.ENDPTPRIME.read(), 1 << 17);
        let td1 = backend.td(3, 1) as *const _ as u32;
        assert_eq!(backend.td(3, 0).next(), td1);
        assert_eq!(backend.td(3, 2).next(), 1);
        assert!(!backend.td(3, 0).interrupt_on_complete());
        assert!(backend.td(3, 2).interrupt_on_complete());
        let td0 = backend.td(3, 0) as *const _ as u32;
        assert_eq!(backend.qh(3).overlay_mut().next(), td0);
    }

    #[test]
    fn retire_reports_unused_bytes() {
        let (backend, _) = backend();
        let addr = ep(1, UsbDirection::Out);
        backend.open_endpoint(addr, EndpointType::Bulk, 64).unwrap();

        let data: &'static mut [u8] = Box::leak(vec![0; 64].into_boxed_slice());
        let chunk = Chunk {
            offset: 0,
            len: 64,
            interrupt: true,
        };
        unsafe { backend.arm_chunk(addr, &chunk, data) };
        backend.prime(addr);

        // The controller received 10 bytes.
        backend.td(2, 0).set_buffer(data.as_mut_ptr(), 54);
        let retired = backend.retire(addr, data);
        assert_eq!(retired.remaining, 54);
        assert!(retired.faults.is_empty());
    }

    #[test]
    fn poll_reports_events() {
        let (backend, usb) = backend();
        usb.USBSTS.write((1 << 6) | (1 << 2) | (1 << 1));
        usb.ENDPTSETUPSTAT.write(1);
        usb.ENDPTCOMPLETE.write(1 << 16);

        let interrupts = backend.poll();
        assert_eq!(
            interrupts.events,
            BusEvents::RESET | BusEvents::PORT_CHANGE | BusEvents::SETUP
        );
        assert_eq!(interrupts.faults, Faults::TRANSACTION);
        assert_eq!(interrupts.complete, 1 << 1);
    }

    #[test]
    fn abort_times_out() {
        let (backend, _) = backend();
        assert_eq!(backend.abort(ep(1, UsbDirection::In)), Err(Error::Hardware));
    }

    #[test]
    fn attach_needs_controller_reset() {
        let (backend, _) = backend();
        assert_eq!(backend.attach(Speed::Low), Err(Error::NotSupported));
        // RST never clears in memory.
        assert_eq!(backend.attach(Speed::High), Err(Error::Hardware));
    }

    #[test]
    fn read_setup_clears_tripwire() {
        let (backend, usb) = backend();
        backend.qh(0).set_setup(u64::from_le_bytes([0x80, 6, 0, 1, 0, 0, 64, 0]));
        let setup = backend.read_setup().unwrap();
        assert_eq!(setup, [0x80, 6, 0, 1, 0, 0, 64, 0]);
        assert_eq!(usb.USBCMD.read() & (1 << 13), 0);
        assert_eq!(usb.ENDPTSETUPSTAT.read(), 1);
    }

    #[test]
    fn speed_and_address() {
        let (backend, usb) = backend();
        assert_eq!(backend.speed(), None);
        usb.USBCMD.write(1);
        usb.PORTSC1.write(2 << 26);
        assert_eq!(backend.speed(), Some(Speed::High));

        backend.set_address(5);
        assert_eq!(usb.DEVICEADDR.read(), 5 << 25);
    }

    #[test]
    fn stall_both_directions() {
        let (backend, _) = backend();
        let addr = ep(3, UsbDirection::Out);
        backend.set_stalled(addr, true);
        assert!(backend.is_stalled(addr));
        assert!(!backend.is_stalled(ep(3, UsbDirection::In)));
        backend.set_stalled(addr, false);
        assert!(!backend.is_stalled(addr));
    }

    #[test]
    fn test_modes() {
        let (backend, usb) = backend();
        backend.set_test_mode(4).unwrap();
        assert_eq!(usb.PORTSC1.read(), 4 << 16);
        assert_eq!(backend.set_test_mode(9), Err(Error::InvalidParams));
    }
}
