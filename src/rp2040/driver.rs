//! The RP2040 transfer backend

use core::cell::Cell;

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use super::{
    ral::{self, buffer_control, ep_control, usbctrl, Dpram, DPRAM_SIZE, EP0_BUFFER},
    Peripherals, ENDPOINT_COUNT,
};
use crate::{
    backend::{BusEvents, Faults, Interrupts, Retired},
    buffer::Allocator,
    critical::spin_until,
    endpoint::{index, RECORD_COUNT},
    vcell, Chunk, Error, Speed, TransferBackend,
};

/// Largest packet for bulk, interrupt, and control endpoints at full speed
const MAX_PACKET: usize = 64;
/// Start of the fixed, per-endpoint buffers
const FIXED_BUFFERS: usize = 0x180;
/// Isochronous buffers come from here to the end of the RAM
const ISOCHRONOUS_BUFFERS: usize = FIXED_BUFFERS + (ENDPOINT_COUNT - 1) * 2 * MAX_PACKET;
/// Buffer addresses must be 64 byte aligned
const BUFFER_ALIGN: usize = 64;

/// One endpoint direction's buffer, and its pending packet
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    /// DPRAM offset of the buffer
    offset: usize,
    capacity: usize,
    /// Bytes to send, or room to receive, in the armed packet
    len: usize,
    /// Next data PID is DATA1
    data1: bool,
    open: bool,
    /// Isochronous buffer held by this endpoint direction, offset and size.
    /// Outlives a close, so that a reopen finds it again.
    held: Option<(usize, usize)>,
}

/// The RP2040 backend
///
/// Full speed only. Each endpoint direction owns one buffer in packet
/// RAM, so a window is always one packet.
pub struct Rp2040 {
    regs: *const usbctrl::RegisterBlock,
    dpram: *const Dpram,
    slots: [Cell<Slot>; RECORD_COUNT],
    isochronous: Cell<Allocator>,
}

// Safety: the register pointers are owned, per the Peripherals contract.
// The controller serializes access to endpoint state.
unsafe impl Send for Rp2040 {}
unsafe impl Sync for Rp2040 {}

fn is_out(addr: EndpointAddress) -> bool {
    addr.direction() == UsbDirection::Out
}

/// BUFF_STATUS, EP_ABORT, and EP_ABORT_DONE put IN before OUT. Swap each
/// pair of bits to get endpoint indices, and back.
fn swap_directions(bits: u32) -> u32 {
    ((bits & 0x5555_5555) << 1) | ((bits >> 1) & 0x5555_5555)
}

fn hardware_bit(addr: EndpointAddress) -> u32 {
    1 << (index(addr) ^ 1)
}

/// Buffer control writes need a few cycles to cross into the USB clock domain.
fn settle() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    for _ in 0..3 {
        cortex_m::asm::nop();
    }
}

/// EP_CONTROL ENDPOINT_TYPE encoding
fn endpoint_type(kind: EndpointType) -> u32 {
    match kind {
        EndpointType::Control => 0,
        EndpointType::Isochronous { .. } => 1,
        EndpointType::Bulk => 2,
        EndpointType::Interrupt => 3,
    }
}

/// Fixed buffer for endpoint `index`, `out`
fn fixed_buffer(index: usize, out: bool) -> usize {
    if index == 0 {
        EP0_BUFFER
    } else {
        FIXED_BUFFERS + ((index - 1) * 2 + out as usize) * MAX_PACKET
    }
}

impl Rp2040 {
    /// Create the backend
    pub fn new<P: Peripherals>(peripherals: P) -> Self {
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: Cell<Slot> = Cell::new(Slot {
            offset: 0,
            capacity: 0,
            len: 0,
            data1: false,
            open: false,
            held: None,
        });
        Rp2040 {
            regs: peripherals.regs().cast(),
            dpram: peripherals.dpram().cast(),
            slots: [EMPTY; RECORD_COUNT],
            isochronous: Cell::new(Allocator::new(ISOCHRONOUS_BUFFERS, DPRAM_SIZE)),
        }
    }

    fn regs(&self) -> &usbctrl::RegisterBlock {
        // Safety: valid for the life of the program, per Peripherals.
        unsafe { &*self.regs }
    }

    fn dpram(&self) -> &Dpram {
        // Safety: see above.
        unsafe { &*self.dpram }
    }

    fn update(&self, addr: EndpointAddress, f: impl FnOnce(&mut Slot)) {
        let cell = &self.slots[index(addr)];
        let mut slot = cell.get();
        f(&mut slot);
        cell.set(slot);
    }

    fn buffer_control(&self, addr: EndpointAddress) -> buffer_control::BufferControl<'_> {
        self.dpram().buffer_control(addr.index(), is_out(addr))
    }

    fn release_isochronous(&self) {
        let mut allocator = self.isochronous.get();
        allocator.reset();
        self.isochronous.set(allocator);
        for slot in &self.slots {
            let mut s = slot.get();
            s.held = None;
            slot.set(s);
        }
    }
}

impl TransferBackend for Rp2040 {
    fn endpoint_count(&self) -> usize {
        ENDPOINT_COUNT
    }

    fn chunk_limit(&self, _: EndpointAddress, max_packet_size: usize) -> usize {
        max_packet_size
    }

    fn attach(&self, speed: Speed) -> Result<(), Error> {
        if speed != Speed::Full {
            return Err(Error::NotSupported);
        }

        let regs = self.regs();
        let dpram = self.dpram();
        dpram.EP_CONTROL.iter().for_each(|ctrl| ctrl.write(0));
        dpram.EP_BUFFER_CONTROL.iter().for_each(|ctrl| ctrl.write(0));

        ral::write_reg!(ral::usbctrl, regs, USB_MUXING, TO_PHY: 1, SOFTCON: 1);
        ral::write_reg!(ral::usbctrl, regs, USB_PWR, VBUS_DETECT: 1, VBUS_DETECT_OVERRIDE_EN: 1);
        ral::write_reg!(ral::usbctrl, regs, MAIN_CTRL, CONTROLLER_EN: 1, HOST_NDEVICE: 0);
        ral::write_reg!(ral::usbctrl, regs, SIE_CTRL, EP0_INT_1BUF: 1);
        ral::write_reg!(
            ral::usbctrl,
            regs,
            INTE,
            BUFF_STATUS: 1,
            ERROR_DATA_SEQ: 1,
            ERROR_RX_TIMEOUT: 1,
            ERROR_RX_OVERFLOW: 1,
            ERROR_BIT_STUFF: 1,
            ERROR_CRC: 1,
            BUS_RESET: 1,
            DEV_CONN_DIS: 1,
            DEV_SUSPEND: 1,
            DEV_RESUME_FROM_HOST: 1,
            SETUP_REQ: 1
        );
        ral::modify_reg!(ral::usbctrl, regs, SIE_CTRL, PULLUP_EN: 1);
        debug!("ATTACH {}", speed);
        Ok(())
    }

    fn detach(&self) {
        let regs = self.regs();
        ral::modify_reg!(ral::usbctrl, regs, SIE_CTRL, PULLUP_EN: 0);
        ral::write_reg!(ral::usbctrl, regs, INTE, 0);
        ral::write_reg!(ral::usbctrl, regs, MAIN_CTRL, 0);
        debug!("DETACH");
    }

    fn open_endpoint(
        &self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet_size: usize,
    ) -> Result<(), Error> {
        let isochronous = matches!(kind, EndpointType::Isochronous { .. });
        let mut held = self.slots[index(addr)].get().held;
        let offset = if isochronous && addr.index() != 0 {
            match held {
                Some((offset, size)) if size >= max_packet_size => offset,
                _ => {
                    let mut allocator = self.isochronous.get();
                    let offset = allocator
                        .allocate(max_packet_size, BUFFER_ALIGN)
                        .ok_or(Error::InvalidParams)?;
                    self.isochronous.set(allocator);
                    held = Some((offset, max_packet_size));
                    offset
                }
            }
        } else if max_packet_size > MAX_PACKET {
            return Err(Error::InvalidParams);
        } else {
            fixed_buffer(addr.index(), is_out(addr))
        };

        self.slots[index(addr)].set(Slot {
            offset,
            capacity: max_packet_size,
            len: 0,
            data1: false,
            open: true,
            held,
        });

        let bufctrl = self.buffer_control(addr);
        ral::write_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, 0);
        if addr.index() != 0 {
            let epctrl = self.dpram().ep_control(addr.index(), is_out(addr));
            ral::write_reg!(
                ep_control,
                &epctrl,
                EP_CONTROL,
                ENABLE: 1,
                INTERRUPT_PER_BUFF: 1,
                ENDPOINT_TYPE: endpoint_type(kind),
                BUFFER_ADDRESS: offset as u32
            );
        }
        Ok(())
    }

    fn close_endpoint(&self, addr: EndpointAddress) {
        let bufctrl = self.buffer_control(addr);
        ral::write_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, 0);
        if addr.index() != 0 {
            let epctrl = self.dpram().ep_control(addr.index(), is_out(addr));
            ral::write_reg!(ep_control, &epctrl, EP_CONTROL, 0);
        }
        let held = self.slots[index(addr)].get().held;
        self.slots[index(addr)].set(Slot {
            held,
            ..Slot::default()
        });

        // With no isochronous endpoint left open, all of their RAM is free.
        let in_use = self
            .slots
            .iter()
            .map(Cell::get)
            .any(|slot| slot.open && slot.offset >= ISOCHRONOUS_BUFFERS);
        if !in_use {
            self.release_isochronous();
        }
    }

    unsafe fn arm_chunk(&self, addr: EndpointAddress, chunk: &Chunk, data: &mut [u8]) {
        let slot = self.slots[index(addr)].get();
        let len = chunk.len.min(slot.capacity);
        if !is_out(addr) {
            vcell::copy_to(self.dpram().buffer(slot.offset, len), &data[..len.min(data.len())]);
        }
        self.update(addr, |slot| slot.len = len);
    }

    fn prime(&self, addr: EndpointAddress) {
        let slot = self.slots[index(addr)].get();
        let bufctrl = self.buffer_control(addr);
        ral::write_reg!(
            buffer_control,
            &bufctrl,
            BUFFER_CONTROL,
            LENGTH: slot.len as u32,
            PID: slot.data1 as u32,
            FULL: !is_out(addr) as u32,
            LAST: 1
        );
        // AVAILABLE goes last, so the controller never sees a half
        // written buffer control.
        settle();
        ral::modify_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, AVAILABLE: 1);
    }

    fn retire(&self, addr: EndpointAddress, data: &mut [u8]) -> Retired {
        let slot = self.slots[index(addr)].get();
        let bufctrl = self.buffer_control(addr);
        let used = if is_out(addr) {
            let received =
                ral::read_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, LENGTH) as usize;
            let received = received.min(slot.len);
            let n = received.min(data.len());
            vcell::copy_from(&mut data[..n], self.dpram().buffer(slot.offset, n));
            received
        } else {
            slot.len
        };

        self.update(addr, |slot| {
            slot.len = 0;
            slot.data1 = !slot.data1;
        });
        Retired {
            remaining: slot.len - used,
            faults: Faults::empty(),
        }
    }

    fn abort(&self, addr: EndpointAddress) -> Result<(), Error> {
        let regs = self.regs();
        let bit = hardware_bit(addr);
        ral::modify_reg!(ral::usbctrl, regs, EP_ABORT, |abort| abort | bit);
        let aborted = spin_until(|| ral::read_reg!(ral::usbctrl, regs, EP_ABORT_DONE) & bit != 0);

        let bufctrl = self.buffer_control(addr);
        ral::write_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, 0);
        ral::write_reg!(ral::usbctrl, regs, EP_ABORT_DONE, bit);
        ral::modify_reg!(ral::usbctrl, regs, EP_ABORT, |abort| abort & !bit);
        ral::write_reg!(ral::usbctrl, regs, BUFF_STATUS, bit);

        self.update(addr, |slot| {
            slot.len = 0;
            slot.data1 = false;
        });
        aborted
    }

    fn poll(&self) -> Interrupts {
        use usbctrl::{INTS, SIE_STATUS};

        let regs = self.regs();
        let ints = ral::read_reg!(ral::usbctrl, regs, INTS);
        let sie_status = ral::read_reg!(ral::usbctrl, regs, SIE_STATUS);

        let mut events = BusEvents::empty();
        events.set(BusEvents::RESET, ints & INTS::BUS_RESET::mask != 0);
        events.set(BusEvents::SUSPEND, ints & INTS::DEV_SUSPEND::mask != 0);
        events.set(
            BusEvents::PORT_CHANGE,
            ints & (INTS::DEV_RESUME_FROM_HOST::mask | INTS::DEV_CONN_DIS::mask) != 0,
        );
        events.set(BusEvents::SETUP, ints & INTS::SETUP_REQ::mask != 0);

        let mut faults = Faults::empty();
        faults.set(Faults::CRC, sie_status & SIE_STATUS::CRC_ERROR::mask != 0);
        faults.set(Faults::BIT_STUFF, sie_status & SIE_STATUS::BIT_STUFF_ERROR::mask != 0);
        faults.set(Faults::BABBLE, sie_status & SIE_STATUS::RX_OVERFLOW::mask != 0);
        faults.set(Faults::TIMEOUT, sie_status & SIE_STATUS::RX_TIMEOUT::mask != 0);
        faults.set(Faults::DATA_SEQUENCE, sie_status & SIE_STATUS::DATA_SEQ_ERROR::mask != 0);

        // Acknowledge everything but SETUP_REC; read_setup() takes that.
        let acknowledge = sie_status
            & (SIE_STATUS::BUS_RESET::mask
                | SIE_STATUS::SUSPENDED::mask
                | SIE_STATUS::RESUME::mask
                | SIE_STATUS::CONNECTED::mask
                | SIE_STATUS::CRC_ERROR::mask
                | SIE_STATUS::BIT_STUFF_ERROR::mask
                | SIE_STATUS::RX_OVERFLOW::mask
                | SIE_STATUS::RX_TIMEOUT::mask
                | SIE_STATUS::DATA_SEQ_ERROR::mask);
        ral::write_reg!(ral::usbctrl, regs, SIE_STATUS, acknowledge);

        let complete = if ints & INTS::BUFF_STATUS::mask != 0 {
            swap_directions(ral::read_reg!(ral::usbctrl, regs, BUFF_STATUS))
        } else {
            0
        };

        Interrupts {
            events,
            faults,
            complete,
        }
    }

    fn clear_complete(&self, addr: EndpointAddress) {
        let bit = hardware_bit(addr);
        ral::write_reg!(ral::usbctrl, self.regs(), BUFF_STATUS, bit);
    }

    fn read_setup(&self) -> Result<[u8; 8], Error> {
        let mut setup = [0; 8];
        vcell::copy_from(&mut setup, &self.dpram().SETUP);
        ral::write_reg!(ral::usbctrl, self.regs(), SIE_STATUS, SETUP_REC: 1);

        // Both stages after SETUP start with DATA1.
        for direction in [UsbDirection::Out, UsbDirection::In] {
            self.update(EndpointAddress::from_parts(0, direction), |slot| {
                slot.data1 = true
            });
        }
        Ok(setup)
    }

    fn set_stalled(&self, addr: EndpointAddress, stalled: bool) {
        let regs = self.regs();
        if addr.index() == 0 {
            let stall = stalled as u32;
            match addr.direction() {
                UsbDirection::In => {
                    ral::modify_reg!(ral::usbctrl, regs, EP_STALL_ARM, EP0_IN: stall)
                }
                UsbDirection::Out => {
                    ral::modify_reg!(ral::usbctrl, regs, EP_STALL_ARM, EP0_OUT: stall)
                }
            }
        }
        let bufctrl = self.buffer_control(addr);
        if stalled {
            ral::modify_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, STALL: 1, AVAILABLE: 0);
        } else {
            ral::modify_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, STALL: 0);
            self.update(addr, |slot| slot.data1 = false);
        }
    }

    fn is_stalled(&self, addr: EndpointAddress) -> bool {
        let bufctrl = self.buffer_control(addr);
        ral::read_reg!(buffer_control, &bufctrl, BUFFER_CONTROL, STALL == 1)
    }

    fn set_address(&self, address: u8) {
        ral::write_reg!(ral::usbctrl, self.regs(), ADDR_ENDP, ADDRESS: address as u32);
        debug!("ADDRESS {}", address);
    }

    fn speed(&self) -> Option<Speed> {
        let regs = self.regs();
        if ral::read_reg!(ral::usbctrl, regs, MAIN_CTRL, CONTROLLER_EN == 0) {
            return None;
        }
        match ral::read_reg!(ral::usbctrl, regs, SIE_STATUS, SPEED) {
            1 => Some(Speed::Low),
            2 => Some(Speed::Full),
            _ => None,
        }
    }

    fn bus_reset(&self) -> Result<(), Error> {
        let regs = self.regs();
        ral::write_reg!(ral::usbctrl, regs, ADDR_ENDP, 0);
        ral::write_reg!(ral::usbctrl, regs, EP_STALL_ARM, 0);
        self.dpram()
            .EP_BUFFER_CONTROL
            .iter()
            .for_each(|ctrl| ctrl.write(0));
        ral::write_reg!(ral::usbctrl, regs, BUFF_STATUS, u32::MAX);

        self.release_isochronous();
        for slot in &self.slots {
            let mut s = slot.get();
            s.len = 0;
            s.data1 = false;
            slot.set(s);
        }
        debug!("RESET");
        Ok(())
    }
}
