//! Endpoint Transfer Descriptors (TD)
//!
//! A TD describes one DMA chunk. TDs for an endpoint link into a chain
//! through `NEXT`; the queue head's overlay points at the first one.

#![allow(non_snake_case, non_upper_case_globals)]

use super::ral;
use crate::{backend::Faults, cache, vcell::VCell};

#[repr(C)]
pub struct Td {
    NEXT: VCell<u32>,
    TOKEN: VCell<u32>,
    BUFFERS: [VCell<u32>; 5],
    _reserved: u32,
}

const _: [(); 1] = [(); (core::mem::size_of::<Td>() == 32) as usize];

/// One buffer pointer covers a 4 KiB page.
const PAGE: u32 = 0x1000;

pub mod NEXT {
    fields! {
        TERMINATE: 0, 1;
        NEXT_LINK_POINTER: 5, 27;
    }
}

pub mod TOKEN {
    fields! {
        STATUS: 0, 8;
        IOC: 15, 1;
        TOTAL_BYTES: 16, 15;
    }
}

bitflags::bitflags! {
    /// TD status byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status : u32 {
        const ACTIVE = 1 << 7;
        const HALTED = 1 << 6;
        const DATA_BUS_ERROR = 1 << 5;
        const TRANSACTION_ERROR = 1 << 3;
    }
}

impl Status {
    /// The faults this status reports
    pub fn faults(self) -> Faults {
        let mut faults = Faults::empty();
        faults.set(Faults::HALTED, self.contains(Status::HALTED));
        faults.set(Faults::BUFFER, self.contains(Status::DATA_BUS_ERROR));
        faults.set(Faults::TRANSACTION, self.contains(Status::TRANSACTION_ERROR));
        faults
    }
}

impl Td {
    pub const fn new() -> Self {
        Td {
            NEXT: VCell::new(0),
            TOKEN: VCell::new(0),
            BUFFERS: [
                VCell::new(0),
                VCell::new(0),
                VCell::new(0),
                VCell::new(0),
                VCell::new(0),
            ],
            _reserved: 0,
        }
    }

    /// Mark this TD as the end of its chain
    pub fn set_terminate(&mut self) {
        ral::write_reg!(super::td, self, NEXT, TERMINATE: 1);
    }

    /// Link `next` after this TD
    pub fn set_next(&mut self, next: *const Td) {
        let addr = next as u32;
        ral::write_reg!(super::td, self, NEXT, addr);
    }

    /// Point this TD at `size` bytes starting at `ptr`
    ///
    /// `size` must not exceed 16 KiB.
    pub fn set_buffer(&mut self, ptr: *mut u8, size: usize) {
        ral::modify_reg!(super::td, self, TOKEN, TOTAL_BYTES: size as u32);
        let base = ptr as u32;
        self.BUFFERS[0].write(base);
        for (page, buffer) in self.BUFFERS.iter().enumerate().skip(1) {
            buffer.write((base & !(PAGE - 1)).wrapping_add(page as u32 * PAGE));
        }
    }

    pub fn set_interrupt_on_complete(&mut self, ioc: bool) {
        ral::modify_reg!(super::td, self, TOKEN, IOC: ioc as u32);
    }

    /// Hand the TD to the controller
    pub fn set_active(&mut self) {
        ral::modify_reg!(super::td, self, TOKEN, STATUS: Status::ACTIVE.bits());
    }

    pub fn clear_status(&mut self) {
        ral::modify_reg!(super::td, self, TOKEN, STATUS: 0);
    }

    pub fn status(&self) -> Status {
        Status::from_bits_truncate(ral::read_reg!(super::td, self, TOKEN, STATUS))
    }

    /// Bytes the controller did not move
    pub fn bytes_remaining(&self) -> usize {
        ral::read_reg!(super::td, self, TOKEN, TOTAL_BYTES) as usize
    }

    pub fn clean_invalidate_dcache(&self) {
        cache::clean_invalidate(self);
    }

    #[cfg(test)]
    pub fn next(&self) -> u32 {
        self.NEXT.read()
    }

    #[cfg(test)]
    pub fn interrupt_on_complete(&self) -> bool {
        ral::read_reg!(super::td, self, TOKEN, IOC == 1)
    }
}
