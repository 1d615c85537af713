//! Volatile cell that conforms to the RAL's register API
//!
//! Used for memory that the controller reads and writes behind the
//! CPU's back: DMA descriptors, and packet RAM.

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        // Safety: the cell owns the memory; volatile access keeps every
        // load visible to the hardware model.
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}

/// Copy `src` into volatile memory
pub fn copy_to(dst: &[VCell<u8>], src: &[u8]) {
    dst.iter().zip(src).for_each(|(cell, &byte)| cell.write(byte));
}

/// Copy volatile memory into `dst`
pub fn copy_from(dst: &mut [u8], src: &[VCell<u8>]) {
    dst.iter_mut().zip(src).for_each(|(byte, cell)| *byte = cell.read());
}
