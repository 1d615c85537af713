//! RP2040 device controller backend
//!
//! The RP2040 controller keeps endpoint state in a 4 KiB dual-port packet
//! RAM: a control word and a buffer control word per endpoint direction,
//! and the packet buffers themselves. The CPU copies every packet in and
//! out of that RAM, one packet per completion.
//!
//! Bulk, interrupt, and control endpoints get a fixed 64 byte buffer.
//! Isochronous endpoints take their buffers from the top of the packet
//! RAM. A closed endpoint keeps its buffer for the next open, and the
//! space comes back once no isochronous endpoint is open, or on bus reset.
//!
//! ```no_run
//! use usbdc::{rp2040::{Peripherals, Rp2040}, Controller};
//!
//! struct UsbCtrl;
//!
//! unsafe impl Peripherals for UsbCtrl {
//!     fn regs(&self) -> *const () {
//!         0x5011_0000 as *const ()
//!     }
//!     fn dpram(&self) -> *const () {
//!         0x5010_0000 as *const ()
//!     }
//! }
//!
//! let controller = Controller::new(Rp2040::new(UsbCtrl));
//! ```

mod driver;
mod ral;

pub use driver::Rp2040;

/// Endpoint numbers on the RP2040 controller
pub const ENDPOINT_COUNT: usize = 16;

/// A type that owns the RP2040 USB controller
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// USBCTRL_REGS block and the USBCTRL_DPRAM packet RAM. The returned
/// pointers are assumed valid for the life of the program.
pub unsafe trait Peripherals {
    /// Returns the address of USBCTRL_REGS
    fn regs(&self) -> *const ();
    /// Returns the address of USBCTRL_DPRAM
    fn dpram(&self) -> *const ();
}
