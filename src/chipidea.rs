//! ChipIdea device controller backend
//!
//! The ChipIdea core walks DMA descriptors in main memory: one queue head
//! (QH) per endpoint direction, and a chain of transfer descriptors (TD)
//! hanging off each QH. This backend gives every QH a small ring of TDs,
//! so an IN transfer can arm up to [`TDS_PER_QH`] chunks before it
//! interrupts.
//!
//! To use the backend, implement [`Peripherals`] for a type that owns the
//! USB core and PHY registers, and allocate a `static` [`DescriptorState`].
//!
//! ```no_run
//! use usbdc::{chipidea::{ChipIdea, DescriptorState, Peripherals}, Controller};
//!
//! struct Usb1;
//!
//! unsafe impl Peripherals for Usb1 {
//!     fn usb(&self) -> *const () {
//!         0x402E_0000 as *const ()
//!     }
//!     fn phy(&self) -> *const () {
//!         0x400D_9000 as *const ()
//!     }
//! }
//!
//! static DESCRIPTORS: DescriptorState = DescriptorState::new();
//!
//! let backend = ChipIdea::new(Usb1, &DESCRIPTORS).unwrap();
//! let controller = Controller::new(backend);
//! ```
//!
//! The backend assumes that the USB clocks and PLL are already running.

mod driver;
mod qh;
mod ral;
mod state;
mod td;

pub use driver::ChipIdea;
pub use state::{DescriptorState, TDS_PER_QH};

/// Endpoint numbers on the ChipIdea core
pub const ENDPOINT_COUNT: usize = 8;

/// A type that owns the ChipIdea register blocks
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the USB
/// core registers and the USB PHY registers of one controller. The
/// returned pointers are assumed valid for the life of the program, and
/// are cast to register definitions.
pub unsafe trait Peripherals {
    /// Returns the address of the USB core registers
    fn usb(&self) -> *const ();
    /// Returns the address of the USB PHY registers
    fn phy(&self) -> *const ();
}
