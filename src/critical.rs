//! Interrupt-masking critical sections
//!
//! State shared between the dispatcher and the USB interrupt handler
//! lives in a [`Shared`] cell. [`Shared::lock`] masks interrupts and
//! returns a guard; interrupts are restored when the guard drops.

use core::{
    cell::{RefCell, RefMut},
    ops::{Deref, DerefMut},
};

use crate::Error;

/// Upper bound on polls of a hardware handshake bit
pub const SPIN_LIMIT: u32 = 100_000;

/// Spin until `done` returns `true`
///
/// Returns [`Error::Hardware`] if it doesn't happen within [`SPIN_LIMIT`]
/// polls. Never call this while holding a [`Guard`] from dispatcher context.
pub fn spin_until(mut done: impl FnMut() -> bool) -> Result<(), Error> {
    for _ in 0..SPIN_LIMIT {
        if done() {
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(Error::Hardware)
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod primask {
    /// Returns `true` if interrupts were enabled before the call
    pub fn disable() -> bool {
        let active = cortex_m::register::primask::read().is_active();
        cortex_m::interrupt::disable();
        active
    }

    pub fn restore(active: bool) {
        if active {
            // Safety: restores the state observed in disable().
            unsafe { cortex_m::interrupt::enable() };
        }
    }
}

// Host builds have no interrupts to mask.
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
mod primask {
    pub fn disable() -> bool {
        false
    }

    pub fn restore(_: bool) {}
}

struct Mask(bool);

impl Mask {
    fn acquire() -> Self {
        Mask(primask::disable())
    }
}

impl Drop for Mask {
    fn drop(&mut self) {
        primask::restore(self.0);
    }
}

/// A value shared with interrupt context
pub struct Shared<T> {
    value: RefCell<T>,
}

// Safety: every access goes through lock(), which masks interrupts on
// the only core.
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Shared {
            value: RefCell::new(value),
        }
    }

    /// Mask interrupts and borrow the value
    ///
    /// # Panics
    ///
    /// Panics if the same context already holds a guard.
    pub fn lock(&self) -> Guard<'_, T> {
        let mask = Mask::acquire();
        Guard {
            value: self.value.borrow_mut(),
            _mask: mask,
        }
    }
}

/// Exclusive access to a [`Shared`] value
///
/// Interrupts stay masked until the guard drops.
pub struct Guard<'a, T> {
    // Released before the mask.
    value: RefMut<'a, T>,
    _mask: Mask,
}

impl<T> Deref for Guard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Guard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
