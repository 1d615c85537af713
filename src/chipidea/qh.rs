//! Endpoint Queue Head (QH)

#![allow(non_snake_case, non_upper_case_globals)]

use super::{ral, td::Td};
use crate::{cache, vcell::VCell};

#[repr(C, align(64))]
pub struct Qh {
    CAPABILITIES: VCell<u32>,
    _current_td_pointer: u32,
    overlay: Td,
    setup: VCell<u64>,
}

const _: [(); 1] = [(); (core::mem::size_of::<Qh>() == 64) as usize];

mod CAPABILITIES {
    fields! {
        IOS: 15, 1;
        MAXIMUM_PACKET_LENGTH: 16, 11;
        ZLT: 29, 1;
    }
}

impl Qh {
    /// Create a new QH, setting all bits to zero
    pub const fn new() -> Self {
        Qh {
            CAPABILITIES: VCell::new(0),
            _current_td_pointer: 0,
            overlay: Td::new(),
            setup: VCell::new(0),
        }
    }

    /// Prepare the QH for a newly opened endpoint
    ///
    /// Clamps `max_packet_len` to 1024. The controller never appends its
    /// own zero length packets; the transfer engine decides when a
    /// transfer ends. Control OUT queue heads interrupt on SETUP.
    pub fn configure(&mut self, max_packet_len: usize, interrupt_on_setup: bool) {
        ral::write_reg!(
            super::qh,
            self,
            CAPABILITIES,
            MAXIMUM_PACKET_LENGTH: max_packet_len.min(1024) as u32,
            ZLT: 1,
            IOS: interrupt_on_setup as u32
        );
        self.overlay.set_terminate();
        self.overlay.clear_status();
    }

    /// Returns the maximum packet length
    pub fn max_packet_len(&self) -> usize {
        ral::read_reg!(super::qh, self, CAPABILITIES, MAXIMUM_PACKET_LENGTH) as usize
    }

    /// Read the value from the setup buffer
    ///
    /// Caller is responsible for managing the setup tripwire.
    #[inline(always)]
    pub fn setup(&self) -> u64 {
        self.setup.read()
    }

    /// Returns the next TD overlay
    pub fn overlay_mut(&mut self) -> &mut Td {
        &mut self.overlay
    }

    /// Clean and invalidate this QH from DCache
    pub fn clean_invalidate_dcache(&self) {
        cache::clean_invalidate(self);
    }

    #[cfg(test)]
    pub fn set_setup(&self, setup: u64) {
        self.setup.write(setup);
    }
}

#[cfg(test)]
mod test {
    use super::Qh;

    #[test]
    fn configure_control() {
        let mut qh = Qh::new();
        qh.configure(64, true);
        assert_eq!(qh.max_packet_len(), 64);
        assert_eq!(qh.CAPABILITIES.read(), (1 << 29) | (64 << 16) | (1 << 15));
    }

    #[test]
    fn max_packet_len_is_clamped() {
        let mut qh = Qh::new();
        qh.configure(4096, false);
        assert_eq!(qh.max_packet_len(), 1024);
    }

    #[test]
    fn configure_terminates_overlay() {
        let mut qh = Qh::new();
        qh.overlay_mut().set_active();
        qh.configure(512, false);
        assert!(qh.overlay_mut().status().is_empty());
        assert_eq!(qh.overlay_mut().next(), 1);
    }
}
