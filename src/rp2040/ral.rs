//! RP2040 USB controller registers, and its packet RAM

#![allow(non_snake_case, non_upper_case_globals)]

pub use crate::ral::*;

use crate::vcell::VCell;

/// USBCTRL_REGS, device mode
pub mod usbctrl {
    use super::RWRegister;

    #[repr(C)]
    pub struct RegisterBlock {
        pub ADDR_ENDP: RWRegister<u32>,
        _reserved0: [u32; 15],
        pub MAIN_CTRL: RWRegister<u32>,
        _reserved1: [u32; 2],
        pub SIE_CTRL: RWRegister<u32>,
        pub SIE_STATUS: RWRegister<u32>,
        _reserved2: u32,
        pub BUFF_STATUS: RWRegister<u32>,
        _reserved3: u32,
        pub EP_ABORT: RWRegister<u32>,
        pub EP_ABORT_DONE: RWRegister<u32>,
        pub EP_STALL_ARM: RWRegister<u32>,
        _reserved4: [u32; 2],
        pub USB_MUXING: RWRegister<u32>,
        pub USB_PWR: RWRegister<u32>,
        _reserved5: [u32; 5],
        pub INTE: RWRegister<u32>,
        pub INTF: RWRegister<u32>,
        pub INTS: RWRegister<u32>,
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x9C) as usize];

    pub mod ADDR_ENDP {
        fields! {
            ADDRESS: 0, 7;
        }
    }

    pub mod MAIN_CTRL {
        fields! {
            CONTROLLER_EN: 0, 1;
            HOST_NDEVICE: 1, 1;
        }
    }

    pub mod SIE_CTRL {
        fields! {
            PULLUP_EN: 16, 1;
            EP0_INT_1BUF: 29, 1;
        }
    }

    pub mod SIE_STATUS {
        fields! {
            SUSPENDED: 4, 1;
            SPEED: 8, 2;
            RESUME: 11, 1;
            CONNECTED: 16, 1;
            SETUP_REC: 17, 1;
            BUS_RESET: 19, 1;
            CRC_ERROR: 24, 1;
            BIT_STUFF_ERROR: 25, 1;
            RX_OVERFLOW: 26, 1;
            RX_TIMEOUT: 27, 1;
            DATA_SEQ_ERROR: 31, 1;
        }
    }

    pub mod EP_STALL_ARM {
        fields! {
            EP0_IN: 0, 1;
            EP0_OUT: 1, 1;
        }
    }

    pub mod USB_MUXING {
        fields! {
            TO_PHY: 0, 1;
            SOFTCON: 3, 1;
        }
    }

    pub mod USB_PWR {
        fields! {
            VBUS_DETECT: 2, 1;
            VBUS_DETECT_OVERRIDE_EN: 3, 1;
        }
    }

    pub mod INTE {
        fields! {
            BUFF_STATUS: 4, 1;
            ERROR_DATA_SEQ: 5, 1;
            ERROR_RX_TIMEOUT: 6, 1;
            ERROR_RX_OVERFLOW: 7, 1;
            ERROR_BIT_STUFF: 8, 1;
            ERROR_CRC: 9, 1;
            BUS_RESET: 12, 1;
            DEV_CONN_DIS: 13, 1;
            DEV_SUSPEND: 14, 1;
            DEV_RESUME_FROM_HOST: 15, 1;
            SETUP_REQ: 16, 1;
        }
    }

    pub mod INTS {
        pub use super::INTE::*;
    }
}

/// Dual-port packet RAM
///
/// Endpoint 0 has no endpoint control register. Its single buffer sits
/// at [`EP0_BUFFER`], shared by both directions.
#[repr(C)]
pub struct Dpram {
    pub SETUP: [VCell<u8>; 8],
    /// Endpoints 1 through 15; IN then OUT
    pub EP_CONTROL: [VCell<u32>; 30],
    /// Endpoints 0 through 15; IN then OUT
    pub EP_BUFFER_CONTROL: [VCell<u32>; 32],
    /// Everything from [`EP0_BUFFER`] to the end of the RAM
    pub BUFFERS: [VCell<u8>; DPRAM_SIZE - EP0_BUFFER],
}

/// Packet RAM size
pub const DPRAM_SIZE: usize = 0x1000;
/// Offset of the endpoint 0 buffer
pub const EP0_BUFFER: usize = 0x100;

const _: [(); 1] = [(); (core::mem::size_of::<Dpram>() == DPRAM_SIZE) as usize];

/// EP_CONTROL for one endpoint
pub mod ep_control {
    use super::VCell;

    pub struct EpControl<'a> {
        pub EP_CONTROL: &'a VCell<u32>,
    }

    pub mod EP_CONTROL {
        fields! {
            BUFFER_ADDRESS: 0, 16;
            ENDPOINT_TYPE: 26, 2;
            INTERRUPT_PER_BUFF: 29, 1;
            ENABLE: 31, 1;
        }
    }
}

/// EP_BUFFER_CONTROL for one endpoint, single buffered
pub mod buffer_control {
    use super::VCell;

    pub struct BufferControl<'a> {
        pub BUFFER_CONTROL: &'a VCell<u32>,
    }

    pub mod BUFFER_CONTROL {
        fields! {
            LENGTH: 0, 10;
            AVAILABLE: 10, 1;
            STALL: 11, 1;
            PID: 13, 1;
            LAST: 14, 1;
            FULL: 15, 1;
        }
    }
}

/// Position of an endpoint direction within the DPRAM control arrays
fn slot(index: usize, out: bool) -> usize {
    index * 2 + out as usize
}

impl Dpram {
    /// Caller must make sure that `index` is between 1 and 15.
    pub fn ep_control(&self, index: usize, out: bool) -> ep_control::EpControl<'_> {
        ep_control::EpControl {
            EP_CONTROL: &self.EP_CONTROL[slot(index - 1, out)],
        }
    }

    /// Caller must make sure that `index` is less than 16.
    pub fn buffer_control(&self, index: usize, out: bool) -> buffer_control::BufferControl<'_> {
        buffer_control::BufferControl {
            BUFFER_CONTROL: &self.EP_BUFFER_CONTROL[slot(index, out)],
        }
    }

    /// `len` bytes of packet RAM at DPRAM offset `offset`
    pub fn buffer(&self, offset: usize, len: usize) -> &[VCell<u8>] {
        &self.BUFFERS[offset - EP0_BUFFER..][..len]
    }
}
