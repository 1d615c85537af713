//! ChipIdea core and PHY registers

#![allow(non_snake_case, non_upper_case_globals)]

pub use crate::ral::*;

/// USB core registers, device mode
pub mod usb {
    use super::RWRegister;

    #[repr(C)]
    pub struct RegisterBlock {
        _reserved0: [u32; 80],
        pub USBCMD: RWRegister<u32>,
        pub USBSTS: RWRegister<u32>,
        pub USBINTR: RWRegister<u32>,
        pub FRINDEX: RWRegister<u32>,
        _reserved1: u32,
        pub DEVICEADDR: RWRegister<u32>,
        pub ENDPTLISTADDR: RWRegister<u32>,
        _reserved2: [u32; 7],
        pub ENDPTNAK: RWRegister<u32>,
        pub ENDPTNAKEN: RWRegister<u32>,
        _reserved3: u32,
        pub PORTSC1: RWRegister<u32>,
        _reserved4: [u32; 8],
        pub USBMODE: RWRegister<u32>,
        pub ENDPTSETUPSTAT: RWRegister<u32>,
        pub ENDPTPRIME: RWRegister<u32>,
        pub ENDPTFLUSH: RWRegister<u32>,
        pub ENDPTSTAT: RWRegister<u32>,
        pub ENDPTCOMPLETE: RWRegister<u32>,
        pub ENDPTCTRL: [RWRegister<u32>; 8],
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x1E0) as usize];

    pub mod USBCMD {
        fields! {
            RS: 0, 1;
            RST: 1, 1;
            SUTW: 13, 1;
            ITC: 16, 8;
        }
    }

    pub mod USBSTS {
        fields! {
            UI: 0, 1;
            UEI: 1, 1;
            PCI: 2, 1;
            URI: 6, 1;
            SLI: 8, 1;
        }
    }

    pub mod USBINTR {
        fields! {
            UE: 0, 1;
            UEE: 1, 1;
            PCE: 2, 1;
            URE: 6, 1;
            SLE: 8, 1;
        }
    }

    pub mod DEVICEADDR {
        fields! {
            USBADRA: 24, 1;
            USBADR: 25, 7;
        }
    }

    pub mod PORTSC1 {
        fields! {
            PTC: 16, 4;
            PFSC: 24, 1;
            PSPD: 26, 2;
        }
    }

    pub mod USBMODE {
        fields! {
            CM: 0, 2;
            SLOM: 3, 1;
        }
    }

    pub mod ENDPTCOMPLETE {
        fields! {
            ERCE: 0, 16;
            ETCE: 16, 16;
        }
    }
}

/// The RAL API requires us to treat all endpoint control registers as unique.
/// We can make it a little easier with this function, the `EndptCtrl` type,
/// and the field module.
pub mod endpoint_control {
    use super::{usb, RWRegister};

    pub struct EndptCtrl<'a> {
        pub ENDPTCTRL: &'a RWRegister<u32>,
    }

    pub mod ENDPTCTRL {
        fields! {
            RXS: 0, 1;
            RXT: 2, 2;
            RXR: 6, 1;
            RXE: 7, 1;
            TXS: 16, 1;
            TXT: 18, 2;
            TXR: 22, 1;
            TXE: 23, 1;
        }
    }

    /// Caller must make sure that `endpoint` is less than 8.
    pub fn register(usb: &usb::RegisterBlock, endpoint: usize) -> EndptCtrl<'_> {
        EndptCtrl {
            ENDPTCTRL: &usb.ENDPTCTRL[endpoint],
        }
    }
}

/// USB PHY registers
pub mod usbphy {
    use super::RWRegister;

    #[repr(C)]
    pub struct RegisterBlock {
        pub PWD: RWRegister<u32>,
        _reserved0: [u32; 11],
        pub CTRL: RWRegister<u32>,
        pub CTRL_SET: RWRegister<u32>,
        pub CTRL_CLR: RWRegister<u32>,
    }

    const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x3C) as usize];

    pub mod CTRL_SET {
        fields! {
            CLKGATE: 30, 1;
            SFTRST: 31, 1;
        }
    }

    pub mod CTRL_CLR {
        pub use super::CTRL_SET::*;
    }
}
