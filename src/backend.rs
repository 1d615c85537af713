//! The hardware seam of the transfer engine

use bitflags::bitflags;
use usb_device::endpoint::{EndpointAddress, EndpointType};

use crate::{Chunk, Error, Speed};

bitflags! {
    /// Bus-level events observed by [`TransferBackend::poll`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BusEvents : u32 {
        /// The host reset the bus
        const RESET = 1 << 0;
        /// The bus went idle
        const SUSPEND = 1 << 1;
        /// Connection, speed, or resume change on the port
        const PORT_CHANGE = 1 << 2;
        /// A SETUP packet arrived on endpoint 0
        const SETUP = 1 << 3;
    }
}

bitflags! {
    /// Hardware errors
    ///
    /// Only logged. They never complete a transfer on their own.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Faults : u32 {
        const BABBLE = 1 << 0;
        const TIMEOUT = 1 << 1;
        const CRC = 1 << 2;
        const BUFFER = 1 << 3;
        const TRANSACTION = 1 << 4;
        const HALTED = 1 << 5;
        const BIT_STUFF = 1 << 6;
        const DATA_SEQUENCE = 1 << 7;
    }
}

/// One snapshot of the interrupt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interrupts {
    pub events: BusEvents,
    pub faults: Faults,
    /// Completed endpoints
    ///
    /// Bit `n * 2` is endpoint `n` OUT, and bit `n * 2 + 1` is endpoint
    /// `n` IN.
    pub complete: u32,
}

/// What the hardware reports when a window retires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Retired {
    /// Declared capacity that the hardware didn't use
    pub remaining: usize,
    pub faults: Faults,
}

/// A USB device controller, as seen by the transfer engine
///
/// All methods take `&self`. The [`Controller`](crate::Controller)
/// serializes calls that touch an endpoint's descriptors; implementations
/// may rely on that, and not synchronize internally.
pub trait TransferBackend {
    /// Number of endpoint numbers the hardware supports
    fn endpoint_count(&self) -> usize;
    /// Largest chunk that one descriptor can move for this endpoint
    fn chunk_limit(&self, addr: EndpointAddress, max_packet_size: usize) -> usize;
    /// How many chunks may be armed before the hardware interrupts
    fn ring_depth(&self) -> usize {
        1
    }
    /// OUT capacities are rounded up to a multiple of this many bytes
    fn out_granule(&self) -> usize {
        1
    }

    /// Bring up the controller, and connect to the bus
    fn attach(&self, speed: Speed) -> Result<(), Error>;
    /// Disconnect from the bus, and mask all interrupts
    fn detach(&self);

    /// Configure the endpoint, and enable its completion interrupt
    fn open_endpoint(
        &self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet_size: usize,
    ) -> Result<(), Error>;
    /// Disable the endpoint
    fn close_endpoint(&self, addr: EndpointAddress);

    /// Append `chunk` to the endpoint's next window
    ///
    /// `data` is the chunk's span of the transfer buffer. For IN endpoints,
    /// it holds the bytes to send.
    ///
    /// # Safety
    ///
    /// The backend may hand `data` to a DMA engine. Caller must keep
    /// `data` alive, and must not touch it, until the window is retired,
    /// or until the endpoint is aborted or reset.
    unsafe fn arm_chunk(&self, addr: EndpointAddress, chunk: &Chunk, data: &mut [u8]);
    /// Hand the armed window to the hardware
    fn prime(&self, addr: EndpointAddress);
    /// Collect the results of a finished window
    ///
    /// For OUT endpoints, the received bytes land in `data`; the backend
    /// never writes beyond `data`.
    fn retire(&self, addr: EndpointAddress, data: &mut [u8]) -> Retired;
    /// Stop the endpoint's pipeline, and forget any armed window
    ///
    /// Resets the data toggle.
    fn abort(&self, addr: EndpointAddress) -> Result<(), Error>;

    /// Read and acknowledge the interrupt status
    fn poll(&self) -> Interrupts;
    /// Acknowledge the completion for `addr`
    fn clear_complete(&self, addr: EndpointAddress);
    /// Read the last SETUP packet received on endpoint 0
    fn read_setup(&self) -> Result<[u8; 8], Error>;

    fn set_stalled(&self, addr: EndpointAddress, stalled: bool);
    fn is_stalled(&self, addr: EndpointAddress) -> bool;

    /// Apply a device address, effective immediately
    fn set_address(&self, address: u8);
    /// The negotiated bus speed, if known
    fn speed(&self) -> Option<Speed>;
    /// Return every endpoint pipeline to its reset state
    ///
    /// Called from interrupt context, after the host resets the bus.
    fn bus_reset(&self) -> Result<(), Error>;
    /// Enter a USB 2.0 test mode
    fn set_test_mode(&self, mode: u8) -> Result<(), Error> {
        let _ = mode;
        Err(Error::NotSupported)
    }
}
