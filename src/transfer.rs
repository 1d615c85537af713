//! Transfer requests and their byte accounting

use usb_device::endpoint::EndpointAddress;

use crate::Error;

/// Identifies the session that receives a completion, or a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Connection(pub u32);

/// The outcome of a read or write request
///
/// Every accepted request produces exactly one completion. The buffer
/// always comes back to the requester.
#[derive(Debug)]
pub struct Completion {
    pub endpoint: EndpointAddress,
    pub connection: Connection,
    pub buffer: &'static mut [u8],
    /// Bytes transferred, or why the transfer didn't finish
    pub result: Result<usize, Error>,
}

/// A read or write request that the driver didn't accept
///
/// Carries the buffer back to the requester.
#[derive(Debug)]
pub struct Refused {
    pub error: Error,
    pub buffer: &'static mut [u8],
}

/// What to do after a window retires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Arm the next window
    Continue,
    /// The transfer is finished
    Done,
}

/// An in-flight transfer
#[derive(Debug)]
pub struct Transfer {
    pub connection: Connection,
    pub buffer: &'static mut [u8],
    pub requested: usize,
    /// Bytes confirmed by retired windows
    pub transferred: usize,
    /// Capacity of the window that the hardware holds
    pub armed: usize,
}

impl Transfer {
    pub fn new(connection: Connection, buffer: &'static mut [u8], requested: usize) -> Self {
        Transfer {
            connection,
            buffer,
            requested,
            transferred: 0,
            armed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.requested - self.transferred
    }

    /// The buffer span covered by the armed window
    pub fn window_mut(&mut self) -> &mut [u8] {
        let start = self.transferred.min(self.buffer.len());
        let end = (self.transferred + self.armed).min(self.buffer.len());
        &mut self.buffer[start..end]
    }

    /// Account for a retired OUT chunk
    ///
    /// `unused` is the capacity the hardware didn't fill. A packet
    /// shorter than `max_packet_size` ends the transfer.
    pub fn out_retired(&mut self, unused: usize, max_packet_size: usize) -> Progress {
        let received = self.armed.saturating_sub(unused);
        self.transferred += received.min(self.remaining());
        self.armed = 0;

        if self.transferred >= self.requested || received < max_packet_size {
            Progress::Done
        } else {
            Progress::Continue
        }
    }

    /// Account for a retired IN window
    pub fn in_retired(&mut self) -> Progress {
        self.transferred += self.armed;
        self.armed = 0;

        if self.transferred >= self.requested {
            Progress::Done
        } else {
            Progress::Continue
        }
    }

    pub fn complete(self, endpoint: EndpointAddress, result: Result<usize, Error>) -> Completion {
        Completion {
            endpoint,
            connection: self.connection,
            buffer: self.buffer,
            result,
        }
    }
}
