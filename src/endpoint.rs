//! The endpoint table

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use crate::{transfer::Transfer, Error, MAX_ENDPOINTS};

/// Records in the table; one per endpoint direction
pub const RECORD_COUNT: usize = MAX_ENDPOINTS * 2;

pub fn ep0_out() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

pub fn ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}

/// Produces an index into the endpoint records
///
/// Even indices are OUT, odd indices are IN. This also numbers the
/// bits of [`Interrupts::complete`](crate::Interrupts::complete).
pub fn index(addr: EndpointAddress) -> usize {
    (addr.index() * 2) + (UsbDirection::In == addr.direction()) as usize
}

/// The inverse of [`index`]
pub fn address(index: usize) -> EndpointAddress {
    let direction = if index % 2 == 1 {
        UsbDirection::In
    } else {
        UsbDirection::Out
    };
    EndpointAddress::from_parts(index / 2, direction)
}

/// An open endpoint direction
#[derive(Debug)]
pub struct Record {
    pub kind: EndpointType,
    pub max_packet_size: usize,
    pub transfer: Option<Transfer>,
}

/// Control endpoint 0 state that outlives a single transfer
#[derive(Debug, Default)]
pub struct ControlState {
    /// Applied once the next EP0 IN transfer finishes
    pub pending_address: Option<u8>,
    /// A SETUP packet that arrived with no EP0 OUT read in flight
    pub setup: Option<[u8; 8]>,
}

impl ControlState {
    pub const fn new() -> Self {
        ControlState {
            pending_address: None,
            setup: None,
        }
    }
}

pub struct EndpointTable {
    records: [Option<Record>; RECORD_COUNT],
}

impl EndpointTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Record> = None;
        EndpointTable {
            records: [EMPTY; RECORD_COUNT],
        }
    }

    pub fn insert(
        &mut self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet_size: usize,
    ) -> Result<(), Error> {
        let slot = self
            .records
            .get_mut(index(addr))
            .ok_or(Error::InvalidParams)?;
        if slot.is_some() {
            return Err(Error::AlreadyConfigured);
        }
        *slot = Some(Record {
            kind,
            max_packet_size,
            transfer: None,
        });
        Ok(())
    }

    pub fn remove(&mut self, addr: EndpointAddress) -> Result<Record, Error> {
        self.records
            .get_mut(index(addr))
            .and_then(Option::take)
            .ok_or(Error::NotConfigured)
    }

    pub fn get_mut(&mut self, addr: EndpointAddress) -> Option<&mut Record> {
        self.records.get_mut(index(addr))?.as_mut()
    }

    pub fn is_open(&self, addr: EndpointAddress) -> bool {
        matches!(self.records.get(index(addr)), Some(Some(_)))
    }

    /// Number of transfers in flight
    pub fn in_flight(&self) -> usize {
        self.records
            .iter()
            .flatten()
            .filter(|record| record.transfer.is_some())
            .count()
    }

    /// Remove every record
    pub fn drain(&mut self) -> impl Iterator<Item = (EndpointAddress, Record)> + '_ {
        self.records
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| Some((address(idx), slot.take()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::{address, ep0_in, ep0_out, index, EndpointTable};
    use crate::{transfer::Transfer, Connection, Error};
    use usb_device::{
        endpoint::{EndpointAddress, EndpointType},
        UsbDirection,
    };

    #[test]
    fn index_round_trip() {
        assert_eq!(index(ep0_out()), 0);
        assert_eq!(index(ep0_in()), 1);
        let ep3_in = EndpointAddress::from(0x83);
        assert_eq!(index(ep3_in), 7);
        assert_eq!(address(7), ep3_in);
        assert_eq!(address(6).direction(), UsbDirection::Out);
    }

    #[test]
    fn double_insert() {
        let mut table = EndpointTable::new();
        table.insert(ep0_out(), EndpointType::Control, 64).unwrap();
        assert_eq!(
            table.insert(ep0_out(), EndpointType::Control, 64),
            Err(Error::AlreadyConfigured)
        );
        assert!(!table.is_open(ep0_in()));
    }

    #[test]
    fn remove_absent() {
        let mut table = EndpointTable::new();
        assert!(matches!(table.remove(ep0_in()), Err(Error::NotConfigured)));
    }

    #[test]
    fn out_of_range() {
        let mut table = EndpointTable::new();
        let ep = EndpointAddress::from_parts(20, UsbDirection::Out);
        assert_eq!(
            table.insert(ep, EndpointType::Bulk, 64),
            Err(Error::InvalidParams)
        );
    }

    #[test]
    fn drain_takes_everything() {
        let mut table = EndpointTable::new();
        table.insert(ep0_out(), EndpointType::Control, 64).unwrap();
        table.insert(ep0_in(), EndpointType::Control, 64).unwrap();
        let buffer = Box::leak(vec![0; 8].into_boxed_slice());
        table.get_mut(ep0_in()).unwrap().transfer = Some(Transfer::new(Connection(1), buffer, 8));
        assert_eq!(table.in_flight(), 1);

        let drained: Vec<_> = table.drain().map(|(addr, _)| addr).collect();
        assert_eq!(drained, [ep0_out(), ep0_in()]);
        assert!(!table.is_open(ep0_out()));
        assert_eq!(table.in_flight(), 0);
    }
}
