//! A simulated controller, for testing the transfer engine on the host

use std::{cell::RefCell, collections::HashMap};

use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

use crate::{
    backend::{BusEvents, Faults, Interrupts, Retired},
    endpoint::index,
    Chunk, Error, Speed, TransferBackend,
};

#[derive(Default)]
struct Endpoint {
    open: bool,
    stalled: bool,
    /// Every chunk ever armed
    armed: Vec<Chunk>,
    /// The window that the hardware holds
    window: Vec<Chunk>,
    /// Bytes taken from IN chunks
    sent: Vec<u8>,
    /// The next OUT packet
    staged: Option<Vec<u8>>,
}

struct Inner {
    endpoint_count: usize,
    chunk_limit: Option<usize>,
    ring_depth: usize,
    granule: usize,
    attached: Option<Speed>,
    speed: Option<Speed>,
    address: Option<u8>,
    setup: [u8; 8],
    pending: Interrupts,
    endpoints: HashMap<usize, Endpoint>,
    aborts: Vec<EndpointAddress>,
    cleared: Vec<EndpointAddress>,
    fail_aborts: bool,
    bus_resets: usize,
}

pub struct Sim {
    inner: RefCell<Inner>,
}

impl Sim {
    pub fn new() -> Self {
        Sim {
            inner: RefCell::new(Inner {
                endpoint_count: 16,
                chunk_limit: None,
                ring_depth: 1,
                granule: 1,
                attached: None,
                speed: None,
                address: None,
                setup: [0; 8],
                pending: Interrupts::default(),
                endpoints: HashMap::new(),
                aborts: Vec::new(),
                cleared: Vec::new(),
                fail_aborts: false,
                bus_resets: 0,
            }),
        }
    }

    pub fn with_endpoint_count(self, count: usize) -> Self {
        self.inner.borrow_mut().endpoint_count = count;
        self
    }

    /// Chunks of `chunk_limit` bytes, `depth` per window
    pub fn with_ring(self, chunk_limit: usize, depth: usize) -> Self {
        {
            let mut inner = self.inner.borrow_mut();
            inner.chunk_limit = Some(chunk_limit);
            inner.ring_depth = depth;
        }
        self
    }

    pub fn with_granule(self, granule: usize) -> Self {
        self.inner.borrow_mut().granule = granule;
        self
    }

    fn endpoint<R>(&self, addr: EndpointAddress, f: impl FnOnce(&mut Endpoint) -> R) -> R {
        f(self
            .inner
            .borrow_mut()
            .endpoints
            .entry(index(addr))
            .or_default())
    }

    pub fn raise(&self, events: BusEvents) {
        self.inner.borrow_mut().pending.events |= events;
    }

    pub fn fault(&self, faults: Faults) {
        self.inner.borrow_mut().pending.faults |= faults;
    }

    pub fn setup(&self, packet: [u8; 8]) {
        self.inner.borrow_mut().setup = packet;
        self.raise(BusEvents::SETUP);
    }

    /// Signal completion of the endpoint's window
    pub fn complete(&self, addr: EndpointAddress) {
        self.inner.borrow_mut().pending.complete |= 1 << index(addr);
    }

    /// Deliver one OUT packet
    pub fn receive(&self, addr: EndpointAddress, packet: &[u8]) {
        self.endpoint(addr, |ep| ep.staged = Some(packet.to_vec()));
        self.complete(addr);
    }

    pub fn set_speed(&self, speed: Option<Speed>) {
        self.inner.borrow_mut().speed = speed;
    }

    pub fn fail_aborts(&self) {
        self.inner.borrow_mut().fail_aborts = true;
    }

    pub fn armed(&self, addr: EndpointAddress) -> Vec<Chunk> {
        self.endpoint(addr, |ep| ep.armed.clone())
    }

    pub fn sent(&self, addr: EndpointAddress) -> Vec<u8> {
        self.endpoint(addr, |ep| ep.sent.clone())
    }

    pub fn is_open(&self, addr: EndpointAddress) -> bool {
        self.endpoint(addr, |ep| ep.open)
    }

    pub fn attached(&self) -> Option<Speed> {
        self.inner.borrow().attached
    }

    pub fn address(&self) -> Option<u8> {
        self.inner.borrow().address
    }

    pub fn aborts(&self) -> Vec<EndpointAddress> {
        self.inner.borrow().aborts.clone()
    }

    pub fn cleared(&self) -> Vec<EndpointAddress> {
        self.inner.borrow().cleared.clone()
    }

    pub fn bus_resets(&self) -> usize {
        self.inner.borrow().bus_resets
    }
}

impl TransferBackend for Sim {
    fn endpoint_count(&self) -> usize {
        self.inner.borrow().endpoint_count
    }

    fn chunk_limit(&self, _: EndpointAddress, max_packet_size: usize) -> usize {
        self.inner.borrow().chunk_limit.unwrap_or(max_packet_size)
    }

    fn ring_depth(&self) -> usize {
        self.inner.borrow().ring_depth
    }

    fn out_granule(&self) -> usize {
        self.inner.borrow().granule
    }

    fn attach(&self, speed: Speed) -> Result<(), Error> {
        if Speed::Low == speed {
            return Err(Error::NotSupported);
        }
        self.inner.borrow_mut().attached = Some(speed);
        Ok(())
    }

    fn detach(&self) {
        self.inner.borrow_mut().attached = None;
    }

    fn open_endpoint(&self, addr: EndpointAddress, _: EndpointType, _: usize) -> Result<(), Error> {
        self.endpoint(addr, |ep| {
            ep.open = true;
            ep.window.clear();
        });
        Ok(())
    }

    fn close_endpoint(&self, addr: EndpointAddress) {
        self.endpoint(addr, |ep| ep.open = false);
    }

    unsafe fn arm_chunk(&self, addr: EndpointAddress, chunk: &Chunk, data: &mut [u8]) {
        self.endpoint(addr, |ep| {
            assert!(ep.open, "armed a closed endpoint");
            if UsbDirection::In == addr.direction() {
                ep.sent.extend_from_slice(data);
            }
            ep.armed.push(*chunk);
            ep.window.push(*chunk);
        });
    }

    fn prime(&self, addr: EndpointAddress) {
        self.endpoint(addr, |ep| {
            assert!(ep.window.last().is_some_and(|chunk| chunk.interrupt));
        });
    }

    fn retire(&self, addr: EndpointAddress, data: &mut [u8]) -> Retired {
        self.endpoint(addr, |ep| {
            let capacity: usize = ep.window.drain(..).map(|chunk| chunk.len).sum();
            let remaining = match ep.staged.take() {
                Some(packet) => {
                    let copied = packet.len().min(data.len());
                    data[..copied].copy_from_slice(&packet[..copied]);
                    capacity.saturating_sub(packet.len())
                }
                None => 0,
            };
            Retired {
                remaining,
                faults: Faults::empty(),
            }
        })
    }

    fn abort(&self, addr: EndpointAddress) -> Result<(), Error> {
        self.endpoint(addr, |ep| {
            ep.window.clear();
            ep.staged = None;
        });
        let mut inner = self.inner.borrow_mut();
        inner.aborts.push(addr);
        // A detached controller never finishes the abort handshake.
        if inner.fail_aborts || inner.attached.is_none() {
            Err(Error::Hardware)
        } else {
            Ok(())
        }
    }

    fn poll(&self) -> Interrupts {
        core::mem::take(&mut self.inner.borrow_mut().pending)
    }

    fn clear_complete(&self, addr: EndpointAddress) {
        self.inner.borrow_mut().cleared.push(addr);
    }

    fn read_setup(&self) -> Result<[u8; 8], Error> {
        Ok(self.inner.borrow().setup)
    }

    fn set_stalled(&self, addr: EndpointAddress, stalled: bool) {
        self.endpoint(addr, |ep| ep.stalled = stalled);
    }

    fn is_stalled(&self, addr: EndpointAddress) -> bool {
        self.endpoint(addr, |ep| ep.stalled)
    }

    fn set_address(&self, address: u8) {
        self.inner.borrow_mut().address = Some(address);
    }

    fn speed(&self) -> Option<Speed> {
        self.inner.borrow().speed
    }

    fn bus_reset(&self) -> Result<(), Error> {
        let mut inner = self.inner.borrow_mut();
        inner.bus_resets += 1;
        for ep in inner.endpoints.values_mut() {
            ep.window.clear();
            ep.staged = None;
        }
        Ok(())
    }
}
