//! Request routing
//!
//! The transport hands each inbound request to a [`Dispatcher`], which
//! routes it to the port and endpoint that the request's [`Target`] names.
//! Read and write requests are answered with [`Reply::Queued`]; their
//! results come out of [`Dispatcher::poll_outbox`] later, along with
//! bus notifications. Everything else is answered right away.
//!
//! ```
//! use usbdc::dispatch::Target;
//! use usb_device::{endpoint::EndpointAddress, UsbDirection};
//!
//! let ep1_in = EndpointAddress::from_parts(1, UsbDirection::In);
//! assert_eq!(Target::endpoint(2, ep1_in).raw(), 0x0281);
//! assert_eq!(Target::device(2).raw(), 0x02FF);
//! ```

use usb_device::endpoint::{EndpointAddress, EndpointType};

use crate::{
    Completion, Connection, Controller, Error, Notification, Refused, Speed, TransferBackend,
};

/// Low byte of a target that names the device itself
const DEVICE: u8 = 0xFF;

/// Endpoint address bits that USB leaves reserved
const RESERVED_ADDRESS_BITS: u8 = 0x70;

/// A port, and either an endpoint direction or the device
///
/// The high byte is the port. The low byte is a USB endpoint address
/// (direction in bit 7), or `0xFF` for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Target(u16);

/// What a [`Target`] names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Object {
    Device,
    Endpoint(EndpointAddress),
}

impl Target {
    pub const fn device(port: u8) -> Self {
        Target(((port as u16) << 8) | DEVICE as u16)
    }

    pub fn endpoint(port: u8, addr: EndpointAddress) -> Self {
        Target(((port as u16) << 8) | u8::from(addr) as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Target(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn port(self) -> usize {
        (self.0 >> 8) as usize
    }

    pub fn decode(self) -> Result<Object, Error> {
        match self.0 as u8 {
            DEVICE => Ok(Object::Device),
            low if low & RESERVED_ADDRESS_BITS != 0 => Err(Error::InvalidParams),
            low => Ok(Object::Endpoint(EndpointAddress::from(low))),
        }
    }
}

/// Arguments of an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenParams {
    /// Open the device; notifications go to `consumer`
    Device { consumer: Connection, speed: Speed },
    Endpoint {
        kind: EndpointType,
        max_packet_size: usize,
    },
}

/// An inbound request
#[derive(Debug)]
pub enum Request {
    Open {
        target: Target,
        params: OpenParams,
    },
    Close {
        target: Target,
    },
    Flush {
        target: Target,
    },
    /// Receive up to `len` bytes into `buffer`
    Read {
        target: Target,
        connection: Connection,
        buffer: &'static mut [u8],
        len: usize,
    },
    /// Send all of `buffer`
    Write {
        target: Target,
        connection: Connection,
        buffer: &'static mut [u8],
    },
    SetStall {
        target: Target,
    },
    ClearStall {
        target: Target,
    },
    IsStall {
        target: Target,
    },
    GetSpeed {
        target: Target,
    },
    SetAddress {
        target: Target,
        address: u8,
    },
    SetTestMode {
        target: Target,
        mode: u8,
    },
    /// Collect a pending notification, or wait for the next one
    Sync {
        target: Target,
    },
}

/// The immediate answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Done,
    /// The transfer was accepted; its completion comes later
    Queued,
    Speed(Option<Speed>),
    Stalled(bool),
    Notification(Notification),
    /// Nothing pending; the next notification comes later
    Pending,
}

/// A failed request
///
/// Read and write requests carry their buffer back.
#[derive(Debug)]
pub struct Rejected {
    pub error: Error,
    pub buffer: Option<&'static mut [u8]>,
}

impl From<Error> for Rejected {
    fn from(error: Error) -> Self {
        Rejected {
            error,
            buffer: None,
        }
    }
}

impl From<Refused> for Rejected {
    fn from(refused: Refused) -> Self {
        Rejected {
            error: refused.error,
            buffer: Some(refused.buffer),
        }
    }
}

/// Something for the transport to deliver
#[derive(Debug)]
pub enum Outgoing {
    Completion {
        target: Target,
        completion: Completion,
    },
    Notification {
        target: Target,
        connection: Connection,
        notification: Notification,
    },
}

/// Routes requests to the controllers of each port
///
/// Port `n` is `ports[n]`.
pub struct Dispatcher<'a, B> {
    ports: &'a [Controller<B>],
}

impl<'a, B: TransferBackend> Dispatcher<'a, B> {
    pub fn new(ports: &'a [Controller<B>]) -> Self {
        Dispatcher { ports }
    }

    pub fn dispatch(&self, request: Request) -> Result<Reply, Rejected> {
        match request {
            Request::Open { target, params } => {
                match (target.decode()?, params) {
                    (Object::Device, OpenParams::Device { consumer, speed }) => {
                        self.port(target)?.open_device(consumer, speed)?
                    }
                    (
                        Object::Endpoint(_),
                        OpenParams::Endpoint {
                            kind,
                            max_packet_size,
                        },
                    ) => {
                        let (port, addr) = self.endpoint(target)?;
                        port.open_endpoint(addr, kind, max_packet_size)?
                    }
                    _ => return Err(Error::InvalidParams.into()),
                }
                Ok(Reply::Done)
            }
            Request::Close { target } => {
                match target.decode()? {
                    Object::Device => self.port(target)?.close_device()?,
                    Object::Endpoint(_) => {
                        let (port, addr) = self.endpoint(target)?;
                        port.close_endpoint(addr)?
                    }
                }
                Ok(Reply::Done)
            }
            Request::Flush { target } => {
                let (port, addr) = self.endpoint(target)?;
                port.flush(addr)?;
                Ok(Reply::Done)
            }
            Request::Read {
                target,
                connection,
                buffer,
                len,
            } => match self.endpoint(target) {
                Ok((port, addr)) => {
                    port.read(addr, connection, buffer, len)?;
                    Ok(Reply::Queued)
                }
                Err(error) => Err(Rejected {
                    error,
                    buffer: Some(buffer),
                }),
            },
            Request::Write {
                target,
                connection,
                buffer,
            } => match self.endpoint(target) {
                Ok((port, addr)) => {
                    port.write(addr, connection, buffer)?;
                    Ok(Reply::Queued)
                }
                Err(error) => Err(Rejected {
                    error,
                    buffer: Some(buffer),
                }),
            },
            Request::SetStall { target } => {
                let (port, addr) = self.endpoint(target)?;
                port.set_stall(addr, true)?;
                Ok(Reply::Done)
            }
            Request::ClearStall { target } => {
                let (port, addr) = self.endpoint(target)?;
                port.set_stall(addr, false)?;
                Ok(Reply::Done)
            }
            Request::IsStall { target } => {
                let (port, addr) = self.endpoint(target)?;
                Ok(Reply::Stalled(port.is_stalled(addr)?))
            }
            Request::GetSpeed { target } => Ok(Reply::Speed(self.device(target)?.speed()?)),
            Request::SetAddress { target, address } => {
                self.device(target)?.set_address(address)?;
                Ok(Reply::Done)
            }
            Request::SetTestMode { target, mode } => {
                self.device(target)?.set_test_mode(mode)?;
                Ok(Reply::Done)
            }
            Request::Sync { target } => Ok(match self.device(target)?.sync()? {
                Some(notification) => Reply::Notification(notification),
                None => Reply::Pending,
            }),
        }
    }

    /// Next completion or notification for the transport
    ///
    /// Notifications come first, then completions, port by port.
    pub fn poll_outbox(&self) -> Option<Outgoing> {
        self.ports.iter().enumerate().find_map(|(idx, port)| {
            let target = Target::device(idx as u8);
            if let Some((connection, notification)) = port.take_notification() {
                return Some(Outgoing::Notification {
                    target,
                    connection,
                    notification,
                });
            }
            let completion = port.pop_completion()?;
            Some(Outgoing::Completion {
                target: Target::endpoint(idx as u8, completion.endpoint),
                completion,
            })
        })
    }

    fn port(&self, target: Target) -> Result<&'a Controller<B>, Error> {
        self.ports.get(target.port()).ok_or(Error::InvalidParams)
    }

    fn device(&self, target: Target) -> Result<&'a Controller<B>, Error> {
        match target.decode()? {
            Object::Device => self.port(target),
            Object::Endpoint(_) => Err(Error::InvalidParams),
        }
    }

    fn endpoint(&self, target: Target) -> Result<(&'a Controller<B>, EndpointAddress), Error> {
        let Object::Endpoint(addr) = target.decode()? else {
            return Err(Error::InvalidParams);
        };
        let port = self.port(target)?;
        if addr.index() >= port.backend().endpoint_count() {
            return Err(Error::InvalidParams);
        }
        Ok((port, addr))
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, Object, OpenParams, Outgoing, Rejected, Reply, Request, Target};
    use crate::{
        controller::tests::{ep, leak},
        sim::Sim,
        BusEvents, Connection, Controller, Error, Notification, Speed,
    };
    use usb_device::{endpoint::EndpointType, UsbDirection};

    fn ports() -> [Controller<Sim>; 2] {
        [
            Controller::new(Sim::new()),
            Controller::new(Sim::new().with_endpoint_count(4)),
        ]
    }

    fn open_device(dispatcher: &Dispatcher<'_, Sim>, port: u8) {
        let reply = dispatcher.dispatch(Request::Open {
            target: Target::device(port),
            params: OpenParams::Device {
                consumer: Connection(10 + port as u32),
                speed: Speed::Full,
            },
        });
        assert_eq!(reply.unwrap(), Reply::Done);
    }

    fn open_endpoint(dispatcher: &Dispatcher<'_, Sim>, target: Target) -> Result<Reply, Rejected> {
        dispatcher.dispatch(Request::Open {
            target,
            params: OpenParams::Endpoint {
                kind: EndpointType::Bulk,
                max_packet_size: 64,
            },
        })
    }

    fn error(result: Result<Reply, Rejected>) -> Error {
        result.unwrap_err().error
    }

    #[test]
    fn target_decoding() {
        assert_eq!(Target::from_raw(0x01FF).decode(), Ok(Object::Device));
        assert_eq!(Target::from_raw(0x01FF).port(), 1);
        let Ok(Object::Endpoint(addr)) = Target::from_raw(0x0082).decode() else {
            panic!("not an endpoint");
        };
        assert_eq!(addr, ep(2, UsbDirection::In));
        assert_eq!(Target::from_raw(0x0010).decode(), Err(Error::InvalidParams));
        let target = Target::endpoint(3, ep(5, UsbDirection::Out));
        assert_eq!(target.raw(), 0x0305);
    }

    #[test]
    fn routes_to_ports() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 1);

        let target = Target::endpoint(1, ep(1, UsbDirection::In));
        assert_eq!(open_endpoint(&dispatcher, target).unwrap(), Reply::Done);
        assert_eq!(
            error(open_endpoint(&dispatcher, target)),
            Error::AlreadyConfigured
        );
        assert!(ports[1].backend().is_open(ep(1, UsbDirection::In)));
        assert!(!ports[0].backend().is_open(ep(1, UsbDirection::In)));
    }

    #[test]
    fn invalid_targets() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 1);

        // Endpoint number beyond the port's hardware
        let target = Target::endpoint(1, ep(4, UsbDirection::In));
        assert_eq!(error(open_endpoint(&dispatcher, target)), Error::InvalidParams);
        // No such port
        let target = Target::endpoint(2, ep(1, UsbDirection::In));
        assert_eq!(error(open_endpoint(&dispatcher, target)), Error::InvalidParams);
        // Device operation on an endpoint
        let target = Target::endpoint(1, ep(1, UsbDirection::In));
        assert_eq!(
            error(dispatcher.dispatch(Request::GetSpeed { target })),
            Error::InvalidParams
        );
        // Endpoint operation on the device
        assert_eq!(
            error(dispatcher.dispatch(Request::Flush {
                target: Target::device(1)
            })),
            Error::InvalidParams
        );
        // Mismatched open parameters
        assert_eq!(
            error(open_endpoint(&dispatcher, Target::device(1))),
            Error::InvalidParams
        );
    }

    #[test]
    fn rejected_transfers_return_buffers() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 0);

        let rejected = dispatcher
            .dispatch(Request::Write {
                target: Target::endpoint(0, ep(5, UsbDirection::In)),
                connection: Connection(1),
                buffer: leak(5),
            })
            .unwrap_err();
        assert_eq!(rejected.error, Error::NotConfigured);
        assert_eq!(rejected.buffer.map(|b| b.len()), Some(5));

        let rejected = dispatcher
            .dispatch(Request::Read {
                target: Target::device(0),
                connection: Connection(1),
                buffer: leak(7),
                len: 7,
            })
            .unwrap_err();
        assert_eq!(rejected.error, Error::InvalidParams);
        assert_eq!(rejected.buffer.map(|b| b.len()), Some(7));
    }

    #[test]
    fn transfer_round_trip() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 0);

        let target = Target::endpoint(0, ep(1, UsbDirection::In));
        open_endpoint(&dispatcher, target).unwrap();
        let reply = dispatcher.dispatch(Request::Write {
            target,
            connection: Connection(4),
            buffer: leak(10),
        });
        assert_eq!(reply.unwrap(), Reply::Queued);
        assert!(dispatcher.poll_outbox().is_none());

        ports[0].backend().complete(ep(1, UsbDirection::In));
        ports[0].on_interrupt();

        let Some(Outgoing::Completion {
            target: done,
            completion,
        }) = dispatcher.poll_outbox()
        else {
            panic!("expected a completion");
        };
        assert_eq!(done, target);
        assert_eq!(completion.connection, Connection(4));
        assert_eq!(completion.result, Ok(10));
        assert!(dispatcher.poll_outbox().is_none());
    }

    #[test]
    fn stall_requests() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 0);
        let target = Target::endpoint(0, ep(2, UsbDirection::Out));
        open_endpoint(&dispatcher, target).unwrap();

        dispatcher.dispatch(Request::SetStall { target }).unwrap();
        assert_eq!(
            dispatcher.dispatch(Request::IsStall { target }).unwrap(),
            Reply::Stalled(true)
        );
        dispatcher.dispatch(Request::ClearStall { target }).unwrap();
        assert_eq!(
            dispatcher.dispatch(Request::IsStall { target }).unwrap(),
            Reply::Stalled(false)
        );
    }

    #[test]
    fn sync_and_notifications() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        open_device(&dispatcher, 1);
        let device = Target::device(1);

        assert_eq!(
            dispatcher.dispatch(Request::Sync { target: device }).unwrap(),
            Reply::Pending
        );
        assert_eq!(
            error(dispatcher.dispatch(Request::Sync { target: device })),
            Error::InProgress
        );

        ports[1].backend().raise(BusEvents::RESET);
        ports[1].on_interrupt();
        let Some(Outgoing::Notification {
            target,
            connection,
            notification,
        }) = dispatcher.poll_outbox()
        else {
            panic!("expected a notification");
        };
        assert_eq!(target, device);
        assert_eq!(connection, Connection(11));
        assert_eq!(notification, Notification::Reset(None));

        ports[1].backend().raise(BusEvents::SUSPEND);
        ports[1].on_interrupt();
        assert!(dispatcher.poll_outbox().is_none());
        assert_eq!(
            dispatcher.dispatch(Request::Sync { target: device }).unwrap(),
            Reply::Notification(Notification::Suspend)
        );
    }

    #[test]
    fn device_requests() {
        let ports = ports();
        let dispatcher = Dispatcher::new(&ports);
        let device = Target::device(0);
        assert_eq!(
            error(dispatcher.dispatch(Request::GetSpeed { target: device })),
            Error::NotConfigured
        );
        open_device(&dispatcher, 0);

        ports[0].backend().set_speed(Some(Speed::Full));
        ports[0].backend().raise(BusEvents::PORT_CHANGE);
        ports[0].on_interrupt();
        assert_eq!(
            dispatcher.dispatch(Request::GetSpeed { target: device }).unwrap(),
            Reply::Speed(Some(Speed::Full))
        );

        assert_eq!(
            dispatcher
                .dispatch(Request::SetAddress {
                    target: device,
                    address: 12
                })
                .unwrap(),
            Reply::Done
        );
        assert_eq!(
            error(dispatcher.dispatch(Request::SetAddress {
                target: device,
                address: 128
            })),
            Error::InvalidParams
        );
        assert_eq!(
            error(dispatcher.dispatch(Request::SetTestMode {
                target: device,
                mode: 1
            })),
            Error::NotSupported
        );

        dispatcher
            .dispatch(Request::Close { target: device })
            .unwrap();
        assert_eq!(
            error(dispatcher.dispatch(Request::Close { target: device })),
            Error::NotConfigured
        );
    }
}
