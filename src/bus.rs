//! Bus session state

use crate::{
    mailbox::{Mailbox, Notification},
    Connection, Error, Speed,
};

/// Where the device stands on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum BusState {
    /// No bus activity observed since the device opened
    Detached,
    /// On the bus, and active
    ///
    /// The speed is `None` between a reset and the speed negotiation.
    Attached { speed: Option<Speed> },
    /// On the bus, and suspended
    Suspended { speed: Option<Speed> },
}

/// The device-class consumer's view of one port
pub struct BusSession {
    consumer: Connection,
    state: BusState,
    mailbox: Mailbox,
}

impl BusSession {
    pub fn new(consumer: Connection) -> Self {
        BusSession {
            consumer,
            state: BusState::Detached,
            mailbox: Mailbox::Idle,
        }
    }

    pub fn consumer(&self) -> Connection {
        self.consumer
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn speed(&self) -> Option<Speed> {
        match self.state {
            BusState::Detached => None,
            BusState::Attached { speed } | BusState::Suspended { speed } => speed,
        }
    }

    /// The host reset the bus
    ///
    /// Endpoints are already closed by the time this runs.
    pub fn on_reset(&mut self) {
        self.state = BusState::Attached { speed: None };
        self.mailbox.post(Notification::Reset(None));
    }

    pub fn on_suspend(&mut self) {
        self.state = BusState::Suspended {
            speed: self.speed(),
        };
        self.mailbox.post(Notification::Suspend);
    }

    /// Connection, speed, or resume change on the port
    pub fn on_port_change(&mut self, speed: Option<Speed>) {
        match self.state {
            BusState::Suspended { speed } => {
                self.state = BusState::Attached { speed };
                self.mailbox.post(Notification::Wakeup);
            }
            BusState::Detached | BusState::Attached { .. } => {
                self.state = BusState::Attached { speed };
                self.mailbox.post(Notification::Reset(speed));
            }
        }
    }

    pub fn sync(&mut self) -> Result<Option<Notification>, Error> {
        self.mailbox.sync()
    }

    pub fn take_sent(&mut self) -> Option<Notification> {
        self.mailbox.take_sent()
    }
}
