//! The single-slot notification mailbox

use crate::{Error, Speed};

/// A bus change, delivered to the device-class consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Notification {
    /// The host reset the bus, and every endpoint was closed
    ///
    /// Carries the negotiated speed, once known.
    Reset(Option<Speed>),
    Suspend,
    Wakeup,
}

impl Notification {
    /// Merge `later` into an unobserved notification
    ///
    /// A reset dominates everything. Two resets merge into one, keeping
    /// the most recent known speed. Otherwise the later event wins.
    fn coalesce(self, later: Notification) -> Notification {
        match (self, later) {
            (Notification::Reset(earlier), Notification::Reset(later)) => {
                Notification::Reset(later.or(earlier))
            }
            (Notification::Reset(speed), _) => Notification::Reset(speed),
            (_, later) => later,
        }
    }
}

/// The notification slot shared with the consumer
///
/// The consumer parks a receive with a sync request. An event sent
/// while a receive is parked goes straight out; otherwise it waits in
/// the slot for the next sync. Nothing is dropped, and the slot never
/// holds more than one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mailbox {
    /// No receive parked, nothing pending
    #[default]
    Idle,
    /// The consumer's receive is parked
    Ready,
    /// Answered the parked receive; waiting for the transport to collect it
    Sent(Notification),
    /// Waiting for the consumer's next sync
    Pending(Notification),
}

impl Mailbox {
    pub fn post(&mut self, notification: Notification) {
        *self = match *self {
            Mailbox::Idle => Mailbox::Pending(notification),
            Mailbox::Ready => Mailbox::Sent(notification),
            Mailbox::Sent(earlier) => Mailbox::Sent(earlier.coalesce(notification)),
            Mailbox::Pending(earlier) => Mailbox::Pending(earlier.coalesce(notification)),
        };
    }

    /// Handle the consumer's sync request
    ///
    /// Returns the pending notification, if any. Otherwise the receive
    /// is parked until the next post. A second sync while one is parked,
    /// or while an answer is still in the slot, is `InProgress`.
    pub fn sync(&mut self) -> Result<Option<Notification>, Error> {
        match *self {
            Mailbox::Pending(notification) => {
                *self = Mailbox::Idle;
                Ok(Some(notification))
            }
            Mailbox::Idle => {
                *self = Mailbox::Ready;
                Ok(None)
            }
            Mailbox::Ready | Mailbox::Sent(_) => Err(Error::InProgress),
        }
    }

    /// Collect a notification that answered a parked receive
    pub fn take_sent(&mut self) -> Option<Notification> {
        match *self {
            Mailbox::Sent(notification) => {
                *self = Mailbox::Idle;
                Some(notification)
            }
            _ => None,
        }
    }
}
