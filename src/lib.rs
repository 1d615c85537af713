//! A USB device-controller driver core
//!
//! `usbdc` turns a USB device controller into a request / completion
//! protocol. A device-class stack opens endpoints, hands buffers to the
//! driver with read and write requests, and later collects a
//! [`Completion`] for every request. Bus-level changes (reset, suspend,
//! wakeup, speed negotiation) reach the class stack as [`Notification`]s
//! through a single-slot mailbox.
//!
//! The transfer engine is written once, against [`TransferBackend`].
//! Two backends ship with the crate:
//!
//! - [`chipidea`], a ring-based queue head / transfer descriptor
//!   controller, found on i.MX RT processors.
//! - [`rp2040`], a per-endpoint status-word controller with dedicated
//!   packet RAM.
//!
//! A [`Controller`] wraps one backend, one physical port. Call
//! [`Controller::on_interrupt`] from the USB interrupt handler, and route
//! class-stack requests through a [`Dispatcher`](dispatch::Dispatcher).
//!
//! # Logging
//!
//! Enable the `defmt-03` feature to log driver activity with `defmt`.
//! Only enable it when your `defmt` transport isn't this USB controller!

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;
#[macro_use]
mod ral;

mod backend;
mod buffer;
mod bus;
mod cache;
mod chunk;
mod controller;
mod critical;
mod endpoint;
mod error;
mod interrupt;
mod mailbox;
mod transfer;
mod vcell;

pub mod chipidea;
pub mod dispatch;
pub mod rp2040;

#[cfg(test)]
mod sim;

pub use backend::{BusEvents, Faults, Interrupts, Retired, TransferBackend};
pub use bus::BusState;
pub use chunk::Chunk;
pub use controller::{Controller, OUTBOX_DEPTH};
pub use error::Error;
pub use mailbox::Notification;
pub use transfer::{Completion, Connection, Refused};

/// The largest number of endpoint numbers a controller may expose
///
/// Each number has an OUT and an IN direction.
pub const MAX_ENDPOINTS: usize = 16;

/// USB bus speed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Speed {
    /// 1.5 Mbit/s
    Low,
    /// 12 Mbit/s
    Full,
    /// 480 Mbit/s
    High,
}
