// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A BACnet Master-Slave/Token-Passing (MS/TP) data-link core: the
//! byte-driven receive framer, the master- and slave-node token-ring state
//! machines, zero-configuration address acquisition, auto-baud detection,
//! and the confirmed-request transaction state manager that rides above
//! them.
//!
//! This crate owns none of the surrounding plumbing — no RS-485 driver, no
//! application-layer service encoding, no packet capture or CLI. Those are
//! the platform's job, expressed here as the [`transceiver::Transceiver`],
//! [`master::ApplicationLink`], and [`clock::Clock`] traits. A host wires
//! its own implementations of those three traits into a [`scheduler::Scheduler`]
//! and calls [`scheduler::Scheduler::poll_once`] from its main loop or timer
//! callback.
//!
//! No heap allocation happens on the hot path: frame buffers are
//! caller-sized const generics, and the TSM and service dispatcher use
//! fixed-capacity `heapless` tables. The address binding cache is the one
//! exception — it grows with the number of distinct devices seen on the
//! bus, bounded by its configured capacity rather than by a const generic,
//! since that count is a runtime network property, not a compile-time one.

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_debug_implementations)]

pub mod apdu;
pub mod autobaud;
pub mod binding;
pub mod clock;
pub mod crc;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod master;
pub mod port;
pub mod receive;
pub mod scheduler;
pub mod slave;
pub mod transceiver;
pub mod tsm;
pub mod zero_config;

pub use error::{Abort, BacnetError, ConfirmedOutcome, ErrorClass, ErrorCode, MstpError, Reject};
pub use frame::{Frame, FrameType};
pub use master::ApplicationLink;
pub use port::{Port, PortConfig};
pub use scheduler::Scheduler;
pub use transceiver::Transceiver;
