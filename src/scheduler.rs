// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The cooperative scheduler (§5, §5.1): a plain synchronous function,
//! `poll_once`, called from a host's main loop or timer callback. There is
//! no async runtime and no thread spawn here — the same single-threaded,
//! interrupt-handler-shaped style `hermit-os-kernel` uses for its network
//! IRQ path (`drivers/net/mod.rs`'s `_irqhandler`).
//!
//! Each call runs the three phases in order: drain whatever octets the
//! transceiver has buffered through the receive FSM; run the auto-baud or
//! zero-config FSM if either is still in progress, else the master/slave
//! FSM for as long as it asks to be re-entered immediately; finally sweep
//! the transaction state manager for due retransmissions.

use log::trace;

use crate::autobaud;
use crate::clock::Clock;
use crate::frame::FrameType;
use crate::master::{self, ApplicationLink};
use crate::port::{Port, PortConfig, ReceiveEvent, ZeroConfigState};
use crate::slave;
use crate::transceiver::Transceiver;
use crate::tsm::TransactionManager;
use crate::zero_config;

/// Owns one node's complete runtime state: the port, its transceiver, its
/// clock, and the confirmed-request transaction manager that rides above
/// the datalink.
#[derive(Debug)]
pub struct Scheduler<const RXB: usize, const TXB: usize, T: Transceiver, C: Clock> {
	pub port: Port<RXB, TXB>,
	pub transceiver: T,
	pub clock: C,
	pub tsm: TransactionManager,
}

impl<const RXB: usize, const TXB: usize, T: Transceiver, C: Clock> Scheduler<RXB, TXB, T, C> {
	pub fn new(config: PortConfig, transceiver: T, clock: C, max_retries: u8) -> Self {
		let tsm = TransactionManager::new(config.t_reply_timeout_ms, max_retries);
		Self { port: Port::new(config), transceiver, clock, tsm }
	}

	/// Begin a new confirmed request. The caller is responsible for framing
	/// `apdu` as a Confirmed-Request with the invoke-id this returns already
	/// written into it (the TSM retains bytes for retransmission exactly as
	/// given).
	pub fn begin_confirmed_request(&mut self, destination: u8, apdu: &[u8]) -> Option<u8> {
		self.tsm.begin(destination, apdu)
	}

	/// Run one scheduler tick. Returns the number of master/slave FSM
	/// transitions that ran this tick, mostly useful for tests.
	pub fn poll_once(&mut self, app: &mut impl ApplicationLink) -> u32 {
		let elapsed_ms = self.clock.tick_ms();
		self.port.tick(elapsed_ms);

		self.drain_receive();

		let transitions = self.drive_fsms(app);

		for retransmit in self.tsm.tick(elapsed_ms) {
			if let Some(bytes) = self.tsm.retained(retransmit.invoke_id) {
				master::send_frame(&mut self.port, &mut self.transceiver, FrameType::BacnetDataExpectingReply, retransmit.destination, bytes);
			}
		}

		transitions
	}

	fn drain_receive(&mut self) {
		loop {
			let event = if let Some(octet) = self.transceiver.read() {
				ReceiveEvent::Octet(octet)
			} else if self.transceiver.receive_error() {
				ReceiveEvent::Error
			} else {
				return;
			};
			let finished = crate::receive::step(&mut self.port, event, self.port.config.t_frame_abort_ms);
			trace!("scheduler: receive event consumed, finished={finished}");
		}
	}

	fn drive_fsms(&mut self, app: &mut impl ApplicationLink) -> u32 {
		if self.port.check_auto_baud {
			autobaud::step(&mut self.port, &mut self.transceiver);
			return 0;
		}
		if self.port.config.zero_config_enabled && self.port.zero_config_state != ZeroConfigState::Use {
			zero_config::step(&mut self.port, &mut self.transceiver);
			return 0;
		}

		let mut transitions = 0;
		loop {
			let transition = if self.port.config.slave_node_enabled {
				slave::step(&mut self.port, &mut self.transceiver, app)
			} else {
				master::step(&mut self.port, &mut self.transceiver, app)
			};
			transitions += 1;
			if !transition {
				break;
			}
		}
		transitions
	}
}
