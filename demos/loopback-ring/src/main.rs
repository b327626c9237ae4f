// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Wires two `mstp-core` nodes together over an in-memory loopback bus and
//! runs the scheduler until the token has changed hands a few times,
//! logging every state transition. Stands in for the pcap/CLI tooling that
//! is out of scope for the library itself.

use log::info;
use mstp_core::clock::ManualClock;
use mstp_core::frame::FrameType;
use mstp_core::master::{ApplicationLink, OutgoingPdu};
use mstp_core::port::{MasterState, PortConfig};
use mstp_core::transceiver::loopback::{LoopbackTransceiver, Wire};
use mstp_core::Scheduler;

/// An application layer that never has anything to send and just logs what
/// lands in its inbox.
struct LoggingApp {
	name: &'static str,
}

impl ApplicationLink for LoggingApp {
	fn poll_outgoing(&mut self) -> Option<OutgoingPdu> {
		None
	}

	fn deliver(&mut self, source: u8, frame_type: FrameType, data: &[u8]) {
		info!("{} received {:?} ({} bytes) from station {}", self.name, frame_type, data.len(), source);
	}

	fn poll_reply(&mut self) -> Option<OutgoingPdu> {
		None
	}
}

fn main() {
	env_logger::init();

	let a_to_b = Wire::new();
	let b_to_a = Wire::new();

	let mut node_a = Scheduler::new(
		PortConfig { this_station: 0, max_master: 1, ..PortConfig::default() },
		LoopbackTransceiver::new(b_to_a.clone(), a_to_b.clone()),
		ManualClock::new(),
		1,
	);
	let mut node_b = Scheduler::new(
		PortConfig { this_station: 1, max_master: 1, ..PortConfig::default() },
		LoopbackTransceiver::new(a_to_b, b_to_a),
		ManualClock::new(),
		1,
	);

	let mut app_a = LoggingApp { name: "node-a" };
	let mut app_b = LoggingApp { name: "node-b" };

	let mut token_passes = 0;
	let mut last_holder = None;

	for tick in 0.. {
		node_a.clock.advance(5);
		node_b.clock.advance(5);
		node_a.poll_once(&mut app_a);
		node_b.poll_once(&mut app_b);

		let holder = match (node_a.port.master_state, node_b.port.master_state) {
			(MasterState::UseToken, _) => Some(0),
			(_, MasterState::UseToken) => Some(1),
			_ => last_holder,
		};
		if holder != last_holder && holder.is_some() {
			token_passes += 1;
			info!("tick {tick}: token now held by node-{}", holder.unwrap());
			last_holder = holder;
		}
		if token_passes >= 6 {
			break;
		}
	}

	info!("observed {token_passes} token hand-offs over the loopback ring");
}
