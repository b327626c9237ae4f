// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Zero-configuration address acquisition (§4.6): a node with no configured
//! `this_station` claims an address in `64..=127` by lurking on the
//! maintenance Poll-For-Master traffic, then confirming the claim with a
//! self-addressed Test-Request carrying a random tie-breaker.

use log::{debug, info};

use crate::frame::FrameType;
use crate::port::{Port, ZeroConfigState};
use crate::transceiver::Transceiver;

/// Lowest address zero-config may claim.
pub const MIN_STATION: u8 = 64;
/// Highest address zero-config may claim (inclusive).
pub const MAX_STATION: u8 = 127;
/// Largest `max_master` zero-config will assume once it claims the token.
pub const DEFAULT_MAX_MASTER: u8 = 127;
/// Base poll-count priority offset before a node's own slot.
pub const NMIN_POLL: u16 = 1;
/// Number of poll-priority slots a candidate may be assigned.
pub const NMAX_POLL_SLOT: u8 = 8;

/// Generate a 128-bit UUIDv4-shaped tie-breaker from a caller-supplied RNG.
#[cfg(feature = "zero-config")]
pub fn generate_uuid(rng: &mut impl rand_core::RngCore) -> u128 {
	let mut bytes = [0u8; 16];
	rng.fill_bytes(&mut bytes);
	bytes[6] = 0x40 | (bytes[6] & 0x0f);
	bytes[8] = 0x80 | (bytes[8] & 0x3f);
	u128::from_be_bytes(bytes)
}

fn uuid_byte(uuid: u128, index: usize) -> u8 {
	uuid.to_be_bytes()[index]
}

/// Next candidate address in `64..=127`, wrapping.
pub fn next_station(station: u8) -> u8 {
	if station < MIN_STATION {
		MIN_STATION
	} else if station >= MAX_STATION {
		MIN_STATION
	} else {
		station + 1
	}
}

/// Advance the zero-config FSM by one step.
pub fn step<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	match port.zero_config_state {
		ZeroConfigState::Init => step_init(port),
		ZeroConfigState::Idle => step_idle(port, transceiver),
		ZeroConfigState::Lurk => step_lurk(port, transceiver),
		ZeroConfigState::Claim => step_claim(port, transceiver),
		ZeroConfigState::Confirm => step_confirm(port, transceiver),
		ZeroConfigState::Use => {}
	}
}

fn step_init<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>) {
	port.zero_config_poll_count = 0;
	if !(MIN_STATION..=MAX_STATION).contains(&port.zero_config_preferred_station) {
		port.zero_config_preferred_station = MIN_STATION;
	}
	port.zero_config_station = port.zero_config_preferred_station;
	port.zero_config_poll_slot = 1 + (uuid_byte(port.uuid, 0) % NMAX_POLL_SLOT);
	let slots = 128u32 + port.zero_config_poll_slot as u32;
	port.zero_config_silence = port.config.t_no_token_ms + port.config.t_slot_ms * slots;
	port.zero_config_max_master = 0;
	port.zero_config_state = ZeroConfigState::Idle;
}

fn step_idle<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	if port.received_valid_frame {
		port.zero_config_poll_count = 0;
		port.zero_config_state = ZeroConfigState::Lurk;
	} else if port.received_invalid_frame {
		port.received_invalid_frame = false;
	} else if port.received_valid_frame_not_for_us {
		port.received_valid_frame_not_for_us = false;
	} else if port.zero_config_silence > 0 && port.silence_timer > port.zero_config_silence {
		port.zero_config_max_master = DEFAULT_MAX_MASTER;
		let uuid_bytes = port.uuid.to_be_bytes();
		let station = port.zero_config_station;
		crate::master::send_frame(port, transceiver, FrameType::TestRequest, station, &uuid_bytes);
		port.zero_config_state = ZeroConfigState::Confirm;
	}
}

fn step_lurk<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	if port.received_valid_frame {
		port.received_valid_frame = false;
		let (destination, source, frame_type) = (port.destination_address, port.source_address, port.frame_type);

		if frame_type == FrameType::PollForMaster && destination > port.zero_config_max_master && destination <= DEFAULT_MAX_MASTER {
			port.zero_config_max_master = destination;
		}

		if source == port.zero_config_station {
			port.zero_config_station = next_station(port.zero_config_station);
			port.zero_config_poll_count = 0;
		} else if frame_type == FrameType::PollForMaster && destination == port.zero_config_station {
			let threshold = NMIN_POLL + port.zero_config_poll_slot as u16;
			if port.zero_config_poll_count == threshold {
				let station = port.zero_config_station;
				crate::master::send_frame(port, transceiver, FrameType::ReplyToPollForMaster, source, &[]);
				port.zero_config_state = ZeroConfigState::Claim;
				debug!("zero-config: claiming candidate {station} after {threshold} polls");
			} else {
				port.zero_config_poll_count += 1;
			}
		}
	} else if port.received_invalid_frame {
		port.received_invalid_frame = false;
	} else if port.received_valid_frame_not_for_us {
		port.received_valid_frame_not_for_us = false;
	} else if port.zero_config_silence > 0 && port.silence_timer > port.zero_config_silence {
		port.zero_config_state = ZeroConfigState::Idle;
	}
}

fn step_claim<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	if port.received_valid_frame {
		port.received_valid_frame = false;
		let (destination, source, frame_type) = (port.destination_address, port.source_address, port.frame_type);

		if source == port.zero_config_station {
			port.zero_config_station = next_station(port.zero_config_station);
			port.zero_config_poll_count = 0;
			port.zero_config_state = ZeroConfigState::Lurk;
		} else if frame_type == FrameType::Token && destination == port.zero_config_station {
			let uuid_bytes = port.uuid.to_be_bytes();
			let station = port.zero_config_station;
			crate::master::send_frame(port, transceiver, FrameType::TestRequest, source, &uuid_bytes);
			let _ = station;
			port.zero_config_state = ZeroConfigState::Confirm;
		}
	} else if port.received_invalid_frame {
		port.received_invalid_frame = false;
	} else if port.received_valid_frame_not_for_us {
		port.received_valid_frame_not_for_us = false;
	} else if port.zero_config_silence > 0 && port.silence_timer > port.zero_config_silence {
		port.zero_config_state = ZeroConfigState::Idle;
	}
}

fn step_confirm<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, _transceiver: &mut impl Transceiver) {
	if port.received_valid_frame {
		port.received_valid_frame = false;
		let (destination, source, frame_type, data_len) = (port.destination_address, port.source_address, port.frame_type, port.data_length as usize);

		if frame_type == FrameType::TestResponse {
			let uuid_bytes = port.uuid.to_be_bytes();
			let matched = destination == port.zero_config_station && data_len >= uuid_bytes.len() && port.input_buffer[..uuid_bytes.len()] == uuid_bytes;
			if matched {
				port.this_station = port.zero_config_station;
				port.zero_config_state = ZeroConfigState::Use;
				info!("zero-config: adopted station address {}", port.this_station);
			} else {
				port.zero_config_state = ZeroConfigState::Idle;
			}
		} else if source == port.zero_config_station {
			port.zero_config_station = next_station(port.zero_config_station);
			port.zero_config_state = ZeroConfigState::Lurk;
		}
	} else if port.received_invalid_frame {
		port.received_invalid_frame = false;
	} else if port.received_valid_frame_not_for_us {
		port.received_valid_frame_not_for_us = false;
	} else if port.silence_timer >= port.config.t_reply_timeout_ms {
		port.this_station = port.zero_config_station;
		port.zero_config_state = ZeroConfigState::Use;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::port::PortConfig;
	use crate::transceiver::loopback::{LoopbackTransceiver, Wire};

	fn harness() -> (Port<64, 64>, LoopbackTransceiver) {
		let port = Port::<64, 64>::new(PortConfig { zero_config_enabled: true, this_station: 255, ..PortConfig::default() });
		(port, LoopbackTransceiver::new(Wire::new(), Wire::new()))
	}

	#[test]
	fn next_station_wraps_within_range() {
		assert_eq!(next_station(127), 64);
		assert_eq!(next_station(64), 65);
		assert_eq!(next_station(0), 64);
	}

	#[test]
	fn init_picks_preferred_station_and_computes_silence_budget() {
		let (mut port, _) = harness();
		port.zero_config_preferred_station = 70;
		step(&mut port, &mut LoopbackTransceiver::new(Wire::new(), Wire::new()));
		assert_eq!(port.zero_config_station, 70);
		assert_eq!(port.zero_config_state, ZeroConfigState::Idle);
		assert!(port.zero_config_silence > port.config.t_no_token_ms);
	}

	#[test]
	fn idle_on_valid_frame_moves_to_lurk() {
		let (mut port, mut tx) = harness();
		port.zero_config_state = ZeroConfigState::Idle;
		port.received_valid_frame = true;
		step(&mut port, &mut tx);
		assert_eq!(port.zero_config_state, ZeroConfigState::Lurk);
	}

	#[test]
	fn lurk_counts_polls_and_claims_on_threshold() {
		let (mut port, mut tx) = harness();
		port.zero_config_state = ZeroConfigState::Lurk;
		port.zero_config_station = 64;
		port.zero_config_poll_slot = 1;
		port.zero_config_poll_count = NMIN_POLL + 1;
		port.received_valid_frame = true;
		port.frame_type = FrameType::PollForMaster;
		port.destination_address = 64;
		port.source_address = 5;
		step(&mut port, &mut tx);
		assert_eq!(port.zero_config_state, ZeroConfigState::Claim);
	}

	#[test]
	fn lurk_address_in_use_advances_candidate() {
		let (mut port, mut tx) = harness();
		port.zero_config_state = ZeroConfigState::Lurk;
		port.zero_config_station = 64;
		port.received_valid_frame = true;
		port.source_address = 64;
		port.frame_type = FrameType::Token;
		step(&mut port, &mut tx);
		assert_eq!(port.zero_config_station, 65);
		assert_eq!(port.zero_config_state, ZeroConfigState::Lurk);
	}

	#[test]
	fn confirm_timeout_adopts_station_without_test_support() {
		let (mut port, mut tx) = harness();
		port.zero_config_state = ZeroConfigState::Confirm;
		port.zero_config_station = 70;
		port.silence_timer = port.config.t_reply_timeout_ms;
		step(&mut port, &mut tx);
		assert_eq!(port.zero_config_state, ZeroConfigState::Use);
		assert_eq!(port.this_station, 70);
	}

	#[test]
	fn confirm_matching_test_response_adopts_station() {
		let (mut port, mut tx) = harness();
		port.zero_config_state = ZeroConfigState::Confirm;
		port.zero_config_station = 70;
		port.uuid = 0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10;
		port.received_valid_frame = true;
		port.frame_type = FrameType::TestResponse;
		port.destination_address = 70;
		port.data_length = 16;
		port.input_buffer[..16].copy_from_slice(&port.uuid.to_be_bytes());
		step(&mut port, &mut tx);
		assert_eq!(port.zero_config_state, ZeroConfigState::Use);
		assert_eq!(port.this_station, 70);
	}
}
