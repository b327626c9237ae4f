// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The byte-driven receive framer (§4.3). `step` is called once per octet
//! (or once per receive error, or once per poll when nothing arrived) and
//! advances [`ReceiveState`] exactly one transition per call, matching the
//! non-blocking style the rest of this crate uses throughout.

use crate::crc::{crc16_data, crc8_header, DATA_CRC_GOOD, DATA_CRC_SEED, HEADER_CRC_GOOD, HEADER_CRC_SEED};
use crate::frame::FrameType;
use crate::port::{Port, ReceiveEvent, ReceiveState};

/// Inter-octet silence limit while a frame is in flight, milliseconds (§6.4).
pub const DEFAULT_T_FRAME_ABORT_MS: u32 = 30;

fn frame_is_for_us<const RXB: usize, const TXB: usize>(port: &Port<RXB, TXB>) -> bool {
	port.destination_address == port.this_station
		|| port.destination_address == crate::frame::BROADCAST_ADDRESS
		|| port.this_station == crate::frame::BROADCAST_ADDRESS
}

/// Advance the receive FSM by one event. Returns `true` if a frame finished
/// (valid or invalid) this call, i.e. the caller should inspect
/// `port.received_valid_frame` / `port.received_invalid_frame` and clear
/// whichever it handled.
pub fn step<const RXB: usize, const TXB: usize>(
	port: &mut Port<RXB, TXB>,
	event: ReceiveEvent,
	t_frame_abort_ms: u32,
) -> bool {
	match port.receive_state {
		ReceiveState::Idle => step_idle(port, event),
		ReceiveState::Preamble => step_preamble(port, event, t_frame_abort_ms),
		ReceiveState::Header => step_header(port, event, t_frame_abort_ms),
		ReceiveState::HeaderCrcReject => {
			port.receive_state = ReceiveState::Idle;
			false
		}
		ReceiveState::Data | ReceiveState::DataCrcReject => step_data(port, event, t_frame_abort_ms),
	}
}

fn step_idle<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, event: ReceiveEvent) -> bool {
	match event {
		ReceiveEvent::Error => {
			port.reset_silence_timer();
			false
		}
		ReceiveEvent::Octet(0x55) => {
			port.receive_state = ReceiveState::Preamble;
			port.reset_silence_timer();
			false
		}
		ReceiveEvent::Octet(_) => {
			port.reset_silence_timer();
			false
		}
		ReceiveEvent::Timeout => false,
	}
}

fn step_preamble<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, event: ReceiveEvent, t_frame_abort_ms: u32) -> bool {
	if port.silence_timer > t_frame_abort_ms {
		port.receive_state = ReceiveState::Idle;
		return false;
	}
	match event {
		ReceiveEvent::Error => {
			port.receive_state = ReceiveState::Idle;
			port.reset_silence_timer();
		}
		ReceiveEvent::Octet(0xFF) => {
			port.index = 0;
			port.header_crc = HEADER_CRC_SEED;
			port.receive_state = ReceiveState::Header;
			port.reset_silence_timer();
		}
		ReceiveEvent::Octet(0x55) => {
			// repeated preamble1, stay put
			port.reset_silence_timer();
		}
		ReceiveEvent::Octet(_) => {
			port.receive_state = ReceiveState::Idle;
			port.reset_silence_timer();
		}
		ReceiveEvent::Timeout => {}
	}
	false
}

fn step_header<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, event: ReceiveEvent, t_frame_abort_ms: u32) -> bool {
	if port.silence_timer > t_frame_abort_ms {
		port.received_invalid_frame = true;
		port.receive_state = ReceiveState::Idle;
		return true;
	}
	let octet = match event {
		ReceiveEvent::Error => {
			port.received_invalid_frame = true;
			port.receive_state = ReceiveState::Idle;
			port.reset_silence_timer();
			return true;
		}
		ReceiveEvent::Octet(b) => b,
		ReceiveEvent::Timeout => return false,
	};

	port.header_crc = crc8_header(octet, port.header_crc);
	match port.index {
		0 => {
			port.frame_type = FrameType::from(octet);
			port.index = 1;
		}
		1 => {
			port.destination_address = octet;
			port.index = 2;
		}
		2 => {
			port.source_address = octet;
			port.index = 3;
		}
		3 => {
			port.data_length = (octet as u16) * 256;
			port.index = 4;
		}
		4 => {
			port.data_length += octet as u16;
			port.index = 5;
		}
		5 => {
			if port.header_crc != HEADER_CRC_GOOD {
				port.received_invalid_frame = true;
				port.receive_state = ReceiveState::Idle;
				port.reset_silence_timer();
				return true;
			}
			if port.data_length == 0 {
				if frame_is_for_us(port) {
					port.received_valid_frame = true;
				} else {
					port.received_valid_frame_not_for_us = true;
				}
				port.receive_state = ReceiveState::Idle;
				port.reset_silence_timer();
				return true;
			}
			port.index = 0;
			port.data_crc = DATA_CRC_SEED;
			port.receive_state = if (port.data_length as usize) <= RXB && frame_is_for_us(port) {
				ReceiveState::Data
			} else {
				ReceiveState::DataCrcReject
			};
		}
		_ => unreachable!("header index bounded to 0..=5"),
	}
	port.reset_silence_timer();
	false
}

fn step_data<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, event: ReceiveEvent, t_frame_abort_ms: u32) -> bool {
	if port.silence_timer > t_frame_abort_ms {
		port.received_invalid_frame = true;
		port.receive_state = ReceiveState::Idle;
		return true;
	}
	let octet = match event {
		ReceiveEvent::Error => {
			port.received_invalid_frame = true;
			port.receive_state = ReceiveState::Idle;
			port.reset_silence_timer();
			return true;
		}
		ReceiveEvent::Octet(b) => b,
		ReceiveEvent::Timeout => return false,
	};

	let index = port.index;
	let data_length = port.data_length as usize;
	let keeping = port.receive_state == ReceiveState::Data;

	if index < data_length {
		port.data_crc = crc16_data(octet, port.data_crc);
		if keeping && index < RXB {
			port.input_buffer[index] = octet;
		}
		port.index += 1;
	} else if index == data_length || index == data_length + 1 {
		port.data_crc = crc16_data(octet, port.data_crc);
		port.index += 1;
		if index == data_length + 1 {
			let good = port.data_crc == DATA_CRC_GOOD;
			if good {
				if keeping {
					port.received_valid_frame = true;
				} else {
					port.received_valid_frame_not_for_us = true;
				}
			} else {
				port.received_invalid_frame = true;
			}
			port.receive_state = ReceiveState::Idle;
			port.reset_silence_timer();
			return true;
		}
	} else {
		port.received_invalid_frame = true;
		port.receive_state = ReceiveState::Idle;
		port.reset_silence_timer();
		return true;
	}
	port.reset_silence_timer();
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::port::PortConfig;

	fn feed<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, octets: &[u8]) -> bool {
		let mut finished = false;
		for &b in octets {
			finished = step(port, ReceiveEvent::Octet(b), DEFAULT_T_FRAME_ABORT_MS);
		}
		finished
	}

	#[test]
	fn decodes_zero_length_token_frame_addressed_to_us() {
		let mut port = Port::<64, 64>::new(PortConfig { this_station: 1, ..PortConfig::default() });
		// preamble, type=Token, dest=1, src=0, len=0, headerCRC=0x73 (see frame.rs test)
		let finished = feed(&mut port, &[0x55, 0xFF, 0x00, 0x01, 0x00, 0x00, 0x00, 0x73]);
		assert!(finished);
		assert!(port.received_valid_frame);
		assert_eq!(port.frame_type, FrameType::Token);
	}

	#[test]
	fn rejects_bad_header_crc() {
		let mut port = Port::<64, 64>::new(PortConfig { this_station: 1, ..PortConfig::default() });
		let finished = feed(&mut port, &[0x55, 0xFF, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
		assert!(finished);
		assert!(port.received_invalid_frame);
		assert!(!port.received_valid_frame);
	}

	#[test]
	fn data_frame_for_us_lands_in_input_buffer() {
		let mut port = Port::<64, 64>::new(PortConfig { this_station: 10, ..PortConfig::default() });
		let mut buf = [0u8; 32];
		let data = [1, 2, 3, 4];
		let n = crate::frame::encode(&mut buf, crate::frame::Frame::new(FrameType::BacnetDataExpectingReply, 10, 3, &data)).unwrap();
		let finished = feed(&mut port, &buf[..n]);
		assert!(finished);
		assert!(port.received_valid_frame);
		assert_eq!(&port.input_buffer[..4], &data);
	}

	#[test]
	fn data_frame_not_for_us_is_still_tracked_but_discarded() {
		let mut port = Port::<64, 64>::new(PortConfig { this_station: 10, ..PortConfig::default() });
		let mut buf = [0u8; 32];
		let data = [1, 2, 3, 4];
		let n = crate::frame::encode(&mut buf, crate::frame::Frame::new(FrameType::BacnetDataExpectingReply, 11, 3, &data)).unwrap();
		let finished = feed(&mut port, &buf[..n]);
		assert!(finished);
		assert!(port.received_valid_frame_not_for_us);
		assert!(!port.received_valid_frame);
	}

	#[test]
	fn silence_timeout_during_header_marks_invalid_frame() {
		let mut port = Port::<64, 64>::new(PortConfig { this_station: 1, ..PortConfig::default() });
		step(&mut port, ReceiveEvent::Octet(0x55), DEFAULT_T_FRAME_ABORT_MS);
		step(&mut port, ReceiveEvent::Octet(0xFF), DEFAULT_T_FRAME_ABORT_MS);
		port.silence_timer = DEFAULT_T_FRAME_ABORT_MS + 1;
		let finished = step(&mut port, ReceiveEvent::Octet(0x00), DEFAULT_T_FRAME_ABORT_MS);
		assert!(finished);
		assert!(port.received_invalid_frame);
		assert_eq!(port.receive_state, ReceiveState::Idle);
	}

	#[test]
	fn receive_error_in_idle_just_resets_silence() {
		let mut port = Port::<64, 64>::new(PortConfig::default());
		let finished = step(&mut port, ReceiveEvent::Error, DEFAULT_T_FRAME_ABORT_MS);
		assert!(!finished);
		assert_eq!(port.receive_state, ReceiveState::Idle);
		assert_eq!(port.silence_timer, 0);
	}
}
