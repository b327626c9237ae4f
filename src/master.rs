// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The master-node token-ring state machine (§4.4): the heart of MS/TP.
//! One node holds the token at a time; while holding it a node may send up
//! to `max_info_frames` data frames before passing the token on, and
//! periodically polls the address range above it for new master nodes.
//!
//! `step` is called once per scheduler tick and returns whether the caller
//! should call it again immediately (the "transition now" flag from the
//! original state tables) rather than wait for the next octet or timer
//! tick.

use heapless::Vec;
use log::{debug, trace, warn};

use crate::frame::{self, Frame, FrameType};
use crate::port::{MasterState, Port};
use crate::transceiver::Transceiver;

/// Maximum size of an application PDU this module will copy into the
/// transmit scratch buffer in one token hold.
pub const MAX_APPLICATION_PDU: usize = 480;

/// One outgoing application PDU, handed up by [`ApplicationLink::poll_outgoing`].
#[derive(Debug, Clone)]
pub struct OutgoingPdu {
	pub frame_type: FrameType,
	pub destination: u8,
	pub data: Vec<u8, MAX_APPLICATION_PDU>,
}

/// The application-layer collaborator (§6.3's boundary): hands down frames
/// to send and receives frames that arrived for this node. Kept as a trait
/// so the FSM itself stays free of any particular queue implementation.
pub trait ApplicationLink {
	/// A frame ready to send while holding the token, if any.
	fn poll_outgoing(&mut self) -> Option<OutgoingPdu>;
	/// A frame just validated and addressed to us.
	fn deliver(&mut self, source: u8, frame_type: FrameType, data: &[u8]);
	/// The reply to a just-received BACnetDataExpectingReply, if the
	/// application produced one within `t_reply_delay`.
	fn poll_reply(&mut self) -> Option<OutgoingPdu>;
}

pub(crate) fn send_frame<const RXB: usize, const TXB: usize>(
	port: &mut Port<RXB, TXB>,
	transceiver: &mut impl Transceiver,
	frame_type: FrameType,
	destination: u8,
	data: &[u8],
) {
	let frame = Frame::new(frame_type, destination, port.this_station, data);
	match frame::encode(&mut port.output_buffer, frame) {
		Ok(n) => {
			port.output_length = n;
			let sent = transceiver.send(&port.output_buffer[..n]);
			if sent != n {
				warn!("short send: {sent} of {n} octets ({frame_type:?} to {destination})");
			}
			transceiver.silence_reset();
			port.reset_silence_timer();
		}
		Err(e) => warn!("failed to encode {frame_type:?} for {destination}: {e}"),
	}
}

/// Advance the master FSM by one step. Returns `true` if the caller should
/// invoke `step` again immediately without waiting for new input.
pub fn step<const RXB: usize, const TXB: usize>(
	port: &mut Port<RXB, TXB>,
	transceiver: &mut impl Transceiver,
	app: &mut impl ApplicationLink,
) -> bool {
	if port.master_state != MasterState::Initialize && port.received_valid_frame && port.source_address == port.this_station {
		warn!("duplicate MAC address {} detected on the bus, re-initializing", port.this_station);
		port.received_valid_frame = false;
		port.this_station = frame::BROADCAST_ADDRESS;
		port.master_state = MasterState::Initialize;
		return true;
	}

	let max_master = port.config.max_master;
	let next_poll_station = (port.poll_station + 1) % (max_master + 1);
	let next_this_station = (port.this_station + 1) % (max_master + 1);
	let next_next_station = (port.next_station + 1) % (max_master + 1);

	trace!("master_fsm: state={:?}", port.master_state);

	match port.master_state {
		MasterState::Initialize => {
			port.next_station = port.this_station;
			port.poll_station = port.this_station;
			port.token_count = port.config.npoll.min(u8::MAX as u16) as u8;
			port.sole_master = false;
			port.master_state = MasterState::Idle;
			true
		}

		MasterState::Idle => step_idle(port, transceiver, app),

		MasterState::UseToken => {
			match app.poll_outgoing() {
				None => {
					port.frame_count = port.config.max_info_frames;
					port.master_state = MasterState::DoneWithToken;
					true
				}
				Some(pdu) => {
					send_frame(port, transceiver, pdu.frame_type, pdu.destination, &pdu.data);
					port.frame_count += 1;
					port.master_state = match pdu.frame_type {
						FrameType::BacnetDataExpectingReply | FrameType::BacnetExtendedDataExpectingReply if pdu.destination != frame::BROADCAST_ADDRESS => {
							MasterState::WaitForReply
						}
						FrameType::TestRequest => MasterState::WaitForReply,
						_ => MasterState::DoneWithToken,
					};
					false
				}
			}
		}

		MasterState::WaitForReply => step_wait_for_reply(port, app),

		MasterState::DoneWithToken => step_done_with_token(port, transceiver, next_poll_station, next_this_station, next_next_station),

		MasterState::PassToken => step_pass_token(port, transceiver, next_next_station),

		MasterState::NoToken => step_no_token(port, transceiver, next_this_station, max_master),

		MasterState::PollForMaster => step_poll_for_master(port, transceiver, next_poll_station),

		MasterState::AnswerDataRequest => step_answer_data_request(port, transceiver, app),
	}
}

fn step_idle<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver, app: &mut impl ApplicationLink) -> bool {
	if port.received_invalid_frame {
		port.received_invalid_frame = false;
		return false;
	}
	if port.received_valid_frame_not_for_us {
		port.received_valid_frame_not_for_us = false;
		return false;
	}
	if port.received_valid_frame {
		let frame_type = port.frame_type;
		let source = port.source_address;
		let destination = port.destination_address;
		let data_len = port.data_length as usize;
		debug!("received {frame_type:?} from {source} (dest={destination})");

		let mut transition = false;
		match frame_type {
			FrameType::Token if destination != frame::BROADCAST_ADDRESS => {
				port.frame_count = 0;
				port.sole_master = false;
				port.master_state = MasterState::UseToken;
				transition = true;
			}
			FrameType::PollForMaster if destination == port.this_station => {
				send_frame(port, transceiver, FrameType::ReplyToPollForMaster, source, &[]);
			}
			FrameType::BacnetDataNotExpectingReply | FrameType::BacnetExtendedDataNotExpectingReply => {
				app.deliver(source, frame_type, &port.input_buffer[..data_len]);
			}
			FrameType::BacnetDataExpectingReply | FrameType::BacnetExtendedDataExpectingReply => {
				if destination != frame::BROADCAST_ADDRESS {
					app.deliver(source, frame_type, &port.input_buffer[..data_len]);
					port.master_state = MasterState::AnswerDataRequest;
				}
			}
			FrameType::TestRequest => {
				let data = port.input_buffer;
				send_frame(port, transceiver, FrameType::TestResponse, source, &data[..data_len]);
			}
			_ => {}
		}
		if port.master_state != MasterState::AnswerDataRequest {
			port.received_valid_frame = false;
		}
		transition
	} else if port.silence_timer >= port.config.t_no_token_ms {
		port.event_count = 0;
		port.master_state = MasterState::NoToken;
		port.received_invalid_frame = false;
		port.received_valid_frame_not_for_us = false;
		port.received_valid_frame = false;
		true
	} else {
		false
	}
}

fn step_wait_for_reply<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, app: &mut impl ApplicationLink) -> bool {
	if port.silence_timer >= port.config.t_reply_timeout_ms {
		port.frame_count = port.config.max_info_frames;
		port.master_state = MasterState::DoneWithToken;
		return true;
	}
	if port.received_invalid_frame || port.received_valid_frame_not_for_us {
		port.received_invalid_frame = false;
		port.received_valid_frame_not_for_us = false;
		port.master_state = MasterState::DoneWithToken;
		return true;
	}
	if !port.received_valid_frame {
		return false;
	}

	if port.destination_address == port.this_station {
		match port.frame_type {
			FrameType::ReplyPostponed | FrameType::TestResponse => {
				port.master_state = MasterState::DoneWithToken;
			}
			FrameType::Token | FrameType::PollForMaster | FrameType::ReplyToPollForMaster | FrameType::TestRequest => {
				port.master_state = MasterState::Idle;
			}
			_ => {
				let source = port.source_address;
				let frame_type = port.frame_type;
				let data_len = port.data_length as usize;
				app.deliver(source, frame_type, &port.input_buffer[..data_len]);
				port.master_state = MasterState::DoneWithToken;
			}
		}
	} else {
		port.master_state = MasterState::Idle;
	}
	port.received_valid_frame = false;
	true
}

fn step_done_with_token<const RXB: usize, const TXB: usize>(
	port: &mut Port<RXB, TXB>,
	transceiver: &mut impl Transceiver,
	next_poll_station: u8,
	next_this_station: u8,
	next_next_station: u8,
) -> bool {
	if port.frame_count < port.config.max_info_frames {
		port.master_state = MasterState::UseToken;
		return true;
	}
	if !port.sole_master && port.next_station == port.this_station {
		port.poll_station = next_this_station;
		send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
		port.retry_count = 0;
		port.master_state = MasterState::PollForMaster;
		return false;
	}
	if (port.token_count as u16) < port.config.npoll.saturating_sub(1) {
		if port.sole_master && port.next_station != next_this_station {
			port.frame_count = 0;
			port.token_count += 1;
			port.master_state = MasterState::UseToken;
			return true;
		}
		port.token_count += 1;
		send_frame(port, transceiver, FrameType::Token, port.next_station, &[]);
		port.retry_count = 0;
		port.event_count = 0;
		port.master_state = MasterState::PassToken;
		return false;
	}
	if next_poll_station == port.next_station {
		if port.sole_master {
			port.poll_station = next_next_station;
			send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
			port.next_station = port.this_station;
			port.retry_count = 0;
			port.token_count = 1;
			port.master_state = MasterState::PollForMaster;
		} else {
			port.poll_station = port.this_station;
			send_frame(port, transceiver, FrameType::Token, port.next_station, &[]);
			port.retry_count = 0;
			port.token_count = 1;
			port.event_count = 0;
			port.master_state = MasterState::PassToken;
		}
		return false;
	}
	port.poll_station = next_poll_station;
	send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
	port.retry_count = 0;
	port.master_state = MasterState::PollForMaster;
	false
}

fn step_pass_token<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver, next_next_station: u8) -> bool {
	if port.silence_timer <= port.config.t_usage_timeout_ms {
		if (port.event_count as u16) > port.config.nmin_octets {
			port.master_state = MasterState::Idle;
			return true;
		}
		return false;
	}
	if port.retry_count < port.config.nretry_token {
		port.retry_count += 1;
		send_frame(port, transceiver, FrameType::Token, port.next_station, &[]);
		port.event_count = 0;
		false
	} else {
		port.poll_station = next_next_station;
		send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
		port.next_station = port.this_station;
		port.retry_count = 0;
		port.token_count = 0;
		port.master_state = MasterState::PollForMaster;
		false
	}
}

fn step_no_token<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver, next_this_station: u8, max_master: u8) -> bool {
	let my_timeout = port.config.t_no_token_ms + port.config.t_slot_ms * port.this_station as u32;
	if port.silence_timer < my_timeout {
		if (port.event_count as u16) > port.config.nmin_octets {
			port.master_state = MasterState::Idle;
			return true;
		}
		return false;
	}
	let ns_timeout = port.config.t_no_token_ms + port.config.t_slot_ms * (port.this_station as u32 + 1);
	let mm_timeout = port.config.t_no_token_ms + port.config.t_slot_ms * (max_master as u32 + 1);
	if port.silence_timer < ns_timeout || port.silence_timer > mm_timeout {
		port.poll_station = next_this_station;
		send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
		port.next_station = port.this_station;
		port.retry_count = 0;
		port.token_count = 0;
		port.master_state = MasterState::PollForMaster;
		false
	} else if (port.event_count as u16) > port.config.nmin_octets {
		port.master_state = MasterState::Idle;
		true
	} else {
		false
	}
}

fn step_poll_for_master<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver, next_poll_station: u8) -> bool {
	if port.received_valid_frame {
		let transition = if port.destination_address == port.this_station && port.frame_type == FrameType::ReplyToPollForMaster {
			port.sole_master = false;
			port.next_station = port.source_address;
			port.event_count = 0;
			send_frame(port, transceiver, FrameType::Token, port.next_station, &[]);
			port.poll_station = port.this_station;
			port.token_count = 0;
			port.retry_count = 0;
			port.master_state = MasterState::PassToken;
			false
		} else {
			port.master_state = MasterState::Idle;
			true
		};
		port.received_valid_frame = false;
		return transition;
	}

	if port.silence_timer > port.config.t_usage_timeout_ms || port.received_invalid_frame || port.received_valid_frame_not_for_us {
		port.received_invalid_frame = false;
		port.received_valid_frame_not_for_us = false;
		if port.sole_master {
			port.frame_count = 0;
			port.master_state = MasterState::UseToken;
			return true;
		}
		if port.next_station != port.this_station {
			port.event_count = 0;
			send_frame(port, transceiver, FrameType::Token, port.next_station, &[]);
			port.retry_count = 0;
			port.master_state = MasterState::PassToken;
		} else if next_poll_station != port.this_station {
			port.poll_station = next_poll_station;
			send_frame(port, transceiver, FrameType::PollForMaster, port.poll_station, &[]);
			port.retry_count = 0;
		} else {
			port.sole_master = true;
			port.frame_count = 0;
			port.master_state = MasterState::UseToken;
			return true;
		}
	}
	false
}

/// Shared with [`crate::slave`]: both FSMs answer a just-received
/// BACnetDataExpectingReply the same way, since the slave behavior is a
/// strict subset of the master's (§4.5).
pub(crate) fn step_answer_data_request<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver, app: &mut impl ApplicationLink) -> bool {
	port.received_valid_frame = false;
	if let Some(reply) = app.poll_reply() {
		send_frame(port, transceiver, reply.frame_type, reply.destination, &reply.data);
		port.master_state = MasterState::Idle;
		return true;
	}
	if port.silence_timer > port.config.t_reply_delay_ms {
		let source = port.source_address;
		send_frame(port, transceiver, FrameType::ReplyPostponed, source, &[]);
		port.master_state = MasterState::Idle;
		return true;
	}
	false
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::port::PortConfig;
	use crate::transceiver::loopback::{LoopbackTransceiver, Wire};

	struct NullApp;
	impl ApplicationLink for NullApp {
		fn poll_outgoing(&mut self) -> Option<OutgoingPdu> {
			None
		}
		fn deliver(&mut self, _source: u8, _frame_type: FrameType, _data: &[u8]) {}
		fn poll_reply(&mut self) -> Option<OutgoingPdu> {
			None
		}
	}

	struct RecordingApp {
		delivered: Option<(u8, FrameType)>,
	}
	impl ApplicationLink for RecordingApp {
		fn poll_outgoing(&mut self) -> Option<OutgoingPdu> {
			None
		}
		fn deliver(&mut self, source: u8, frame_type: FrameType, _data: &[u8]) {
			self.delivered = Some((source, frame_type));
		}
		fn poll_reply(&mut self) -> Option<OutgoingPdu> {
			None
		}
	}

	fn harness() -> (Port<64, 64>, LoopbackTransceiver) {
		let port = Port::<64, 64>::new(PortConfig { this_station: 3, ..PortConfig::default() });
		let a = Wire::new();
		let b = Wire::new();
		(port, LoopbackTransceiver::new(a, b))
	}

	#[test]
	fn initialize_transitions_straight_to_idle() {
		let (mut port, mut tx) = harness();
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::Idle);
		assert_eq!(port.next_station, 3);
	}

	#[test]
	fn receiving_token_moves_to_use_token() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::Idle;
		port.received_valid_frame = true;
		port.frame_type = FrameType::Token;
		port.destination_address = 3;
		port.source_address = 2;
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::UseToken);
		assert!(!port.sole_master);
	}

	#[test]
	fn use_token_with_nothing_to_send_goes_to_done_with_token() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::UseToken;
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::DoneWithToken);
		assert_eq!(port.frame_count, port.config.max_info_frames);
	}

	#[test]
	fn sole_master_done_with_token_reuses_token_without_passing() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::DoneWithToken;
		port.sole_master = true;
		port.next_station = port.this_station;
		port.frame_count = port.config.max_info_frames;
		port.token_count = 0;
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::UseToken);
	}

	#[test]
	fn silence_past_no_token_timeout_declares_no_token() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::Idle;
		port.silence_timer = port.config.t_no_token_ms + 1;
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::NoToken);
	}

	#[test]
	fn observing_our_own_address_as_a_source_forces_reinitialize() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::Idle;
		port.received_valid_frame = true;
		port.source_address = port.this_station;
		let mut app = NullApp;
		let transition = step(&mut port, &mut tx, &mut app);
		assert!(transition);
		assert_eq!(port.master_state, MasterState::Initialize);
		assert_eq!(port.this_station, crate::frame::BROADCAST_ADDRESS);
	}

	#[test]
	fn broadcast_data_not_expecting_reply_is_still_delivered() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::Idle;
		port.received_valid_frame = true;
		port.frame_type = FrameType::BacnetDataNotExpectingReply;
		port.destination_address = frame::BROADCAST_ADDRESS;
		port.source_address = 2;
		port.data_length = 0;
		let mut app = RecordingApp { delivered: None };
		step(&mut port, &mut tx, &mut app);
		assert_eq!(app.delivered, Some((2, FrameType::BacnetDataNotExpectingReply)));
	}

	#[test]
	fn no_token_state_generates_token_after_slot_timeout() {
		let (mut port, mut tx) = harness();
		port.master_state = MasterState::NoToken;
		port.this_station = 0;
		port.silence_timer = port.config.t_no_token_ms + port.config.t_slot_ms * (port.config.max_master as u32 + 2);
		let mut app = NullApp;
		let _ = step(&mut port, &mut tx, &mut app);
		assert_eq!(port.master_state, MasterState::PollForMaster);
		assert_eq!(port.next_station, port.this_station);
	}
}
