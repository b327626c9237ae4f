// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The slave-node state machine (§4.5): a cut-down variant for stations
//! that never hold the token. It only reacts to received frames and the
//! reply deadline, reusing the master FSM's Test-Request and
//! answer-data-request handling since this behavior is a strict subset of
//! what [`crate::master`] already does for a token-holding node.

use log::debug;

use crate::frame::{self, FrameType};
use crate::master::{self, ApplicationLink};
use crate::port::{Port, SlaveState};
use crate::transceiver::Transceiver;

/// Advance the slave FSM by one step. Returns `true` if the caller should
/// invoke `step` again immediately.
pub fn step<const RXB: usize, const TXB: usize>(
	port: &mut Port<RXB, TXB>,
	transceiver: &mut impl Transceiver,
	app: &mut impl ApplicationLink,
) -> bool {
	match port.slave_state {
		SlaveState::Idle => step_idle(port, transceiver, app),
		SlaveState::AnswerDataRequest => {
			let transition = master::step_answer_data_request(port, transceiver, app);
			if transition {
				port.slave_state = SlaveState::Idle;
			}
			transition
		}
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
	if !port.received_valid_frame {
		return false;
	}

	let frame_type = port.frame_type;
	let source = port.source_address;
	let destination = port.destination_address;
	let data_len = port.data_length as usize;
	debug!("slave received {frame_type:?} from {source} (dest={destination})");

	match frame_type {
		FrameType::BacnetDataNotExpectingReply | FrameType::BacnetExtendedDataNotExpectingReply => {
			app.deliver(source, frame_type, &port.input_buffer[..data_len]);
		}
		FrameType::BacnetDataExpectingReply | FrameType::BacnetExtendedDataExpectingReply => {
			if destination != frame::BROADCAST_ADDRESS {
				app.deliver(source, frame_type, &port.input_buffer[..data_len]);
				port.received_valid_frame = false;
				port.slave_state = SlaveState::AnswerDataRequest;
				return false;
			}
		}
		FrameType::TestRequest => {
			let data = port.input_buffer;
			master::send_frame(port, transceiver, FrameType::TestResponse, source, &data[..data_len]);
		}
		// Token-ring frames (Token, PollForMaster, ReplyToPollForMaster) are
		// meaningless to a pure slave and are silently ignored, per §4.5.
		_ => {}
	}
	port.received_valid_frame = false;
	false
}
