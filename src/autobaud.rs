// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Auto-baud detection (§4.7): cycle through the standard rate set until
//! four valid frames in a row are seen at one rate, then lock it.

use log::info;

use crate::port::{AutoBaudState, Port};
use crate::transceiver::Transceiver;

/// The standard MS/TP baud rates, in the order the detector cycles through
/// them.
pub const BAUD_RATES: [u32; 6] = [115200, 76800, 57600, 38400, 19200, 9600];

/// How long to wait at one candidate rate before moving to the next.
pub const VALID_FRAME_TIMEOUT_MS: u32 = 5_000;

/// Consecutive valid frames required to lock a rate.
pub const REQUIRED_VALID_FRAMES: u8 = 4;

/// Advance the auto-baud FSM by one step. No-op once the rate is locked;
/// callers check `port.check_auto_baud` to know whether to keep calling
/// this instead of (or before) the master/slave FSM.
pub fn step<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	if !port.check_auto_baud {
		return;
	}
	match port.auto_baud_state {
		AutoBaudState::Init => {
			port.valid_frames_at_rate = 0;
			port.baud_rate_index = 0;
			port.valid_frame_timer = 0;
			transceiver.set_baud(BAUD_RATES[0]);
			port.auto_baud_state = AutoBaudState::Checking;
		}
		AutoBaudState::Checking => step_checking(port, transceiver),
		AutoBaudState::Locked => {}
	}
}

fn step_checking<const RXB: usize, const TXB: usize>(port: &mut Port<RXB, TXB>, transceiver: &mut impl Transceiver) {
	if port.received_valid_frame {
		port.valid_frames_at_rate += 1;
		port.received_valid_frame = false;
		if port.valid_frames_at_rate >= REQUIRED_VALID_FRAMES {
			port.check_auto_baud = false;
			port.auto_baud_state = AutoBaudState::Locked;
			info!("auto-baud locked at {} bps", transceiver.baud());
		}
	} else if port.received_invalid_frame {
		port.valid_frames_at_rate = 0;
		port.received_invalid_frame = false;
	} else if port.valid_frame_timer >= VALID_FRAME_TIMEOUT_MS {
		port.baud_rate_index = (port.baud_rate_index + 1) % BAUD_RATES.len();
		transceiver.set_baud(BAUD_RATES[port.baud_rate_index]);
		port.valid_frames_at_rate = 0;
		port.valid_frame_timer = 0;
	}
}
