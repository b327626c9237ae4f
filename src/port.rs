// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The per-interface state block that every FSM in this crate reads and
//! writes. One [`Port`] corresponds to one RS-485 segment; a node with two
//! segments runs two independent `Port`s and two independent [`Scheduler`]
//! entries (see [`crate::scheduler`]).
//!
//! `Port` owns no heap allocations: the receive and transmit scratch
//! buffers are fixed-size arrays sized by the `RXB`/`TXB` const generics,
//! chosen by the caller to match the largest APDU the application layer on
//! top of this node will ever hand down.

use crate::frame::{FrameType, BROADCAST_ADDRESS};

/// Receive FSM states (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
	#[default]
	Idle,
	Preamble,
	Header,
	HeaderCrcReject,
	Data,
	DataCrcReject,
}

/// Master-node FSM states (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterState {
	#[default]
	Initialize,
	Idle,
	UseToken,
	WaitForReply,
	DoneWithToken,
	PassToken,
	NoToken,
	PollForMaster,
	AnswerDataRequest,
}

/// Slave-node FSM states (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlaveState {
	#[default]
	Idle,
	AnswerDataRequest,
}

/// Zero-configuration FSM states (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroConfigState {
	#[default]
	Init,
	Idle,
	Lurk,
	Claim,
	Confirm,
	/// Station address adopted; the FSM is dormant from here on.
	Use,
}

/// Auto-baud detection FSM states (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoBaudState {
	#[default]
	Init,
	Checking,
	Locked,
}

/// One octet's worth of result from the transceiver, fed into the receive
/// FSM on every poll (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEvent {
	Octet(u8),
	Error,
	Timeout,
}

/// Everything the FSMs need to know about a frame that the receive FSM has
/// just finished validating, handed up for dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedFrame {
	pub frame_type: FrameType,
	pub destination: u8,
	pub source: u8,
	pub data_length: u16,
}

/// Tunable timing and addressing parameters (§6.4). All fields are clamped
/// by [`PortConfig::build`] to the ranges the standard allows; out-of-range
/// inputs are silently clamped rather than rejected, since they usually
/// come from a human-edited config file rather than another program.
#[derive(Debug, Clone, Copy)]
pub struct PortConfig {
	pub this_station: u8,
	pub max_master: u8,
	pub max_info_frames: u8,
	pub max_poll_slot: u8,
	pub zero_config_enabled: bool,
	pub slave_node_enabled: bool,
	pub baud_rate: u32,

	/// §6.4 tunables, all milliseconds unless noted.
	pub t_frame_abort_ms: u32,
	pub t_reply_delay_ms: u32,
	pub t_reply_timeout_ms: u32,
	pub t_usage_timeout_ms: u32,
	pub t_no_token_ms: u32,
	pub t_slot_ms: u32,
	pub npoll: u16,
	pub nretry_token: u8,
	pub nmin_octets: u16,
}

impl Default for PortConfig {
	fn default() -> Self {
		Self {
			this_station: 0,
			max_master: 127,
			max_info_frames: 1,
			max_poll_slot: 255,
			zero_config_enabled: false,
			slave_node_enabled: false,
			baud_rate: 38400,
			t_frame_abort_ms: 30,
			t_reply_delay_ms: 225,
			t_reply_timeout_ms: 255,
			t_usage_timeout_ms: 30,
			t_no_token_ms: 500,
			t_slot_ms: 10,
			npoll: 50,
			nretry_token: 1,
			nmin_octets: 4,
		}
	}
}

impl PortConfig {
	/// Clamp and finalize this configuration. `max_master` is clamped to
	/// the valid MAC range (0..=127); `this_station` above 127 forces
	/// `slave_node_enabled`, since only masters participate in the token
	/// ring and slaves may use the full 0..=254 address space. Tunables
	/// outside the ranges in §6.4 reset to their defaults rather than
	/// clamping to the boundary, per "must clamp... to their defaults".
	pub fn build(mut self) -> Self {
		let default = Self::default();
		self.max_master = self.max_master.min(127);
		self.max_poll_slot = self.max_poll_slot.min(255);
		self.max_info_frames = self.max_info_frames.max(1);
		if self.this_station > 127 {
			self.slave_node_enabled = true;
		}
		if !(6..=100).contains(&self.t_frame_abort_ms) {
			self.t_frame_abort_ms = default.t_frame_abort_ms;
		}
		if self.t_reply_delay_ms == 0 || self.t_reply_delay_ms > 250 {
			self.t_reply_delay_ms = default.t_reply_delay_ms;
		}
		if !(20..=300).contains(&self.t_reply_timeout_ms) {
			self.t_reply_timeout_ms = default.t_reply_timeout_ms;
		}
		if !(20..=35).contains(&self.t_usage_timeout_ms) {
			self.t_usage_timeout_ms = default.t_usage_timeout_ms;
		}
		self
	}
}

/// The full per-segment state block (§3).
#[derive(Debug)]
pub struct Port<const RXB: usize, const TXB: usize> {
	pub config: PortConfig,

	// --- addressing & token-ring bookkeeping (§4.4) ---
	pub this_station: u8,
	pub next_station: u8,
	pub poll_station: u8,
	pub sole_master: bool,

	// --- receive FSM (§4.3) ---
	pub receive_state: ReceiveState,
	pub input_buffer: [u8; RXB],
	pub input_length: usize,
	pub header_crc: u8,
	pub data_crc: u16,
	pub frame_type: FrameType,
	pub destination_address: u8,
	pub source_address: u8,
	pub data_length: u16,
	pub index: usize,

	pub received_valid_frame: bool,
	pub received_valid_frame_not_for_us: bool,
	pub received_invalid_frame: bool,

	// --- transmit scratch (owned by caller, written via encode) ---
	pub output_buffer: [u8; TXB],
	pub output_length: usize,

	// --- master FSM (§4.4) ---
	pub master_state: MasterState,
	pub frame_count: u8,
	pub token_count: u8,
	pub retry_count: u8,
	pub event_count: u16,

	// --- slave FSM (§4.5) ---
	pub slave_state: SlaveState,

	// --- timers, all in milliseconds and counting down via tick() ---
	pub silence_timer: u32,
	pub valid_frame_timer: u32,

	// --- zero-config FSM (§4.6) ---
	pub zero_config_state: ZeroConfigState,
	pub zero_config_station: u8,
	pub zero_config_preferred_station: u8,
	pub zero_config_silence: u32,
	pub zero_config_max_master: u8,
	pub zero_config_poll_count: u16,
	pub zero_config_poll_slot: u8,
	/// 128-bit UUIDv4-shaped tie-breaker, stored as big-endian bytes
	/// (`uuid.to_be_bytes()[0]` is the byte the standard calls `UUID[0]`).
	pub uuid: u128,

	// --- auto-baud FSM (§4.7) ---
	pub auto_baud_state: AutoBaudState,
	pub check_auto_baud: bool,
	pub baud_rate_index: usize,
	pub valid_frames_at_rate: u8,
}

impl<const RXB: usize, const TXB: usize> Port<RXB, TXB> {
	pub fn new(config: PortConfig) -> Self {
		let config = config.build();
		Self {
			this_station: config.this_station,
			next_station: config.this_station,
			poll_station: config.this_station,
			sole_master: false,
			receive_state: ReceiveState::default(),
			input_buffer: [0; RXB],
			input_length: 0,
			header_crc: 0,
			data_crc: 0,
			frame_type: FrameType::Token,
			destination_address: BROADCAST_ADDRESS,
			source_address: BROADCAST_ADDRESS,
			data_length: 0,
			index: 0,
			received_valid_frame: false,
			received_valid_frame_not_for_us: false,
			received_invalid_frame: false,
			output_buffer: [0; TXB],
			output_length: 0,
			master_state: MasterState::default(),
			frame_count: 0,
			token_count: 0,
			retry_count: 0,
			event_count: 0,
			slave_state: SlaveState::default(),
			silence_timer: 0,
			valid_frame_timer: 0,
			zero_config_state: ZeroConfigState::default(),
			zero_config_station: config.this_station,
			zero_config_preferred_station: config.this_station,
			zero_config_silence: 0,
			zero_config_max_master: 0,
			zero_config_poll_count: 0,
			zero_config_poll_slot: 1,
			uuid: 0,
			auto_baud_state: AutoBaudState::default(),
			check_auto_baud: false,
			baud_rate_index: 0,
			valid_frames_at_rate: 0,
			config,
		}
	}

	/// Reset the silence timer, §4.3's `SilenceTimerReset`/`SilenceTimer` pair.
	pub fn reset_silence_timer(&mut self) {
		self.silence_timer = 0;
	}

	/// Advance all millisecond timers that count up. Timers that count down
	/// in the original state tables are expressed here as "elapsed since
	/// reset", which every FSM compares against its own threshold constant;
	/// this avoids every FSM needing a separate countdown and avoids
	/// underflow entirely.
	pub fn tick(&mut self, elapsed_ms: u32) {
		self.silence_timer = self.silence_timer.saturating_add(elapsed_ms);
		self.valid_frame_timer = self.valid_frame_timer.saturating_add(elapsed_ms);
		self.zero_config_silence = self.zero_config_silence.saturating_add(elapsed_ms);
	}

	pub fn is_broadcast(&self) -> bool {
		self.destination_address == BROADCAST_ADDRESS
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn config_clamps_max_master_to_valid_mac_range() {
		let cfg = PortConfig { max_master: 250, ..PortConfig::default() }.build();
		assert_eq!(cfg.max_master, 127);
	}

	#[test]
	fn config_above_master_range_enables_slave_mode() {
		let cfg = PortConfig { this_station: 200, ..PortConfig::default() }.build();
		assert!(cfg.slave_node_enabled);
	}

	#[test]
	fn new_port_starts_idle_with_silence_timer_at_zero() {
		let port = Port::<64, 64>::new(PortConfig::default());
		assert_eq!(port.receive_state, ReceiveState::Idle);
		assert_eq!(port.silence_timer, 0);
	}

	#[test]
	fn tick_advances_all_free_running_timers() {
		let mut port = Port::<64, 64>::new(PortConfig::default());
		port.tick(5);
		port.tick(10);
		assert_eq!(port.silence_timer, 15);
		assert_eq!(port.valid_frame_timer, 15);
		assert_eq!(port.zero_config_silence, 15);
	}

	#[test]
	fn reset_silence_timer_zeroes_only_that_timer() {
		let mut port = Port::<64, 64>::new(PortConfig::default());
		port.tick(20);
		port.reset_silence_timer();
		assert_eq!(port.silence_timer, 0);
		assert_eq!(port.valid_frame_timer, 20);
	}
}
