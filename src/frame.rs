// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The MS/TP wire frame: its header layout (§6.1) and the encoder that the
//! master/slave FSMs call through to put a frame on the wire. The decoder
//! side lives in [`crate::receive`], since decoding is inherently
//! byte-at-a-time and stateful; this module only builds frames going out.

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::crc::{crc16_data, crc8_header, DATA_CRC_SEED, HEADER_CRC_SEED};
use crate::error::MstpError;

/// Broadcast MAC address; never a valid `this_station`.
pub const BROADCAST_ADDRESS: u8 = 255;

/// Preamble octets that open every frame.
pub const PREAMBLE: [u8; 2] = [0x55, 0xFF];

/// Fixed header size: preamble(2) + type(1) + dest(1) + src(1) + len(2) + hcrc(1).
pub const HEADER_SIZE: usize = 8;

/// Trailing CRC size for a frame carrying data.
pub const DATA_CRC_SIZE: usize = 2;

/// Largest data length on the classic (non-COBS) profile, per §6.1.
pub const MAX_CLASSIC_DATA_LENGTH: usize = 1476;

/// First frame-type code in the COBS-extended band.
pub const FIRST_EXTENDED_FRAME_TYPE: u8 = 32;
/// Last frame-type code reserved for COBS-extended / IPv6 use, per §6.1.
pub const LAST_EXTENDED_FRAME_TYPE: u8 = 34;

/// The frame-type octet, §6.1.
///
/// Values 8..31 are reserved by the standard and decode to [`FrameType::Reserved`];
/// 128 and above are vendor-proprietary and decode to [`FrameType::Proprietary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum FrameType {
	Token = 0,
	PollForMaster = 1,
	ReplyToPollForMaster = 2,
	TestRequest = 3,
	TestResponse = 4,
	BacnetDataExpectingReply = 5,
	BacnetDataNotExpectingReply = 6,
	ReplyPostponed = 7,
	BacnetExtendedDataExpectingReply = 32,
	BacnetExtendedDataNotExpectingReply = 33,
	Ipv6Encapsulation = 34,
	Proprietary = 128,
	#[num_enum(catch_all)]
	Reserved(u8),
}

impl FrameType {
	/// Whether this type is in the COBS-encoded extended band (§4.2, §6.1).
	pub fn is_extended(self) -> bool {
		matches!(
			u8::from(self),
			FIRST_EXTENDED_FRAME_TYPE..=LAST_EXTENDED_FRAME_TYPE
		)
	}

	/// Whether the master FSM expects a reply after sending this type.
	pub fn expects_reply(self) -> bool {
		matches!(
			self,
			FrameType::BacnetDataExpectingReply
				| FrameType::BacnetExtendedDataExpectingReply
				| FrameType::TestRequest
		)
	}
}

/// A decoded/to-be-encoded MS/TP frame, borrowing its data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
	pub frame_type: FrameType,
	pub destination: u8,
	pub source: u8,
	pub data: &'a [u8],
}

impl<'a> Frame<'a> {
	pub fn new(frame_type: FrameType, destination: u8, source: u8, data: &'a [u8]) -> Self {
		Self { frame_type, destination, source, data }
	}

	/// Whether `self.destination` matches `this_station`, i.e. whether the
	/// frame is "for us" under the address-match rule of §4.3.
	pub fn is_for(self, this_station: u8) -> bool {
		self.destination == this_station || self.destination == BROADCAST_ADDRESS
	}
}

/// Encode `frame` into `buffer`, returning the number of octets written.
///
/// Classic (non-COBS) frame types are written verbatim per §4.2: preamble,
/// header, header CRC, data, trailing CRC-16 (little-endian). Extended
/// (COBS) frame types are rejected here — [`encode_extended`] handles them,
/// since they require a caller that opts into the extended profile.
pub fn encode(buffer: &mut [u8], frame: Frame<'_>) -> Result<usize, MstpError> {
	if frame.frame_type.is_extended() {
		return Err(MstpError::ExtendedFrameRejected(frame.frame_type.into()));
	}
	let total = HEADER_SIZE + frame.data.len() + if frame.data.is_empty() { 0 } else { DATA_CRC_SIZE };
	if buffer.len() < total {
		return Err(MstpError::BufferOverflow { needed: total, capacity: buffer.len() });
	}

	buffer[0..2].copy_from_slice(&PREAMBLE);
	buffer[2] = frame.frame_type.into();
	buffer[3] = frame.destination;
	buffer[4] = frame.source;
	let len = frame.data.len() as u16;
	buffer[5] = (len >> 8) as u8;
	buffer[6] = (len & 0xff) as u8;
	let header_crc = !crc8_header_range(&buffer[2..7]);
	buffer[7] = header_crc;

	if !frame.data.is_empty() {
		buffer[HEADER_SIZE..HEADER_SIZE + frame.data.len()].copy_from_slice(frame.data);
		let data_crc = !crc16_data_range(frame.data);
		buffer[HEADER_SIZE + frame.data.len()] = (data_crc & 0xff) as u8;
		buffer[HEADER_SIZE + frame.data.len() + 1] = (data_crc >> 8) as u8;
	}

	Ok(total)
}

/// Encode an extended-band frame by COBS-encoding `frame.data` and placing
/// the COBS length (minus two, per §4.2) in the 16-bit length field.
///
/// The COBS payload itself carries its own integrity check (corncobs embeds
/// none; callers that need CRC-32 coverage over the decoded payload must
/// apply it before calling this function, matching the "accommodates CRC-32
/// coverage" language in §4.2).
pub fn encode_extended(buffer: &mut [u8], frame_type: FrameType, destination: u8, source: u8, payload: &[u8]) -> Result<usize, MstpError> {
	if !frame_type.is_extended() {
		return Err(MstpError::ExtendedFrameRejected(frame_type.into()));
	}
	let max_cobs = corncobs::max_encoded_len(payload.len());
	let needed = HEADER_SIZE + max_cobs;
	if buffer.len() < needed {
		return Err(MstpError::BufferOverflow { needed, capacity: buffer.len() });
	}

	let cobs_len = corncobs::encode_buf(payload, &mut buffer[HEADER_SIZE..]);
	let wire_len = (cobs_len - 2) as u16;

	buffer[0..2].copy_from_slice(&PREAMBLE);
	buffer[2] = frame_type.into();
	buffer[3] = destination;
	buffer[4] = source;
	buffer[5] = (wire_len >> 8) as u8;
	buffer[6] = (wire_len & 0xff) as u8;
	buffer[7] = !crc8_header_range(&buffer[2..7]);

	Ok(HEADER_SIZE + cobs_len)
}

fn crc8_header_range(octets: &[u8]) -> u8 {
	octets.iter().fold(HEADER_CRC_SEED, |crc, &b| crc8_header(b, crc))
}

fn crc16_data_range(octets: &[u8]) -> u16 {
	octets.iter().fold(DATA_CRC_SEED, |crc, &b| crc16_data(b, crc))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_hand_off_is_exact_wire_form() {
		// Scenario 3 in §8: node 0 passing the token to node 1.
		let mut buf = [0u8; 16];
		let n = encode(&mut buf, Frame::new(FrameType::Token, 1, 0, &[])).unwrap();
		assert_eq!(&buf[..n], &[0x55, 0xFF, 0x00, 0x01, 0x00, 0x00, 0x00, 0x73]);
	}

	#[test]
	fn data_frame_round_trips_header_and_crc() {
		let mut buf = [0u8; 32];
		let data = [0xDE, 0xAD, 0xBE, 0xEF];
		let n = encode(&mut buf, Frame::new(FrameType::BacnetDataExpectingReply, 10, 3, &data)).unwrap();
		assert_eq!(n, HEADER_SIZE + data.len() + DATA_CRC_SIZE);
		assert_eq!(&buf[0..2], &PREAMBLE);
		assert_eq!(buf[2], FrameType::BacnetDataExpectingReply.into());
		assert_eq!(buf[3], 10);
		assert_eq!(buf[4], 3);
		assert_eq!(u16::from_be_bytes([buf[5], buf[6]]), data.len() as u16);

		// header CRC residue over the six header bytes (incl. transmitted CRC)
		let residue = crc8_header_range(&buf[2..HEADER_SIZE]);
		assert_eq!(residue, crate::crc::HEADER_CRC_GOOD);
	}

	#[test]
	fn encode_rejects_buffer_too_small() {
		let mut buf = [0u8; 4];
		let err = encode(&mut buf, Frame::new(FrameType::Token, 1, 0, &[])).unwrap_err();
		assert!(matches!(err, MstpError::BufferOverflow { .. }));
	}

	#[test]
	fn classic_encoder_rejects_extended_types() {
		let mut buf = [0u8; 32];
		let err = encode(&mut buf, Frame::new(FrameType::BacnetExtendedDataNotExpectingReply, 1, 0, &[])).unwrap_err();
		assert!(matches!(err, MstpError::ExtendedFrameRejected(_)));
	}

	#[test]
	fn frame_type_round_trips_through_num_enum() {
		assert_eq!(FrameType::from(0u8), FrameType::Token);
		assert_eq!(FrameType::from(200u8), FrameType::Reserved(200));
		assert!(FrameType::BacnetExtendedDataExpectingReply.is_extended());
		assert!(!FrameType::Token.is_extended());
	}

	#[test]
	fn is_for_matches_broadcast_and_exact_address() {
		let f = Frame::new(FrameType::Token, BROADCAST_ADDRESS, 0, &[]);
		assert!(f.is_for(9));
		let f = Frame::new(FrameType::Token, 9, 0, &[]);
		assert!(f.is_for(9));
		assert!(!f.is_for(8));
	}
}
