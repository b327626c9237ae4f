// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The TSM-level APDU shapes (§6.3): enough of the application-layer PDU
//! header to demultiplex and to drive retries, without decoding the
//! service-specific payload that belongs to a layer above this crate.

use num_enum::{FromPrimitive, IntoPrimitive};

/// The 4-bit PDU type occupying the top nibble of the first APDU octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum PduType {
	ConfirmedRequest = 0,
	UnconfirmedRequest = 1,
	SimpleAck = 2,
	ComplexAck = 3,
	SegmentAck = 4,
	Error = 5,
	Reject = 6,
	Abort = 7,
	#[num_enum(catch_all)]
	Reserved(u8),
}

bitflags::bitflags! {
	/// Flags packed into the low nibble of a Confirmed-Request's first
	/// octet: segmented PDU, more segments follow, segmented-response
	/// accepted.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct ConfirmedFlags: u8 {
		const SEGMENTED_MESSAGE = 0b0000_1000;
		const MORE_FOLLOWS = 0b0000_0100;
		const SEGMENTED_RESPONSE_ACCEPTED = 0b0000_0010;
	}
}

/// The header fields every APDU carries before its service-specific body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduHeader {
	pub pdu_type: PduType,
	pub flags: ConfirmedFlags,
	/// Absent for Unconfirmed-Request.
	pub invoke_id: Option<u8>,
}

/// Parse the leading octet(s) of an APDU. Returns `None` if `apdu` is empty.
///
/// Segment fields (sequence number, window size) that appear after the
/// invoke-id for segmented PDUs are not parsed here — segmentation is
/// rejected by the dispatcher (§4.9) before those fields would matter.
pub fn parse_header(apdu: &[u8]) -> Option<(ApduHeader, &[u8])> {
	let &first = apdu.first()?;
	let pdu_type = PduType::from(first >> 4);
	let flags = ConfirmedFlags::from_bits_truncate(first & 0x0f);

	match pdu_type {
		PduType::UnconfirmedRequest => Some((ApduHeader { pdu_type, flags, invoke_id: None }, &apdu[1..])),
		PduType::ConfirmedRequest | PduType::SimpleAck | PduType::ComplexAck | PduType::SegmentAck | PduType::Error | PduType::Reject | PduType::Abort => {
			let &invoke_id = apdu.get(1)?;
			Some((ApduHeader { pdu_type, flags, invoke_id: Some(invoke_id) }, &apdu[2..]))
		}
		PduType::Reserved(_) => None,
	}
}

/// The service-choice byte: for Confirmed/Unconfirmed-Request it follows the
/// header immediately (after any segmentation fields, absent here since
/// segmentation is rejected); for Error it follows the error-class/code.
pub fn service_choice(body: &[u8]) -> Option<u8> {
	body.first().copied()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_unconfirmed_request_with_no_invoke_id() {
		let apdu = [0x10, 0x08, 0xAA];
		let (header, rest) = parse_header(&apdu).unwrap();
		assert_eq!(header.pdu_type, PduType::UnconfirmedRequest);
		assert_eq!(header.invoke_id, None);
		assert_eq!(rest, &[0x08, 0xAA]);
	}

	#[test]
	fn parses_confirmed_request_with_invoke_id_and_flags() {
		let apdu = [0x0A, 0x07, 0x0C, 0x01];
		let (header, rest) = parse_header(&apdu).unwrap();
		assert_eq!(header.pdu_type, PduType::ConfirmedRequest);
		assert_eq!(header.invoke_id, Some(0x07));
		assert!(header.flags.contains(ConfirmedFlags::SEGMENTED_RESPONSE_ACCEPTED));
		assert_eq!(rest, &[0x0C, 0x01]);
	}

	#[test]
	fn empty_apdu_has_no_header() {
		assert!(parse_header(&[]).is_none());
	}

	#[test]
	fn reserved_pdu_type_is_rejected() {
		let apdu = [0x80, 0x00];
		assert!(parse_header(&apdu).is_none());
	}
}
