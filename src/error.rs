// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error taxonomy for the datalink and the confirmed-service dispatcher.
//!
//! `Abort`, `Reject` and `BacnetError` are not tied to any particular wire
//! encoding; they are the abstract reasons a confirmed transaction can fail,
//! matched against BACnet clause 135 Annex. The datalink itself never
//! returns these — framing and CRC failures are counted and folded into the
//! receive FSM's invalid-frame event (see [`crate::receive`]) and never
//! escape to the caller as a `Result::Err`.

use thiserror::Error;

/// Fatal-to-one-transaction reasons, carried in an Abort-PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Abort {
	#[error("buffer overflow")]
	BufferOverflow,
	#[error("invalid APDU in this state")]
	InvalidApduInThisState,
	#[error("preempted by a higher priority task")]
	PreemptedByHigherPriorityTask,
	#[error("segmentation not supported")]
	SegmentationNotSupported,
	#[error("security error")]
	SecurityError,
	#[error("insufficient security")]
	InsufficientSecurity,
	#[error("window size out of range")]
	WindowSizeOutOfRange,
	#[error("application exceeded reply time")]
	ApplicationExceededReplyTime,
	#[error("out of resources")]
	OutOfResources,
	#[error("transaction state manager timeout")]
	TsmTimeout,
	#[error("APDU too long")]
	ApduTooLong,
	#[error("other")]
	Other,
	#[error("proprietary abort code {0}")]
	Proprietary(u8),
}

/// Reasons a peer's request was malformed, carried in a Reject-PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Reject {
	#[error("buffer overflow")]
	BufferOverflow,
	#[error("inconsistent parameters")]
	InconsistentParameters,
	#[error("invalid parameter data type")]
	InvalidParameterDataType,
	#[error("invalid tag")]
	InvalidTag,
	#[error("missing required parameter")]
	MissingRequiredParameter,
	#[error("parameter out of range")]
	ParameterOutOfRange,
	#[error("too many arguments")]
	TooManyArguments,
	#[error("undefined enumeration")]
	UndefinedEnumeration,
	#[error("unrecognized service")]
	UnrecognizedService,
	#[error("invalid data encoding")]
	InvalidDataEncoding,
	#[error("other")]
	Other,
	#[error("proprietary reject code {0}")]
	Proprietary(u8),
}

/// Error classes a well-formed but denied request is reported against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	Device,
	Object,
	Property,
	Resources,
	Security,
	Services,
	Vt,
	Communication,
	Other,
}

/// Error codes; BACnet defines hundreds, only the ones the dispatcher
/// produces directly are enumerated here. Unknown (class, code) pairs
/// observed on the wire are folded to `(Services, Other)` by the decoder
/// that is out of scope for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
	Other,
	UnknownObject,
	UnknownProperty,
	WriteAccessDenied,
	ServiceRequestDenied,
	OperationalProblem,
}

/// A well-formed request that the peer declined to service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{class:?}: {code:?}")]
pub struct BacnetError {
	pub class: ErrorClass,
	pub code: ErrorCode,
}

impl BacnetError {
	pub const fn other() -> Self {
		Self { class: ErrorClass::Services, code: ErrorCode::Other }
	}
}

/// The outcome the TSM reports to the caller for one confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfirmedOutcome {
	#[error("simple-ack")]
	SimpleAck,
	#[error("complex-ack")]
	ComplexAck,
	#[error("error response: {0}")]
	Error(#[from] BacnetError),
	#[error("reject response: {0}")]
	Reject(#[from] Reject),
	#[error("abort response: {0}")]
	Abort(#[from] Abort),
	#[error("timed out waiting for a reply")]
	Timeout,
}

/// Driver/transport level failures — these come from the RS-485 contract
/// (§6.2) or from a caller misusing the port, not from a peer on the bus.
#[derive(Debug, Error)]
pub enum MstpError {
	#[error("output region too small to hold the frame ({needed} > {capacity})")]
	BufferOverflow { needed: usize, capacity: usize },
	#[error("transceiver failed to transmit the full frame ({sent} of {total} octets)")]
	ShortSend { sent: usize, total: usize },
	#[error("invoke-id table is full ({0} outstanding requests)")]
	TsmExhausted(usize),
	#[error("frame type {0} is not valid on the classic (non-COBS) profile")]
	ExtendedFrameRejected(u8),
	#[error("station address {0} is out of range")]
	InvalidStationAddress(u8),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn abort_display_matches_reason() {
		assert_eq!(Abort::TsmTimeout.to_string(), "transaction state manager timeout");
	}

	#[test]
	fn confirmed_outcome_wraps_abort() {
		let outcome: ConfirmedOutcome = Abort::TsmTimeout.into();
		assert_eq!(outcome, ConfirmedOutcome::Abort(Abort::TsmTimeout));
	}

	#[test]
	fn error_other_is_services_other() {
		let e = BacnetError::other();
		assert_eq!(e.class, ErrorClass::Services);
		assert_eq!(e.code, ErrorCode::Other);
	}
}
