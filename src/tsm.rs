// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The confirmed-request transaction state manager (§4.8): invoke-id
//! allocation, retry/timeout bookkeeping, and demultiplexing inbound
//! acks/errors/rejects/aborts back to the request that originated them.
//!
//! Fixed capacity, no allocation: `MAX_TSM` outstanding requests is a
//! compile-time bound, matching the "function pointer / fixed table"
//! texture the rest of this crate uses for the same reason the original
//! ran on devices with no heap.

use heapless::Vec;

use crate::apdu::{parse_header, PduType};
use crate::error::{Abort, ConfirmedOutcome};

/// Maximum simultaneously outstanding confirmed requests.
pub const MAX_TSM: usize = 8;

/// Maximum size of a retained request APDU, for retransmission.
pub const MAX_APDU: usize = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
	AwaitConfirmation,
}

#[derive(Debug, Clone)]
struct Entry {
	invoke_id: u8,
	destination: u8,
	state: EntryState,
	retained: Vec<u8, MAX_APDU>,
	deadline_ms: u32,
	retries_remaining: u8,
}

/// A completed transaction, ready for the caller to collect via
/// [`TransactionManager::poll_finished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
	pub invoke_id: u8,
	pub outcome: ConfirmedOutcome,
}

/// Something the TSM wants transmitted: either the original request (first
/// send) or a retransmission after a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retransmit {
	pub invoke_id: u8,
	pub destination: u8,
}

#[derive(Debug)]
pub struct TransactionManager {
	entries: Vec<Entry, MAX_TSM>,
	next_invoke_id: u8,
	reply_timeout_ms: u32,
	max_retries: u8,
	finished: Vec<Finished, MAX_TSM>,
}

impl TransactionManager {
	pub fn new(reply_timeout_ms: u32, max_retries: u8) -> Self {
		Self {
			entries: Vec::new(),
			next_invoke_id: 1,
			reply_timeout_ms,
			max_retries,
			finished: Vec::new(),
		}
	}

	fn allocate_invoke_id(&mut self) -> Option<u8> {
		if self.entries.is_full() {
			return None;
		}
		let start = self.next_invoke_id;
		loop {
			let candidate = self.next_invoke_id;
			self.next_invoke_id = self.next_invoke_id.wrapping_add(1);
			if self.next_invoke_id == 0 {
				self.next_invoke_id = 1;
			}
			if !self.entries.iter().any(|e| e.invoke_id == candidate) {
				return Some(candidate);
			}
			if self.next_invoke_id == start {
				return None;
			}
		}
	}

	/// Begin tracking a new confirmed request, retaining `apdu` for
	/// retransmission. Returns the invoke-id assigned, or `None` if the
	/// table is full or the request is too large to retain.
	pub fn begin(&mut self, destination: u8, apdu: &[u8]) -> Option<u8> {
		let invoke_id = self.allocate_invoke_id()?;
		let mut retained = Vec::new();
		retained.extend_from_slice(apdu).ok()?;
		self.entries
			.push(Entry {
				invoke_id,
				destination,
				state: EntryState::AwaitConfirmation,
				retained,
				deadline_ms: self.reply_timeout_ms,
				retries_remaining: self.max_retries,
			})
			.ok()?;
		Some(invoke_id)
	}

	/// The retained request bytes for `invoke_id`, for the caller that just
	/// allocated it to build the actual wire frame.
	pub fn retained(&self, invoke_id: u8) -> Option<&[u8]> {
		self.entries.iter().find(|e| e.invoke_id == invoke_id).map(|e| e.retained.as_slice())
	}

	/// Demultiplex an inbound ack/error/reject/abort APDU. Returns `true`
	/// if it matched an outstanding entry (which is then freed and its
	/// outcome queued for [`poll_finished`](Self::poll_finished)).
	pub fn on_reply(&mut self, apdu: &[u8]) -> bool {
		let Some((header, body)) = parse_header(apdu) else {
			return false;
		};
		let Some(invoke_id) = header.invoke_id else {
			return false;
		};
		let Some(pos) = self.entries.iter().position(|e| e.invoke_id == invoke_id) else {
			return false;
		};

		let outcome = match header.pdu_type {
			PduType::SimpleAck => ConfirmedOutcome::SimpleAck,
			PduType::ComplexAck => ConfirmedOutcome::ComplexAck,
			PduType::Error => crate::error::BacnetError::other().into(),
			PduType::Reject => reject_from_body(body).into(),
			PduType::Abort => abort_from_body(body).into(),
			_ => return false,
		};
		let entry = self.entries.swap_remove(pos);
		let _ = self.finished.push(Finished { invoke_id: entry.invoke_id, outcome });
		true
	}

	/// Advance all deadlines by `elapsed_ms` and return retransmissions
	/// that must go out now. Entries that exhaust their retries are
	/// finished with `ConfirmedOutcome::Timeout` / `Abort::TsmTimeout`.
	pub fn tick(&mut self, elapsed_ms: u32) -> Vec<Retransmit, MAX_TSM> {
		let mut due = Vec::new();
		let mut i = 0;
		while i < self.entries.len() {
			if elapsed_ms >= self.entries[i].deadline_ms {
				if self.entries[i].retries_remaining > 0 {
					self.entries[i].retries_remaining -= 1;
					self.entries[i].deadline_ms = self.reply_timeout_ms;
					let _ = due.push(Retransmit {
						invoke_id: self.entries[i].invoke_id,
						destination: self.entries[i].destination,
					});
					i += 1;
				} else {
					let entry = self.entries.swap_remove(i);
					let _ = self.finished.push(Finished {
						invoke_id: entry.invoke_id,
						outcome: Abort::TsmTimeout.into(),
					});
					// swap_remove pulled the last element into `i`; re-examine it.
				}
			} else {
				self.entries[i].deadline_ms -= elapsed_ms;
				i += 1;
			}
		}
		due
	}

	/// Drain completed transactions for the caller to act on.
	pub fn poll_finished(&mut self) -> Option<Finished> {
		self.finished.pop()
	}

	pub fn outstanding(&self) -> usize {
		self.entries.len()
	}
}

fn reject_from_body(body: &[u8]) -> crate::error::Reject {
	use crate::error::Reject;
	match body.first() {
		Some(0) => Reject::Other,
		Some(1) => Reject::BufferOverflow,
		Some(2) => Reject::InconsistentParameters,
		Some(3) => Reject::InvalidParameterDataType,
		Some(4) => Reject::InvalidTag,
		Some(5) => Reject::MissingRequiredParameter,
		Some(6) => Reject::ParameterOutOfRange,
		Some(7) => Reject::TooManyArguments,
		Some(8) => Reject::UndefinedEnumeration,
		Some(9) => Reject::UnrecognizedService,
		Some(10) => Reject::InvalidDataEncoding,
		Some(&code) => Reject::Proprietary(code),
		None => Reject::Other,
	}
}

fn abort_from_body(body: &[u8]) -> Abort {
	match body.first() {
		Some(0) => Abort::Other,
		Some(1) => Abort::BufferOverflow,
		Some(2) => Abort::InvalidApduInThisState,
		Some(3) => Abort::PreemptedByHigherPriorityTask,
		Some(4) => Abort::SegmentationNotSupported,
		Some(5) => Abort::SecurityError,
		Some(6) => Abort::InsufficientSecurity,
		Some(7) => Abort::WindowSizeOutOfRange,
		Some(8) => Abort::ApplicationExceededReplyTime,
		Some(9) => Abort::OutOfResources,
		Some(10) => Abort::TsmTimeout,
		Some(11) => Abort::ApduTooLong,
		Some(&code) => Abort::Proprietary(code),
		None => Abort::Other,
	}
}
