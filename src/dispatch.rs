// Licensed under the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>
// or the Apache License, Version 2.0 <LICENSE-APACHE or http://apache.org/licenses/LICENSE-2.0>,
// at your option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Service dispatch (§4.9): demultiplexing an inbound APDU's service-choice
//! byte to a registered handler. The registry is a fixed-size
//! `heapless::Vec` of function pointers, never a boxed-closure map, so
//! dispatch never allocates and the table's capacity is known at compile
//! time.

use heapless::Vec;

use crate::apdu::{parse_header, service_choice, PduType};
use crate::error::{BacnetError, Reject};

/// Maximum number of distinct services a single dispatcher instance can
/// register. Raise this if an application needs more; it only changes the
/// size of the (unallocated) handler table.
pub const MAX_SERVICES: usize = 32;

pub type ServiceChoice = u8;

/// A registered service handler. `confirmed` distinguishes the calling
/// convention: confirmed handlers return a PDU-shaped outcome, unconfirmed
/// handlers are fire-and-forget and ignore their return value's ack/reject
/// distinction (the dispatcher never sends a reply for them).
pub type HandlerFn = fn(invoke_id: Option<u8>, body: &[u8]) -> Result<HandlerAck, BacnetError>;

/// What a handler produced, before the TSM or service encoder turns it into
/// wire bytes — the dispatcher itself never encodes a PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAck {
	Simple,
	/// A complex-ack payload the handler has already rendered into its own
	/// scratch region; the dispatcher only forwards the slice length since
	/// applications own their own scratch region.
	Complex,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
	choice: ServiceChoice,
	confirmed: bool,
	handler: HandlerFn,
}

/// The per-node service registry.
#[derive(Debug, Default)]
pub struct Dispatcher {
	entries: Vec<Entry, MAX_SERVICES>,
}

/// What the dispatcher decided to do with one inbound APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
	/// Unconfirmed service ran; nothing is sent back.
	Handled,
	/// Confirmed service ran and produced an ack.
	Ack(HandlerAck),
	/// The peer's request was malformed or unsupported.
	Rejected(Reject),
	/// The service ran but declined the request.
	Errored(BacnetError),
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a handler for `choice`. Returns `Err(())` if the table is
	/// full; callers register all services once at construction, so this
	/// should never fail in practice.
	pub fn register(&mut self, choice: ServiceChoice, confirmed: bool, handler: HandlerFn) -> Result<(), ()> {
		self.entries.push(Entry { choice, confirmed, handler }).map_err(|_| ())
	}

	/// Dispatch one inbound APDU.
	pub fn dispatch(&self, apdu: &[u8]) -> DispatchOutcome {
		let Some((header, body)) = parse_header(apdu) else {
			return DispatchOutcome::Rejected(Reject::InvalidTag);
		};
		if header.pdu_type != PduType::ConfirmedRequest && header.pdu_type != PduType::UnconfirmedRequest {
			// acks/errors/rejects/aborts are TSM traffic, not dispatch traffic.
			return DispatchOutcome::Rejected(Reject::UnrecognizedService);
		}
		let Some(choice) = service_choice(body) else {
			return DispatchOutcome::Rejected(Reject::MissingRequiredParameter);
		};
		let confirmed = header.pdu_type == PduType::ConfirmedRequest;

		let Some(entry) = self.entries.iter().find(|e| e.choice == choice && e.confirmed == confirmed) else {
			return DispatchOutcome::Rejected(Reject::UnrecognizedService);
		};

		match (entry.handler)(header.invoke_id, &body[1..]) {
			Ok(ack) if confirmed => DispatchOutcome::Ack(ack),
			Ok(_) => DispatchOutcome::Handled,
			Err(e) => DispatchOutcome::Errored(e),
		}
	}
}
