//! Constructors for transports decoding inbound events.
//!
//! Client code never needs this module: a [`CallbackId`] to put in a request
//! comes from registering a callback, which keeps every id on the wire tied
//! to a live registration.

use crate::callback::CallbackId;

/// Rebuild the [`CallbackId`] carried by an inbound event.
pub fn callback_id_from_wire(raw: u32) -> CallbackId {
    CallbackId::from_wire(raw)
}
