//! Protocol messages exchanged between participants.
//!
//! A message pairs the initiator envelope (which names the cycle and its
//! declared membership) with exactly one of the two public values of the
//! protocol. The engine hands these to the injected broadcast sink and
//! accepts them back from the transport; the wire encoding itself is the
//! transport's concern, which is why everything here is a plain `serde`
//! data type.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::protocol::ParticipantId;
use serde::{Deserialize, Serialize};

/// The initiator envelope carried by every protocol message.
///
/// The envelope is authoritative: a receiver that has never heard of the
/// cycle `(id, counter)` joins it using the membership declared here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleHeader {
    /// The initiator's participant id.
    pub id: ParticipantId,
    /// The initiator's rekey counter for this cycle.
    pub counter: u64,
    /// The membership the initiator declared for this cycle, in cycle order.
    /// Positions in this sequence index the Z and X arrays.
    pub members: Vec<ParticipantId>,
}

/// The protocol value carried by a message: a Z (round one) or an X
/// (round two), as opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// A participant's public Z value.
    Z(Vec<u8>),
    /// A participant's public X value.
    X(Vec<u8>),
}

impl Payload {
    /// The wire discriminator for this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Z(_) => "z",
            Payload::X(_) => "x",
        }
    }

    /// The raw value bytes.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Payload::Z(bytes) | Payload::X(bytes) => bytes,
        }
    }
}

/// A broadcast protocol message.
///
/// The sender's identity is not part of the message; the transport supplies
/// it alongside on delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    header: CycleHeader,
    payload: Payload,
}

impl Message {
    /// Build a round-one message carrying a Z value.
    pub fn z(header: CycleHeader, bytes: Vec<u8>) -> Self {
        Self {
            header,
            payload: Payload::Z(bytes),
        }
    }

    /// Build a round-two message carrying an X value.
    pub fn x(header: CycleHeader, bytes: Vec<u8>) -> Self {
        Self {
            header,
            payload: Payload::X(bytes),
        }
    }

    /// The initiator envelope.
    pub fn header(&self) -> &CycleHeader {
        &self.header
    }

    /// The carried protocol value.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}
