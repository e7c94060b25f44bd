//! Session-level types shared across the engine: participant identities,
//! installed session keys, and the coarse public step.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An identifier for a participant in a session.
///
/// Ids are opaque to the engine except for their ordering: the participant
/// holding the smallest id in the local roster is the elected initiator.
/// Uniqueness within a session is the host's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(u64);

impl ParticipantId {
    /// Wrap a host-assigned integer id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw integer value of this id.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ParticipantId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A symmetric session key, tagged with the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKey<K> {
    initiator: ParticipantId,
    counter: u64,
    key: K,
}

impl<K> SessionKey<K> {
    pub(crate) fn new(initiator: ParticipantId, counter: u64, key: K) -> Self {
        Self {
            initiator,
            counter,
            key,
        }
    }

    /// The initiator of the cycle that derived this key.
    pub fn initiator(&self) -> ParticipantId {
        self.initiator
    }

    /// The initiator's rekey counter for the cycle that derived this key.
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// The key material.
    pub fn key(&self) -> &K {
        &self.key
    }
}

/// The coarse public phase of an engine instance.
///
/// This covers the whole instance, not the progress of any individual cycle
/// record. Observers are notified through
/// [`StepListener`](crate::StepListener) only when the value actually
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No cycle has been observed yet.
    Initialized,
    /// At least one cycle is collecting Z values.
    WaitingZ,
    /// This participant has contributed its X value and is collecting the
    /// remaining ones.
    WaitingX,
    /// A session key is installed. Persists until the next cycle begins.
    Ready,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_order_by_value() {
        let mut ids = vec![
            ParticipantId::new(7),
            ParticipantId::new(2),
            ParticipantId::new(5),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ParticipantId::new(2),
                ParticipantId::new(5),
                ParticipantId::new(7)
            ]
        );
        assert_eq!(ids[0].as_u64(), 2);
    }
}
