//! Error types for the key-agreement engine.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::protocol::ParticipantId;
use thiserror::Error;

/// The default Result type used in this crate.
pub type Result<T> = std::result::Result<T, InternalError>;

/// Errors that cannot be recovered within the engine.
///
/// A returned [`InternalError`] means the instance caught a bug in the
/// calling application or in a peer; the in-flight cycle it refers to must
/// be considered dead. Transient conditions (a ripeness precondition not yet
/// met) are never reported as errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InternalError {
    /// An internal invariant of the engine was violated.
    #[error("An internal invariant was violated. This should be impossible; please file a bug")]
    InternalInvariantFailed,

    /// A peer sent material that breaks the protocol rules, such as a value
    /// from a sender outside the declared membership or a second value for a
    /// slot that was already filled.
    #[error("A participant violated the protocol rules (participant: {0:?})")]
    ProtocolError(Option<ParticipantId>),

    /// The calling application made a mistake in how it drives the engine.
    #[error("The calling application made a mistake: {0}")]
    CallingApplicationMistake(#[from] CallerError),
}

/// Errors caused by the calling application.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CallerError {
    /// The operation requires `set_my_id` to have been called first.
    #[error("The local participant id has not been set")]
    ParticipantIdNotSet,

    /// `start` was called by a participant that is not the elected initiator.
    #[error("Only the elected initiator (smallest id in the roster) may start a cycle")]
    NotTheInitiator,

    /// `start` was called with fewer than two members in the roster.
    #[error("A key-agreement cycle requires at least two members")]
    NotEnoughMembers,

    /// A byte sequence could not be decoded into the expected value.
    #[error("Failed to deserialize a value")]
    DeserializationFailed,
}
