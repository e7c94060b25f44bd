//! Group key agreement for dynamic peer-to-peer sessions.[^cite]
//!
//! Every member of a session runs an identical [`Participant`] instance.
//! Instances exchange two broadcast messages per rekey cycle and converge on
//! the same symmetric key without any trusted party.
//!
//! # High-level protocol description
//! One run of the protocol (a *cycle*) is identified by its initiator — the
//! participant holding the smallest id in the local roster — and a counter
//! the initiator increments for every rekey:
//! - The initiator snapshots its roster, samples a private scalar, and
//!   broadcasts its public Z value together with the declared membership.
//!   Every receiver that finds itself in the declared membership joins the
//!   cycle and broadcasts its own Z value in turn; a receiver can join off
//!   *any* message for the cycle, so out-of-order delivery is harmless.
//! - Once a participant holds the Z values of the whole declared membership
//!   (and every declared member is locally visible), it combines its two
//!   cycle neighbors' Z values into its X value and broadcasts that.
//! - Once all X values are in, each participant folds them into the shared
//!   secret and derives the session key. The previous key stays reachable so
//!   traffic encrypted under it can still be read.
//!
//! Membership changes simply trigger a new cycle with a larger counter; a
//! newer cycle from the same initiator supersedes an older one wholesale.
//!
//! The crate is a pure state machine: the network transport, the membership
//! service, and the wire framing are collaborators that the host injects
//! (see [`Broadcaster`]) or drives (see [`Participant::process_message`]).
//! The group arithmetic sits behind the [`crypto::CycleCrypto`] trait, with
//! [`crypto::Secp256k1Suite`] as the bundled suite.
//!
//! [^cite]: Mike Burmester and Yvo Desmedt. A Secure and Efficient
//! Conference Key Distribution System. [EUROCRYPT
//! '94](https://link.springer.com/chapter/10.1007/BFb0053443).

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

#![warn(missing_docs)]

pub mod crypto;
mod cycle;
mod errors;
mod messages;
mod participant;
mod protocol;
mod roster;
mod utils;

pub use errors::{CallerError, InternalError, Result};
pub use messages::{CycleHeader, Message, Payload};
pub use participant::{Broadcaster, Participant, StepListener};
pub use protocol::{ParticipantId, SessionKey, Step};
