//! The cryptographic collaborator interface and the bundled reference
//! suite.
//!
//! The engine is generic over [`CycleCrypto`], which exposes exactly the
//! five operations the protocol needs. Z and X values cross the seam as
//! opaque byte sequences, matching how they travel on the wire; only a
//! suite ever looks inside them.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

mod k256;

pub use self::k256::{DerivedKey, Secp256k1Suite};

use crate::errors::Result;
use rand::{CryptoRng, RngCore};
use std::fmt::Debug;

/// The group key-agreement primitives consumed by the engine.
///
/// Implementations must be deterministic in everything except
/// [`generate_ri`](Self::generate_ri): two participants holding the same
/// inputs must derive the same key.
pub trait CycleCrypto {
    /// A participant's private per-cycle scalar.
    type Scalar;

    /// The raw shared secret, before key derivation.
    type SharedSecret;

    /// The derived symmetric key.
    type Key: Clone + Debug + PartialEq + Eq;

    /// Sample a fresh private scalar for one cycle.
    fn generate_ri<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self::Scalar>;

    /// Compute this participant's public Z value from its scalar.
    fn compute_zi(r: &Self::Scalar) -> Result<Vec<u8>>;

    /// Compute this participant's X value from its scalar and its two
    /// neighbors' Z values in the cycle.
    fn compute_xi(r: &Self::Scalar, z_right: &[u8], z_left: &[u8]) -> Result<Vec<u8>>;

    /// Combine this participant's scalar, its own X value, its left
    /// neighbor's Z value, and the full X array into the shared secret.
    fn compute_shared_secret(
        r: &Self::Scalar,
        x_self: &[u8],
        z_left: &[u8],
        x_array: &[Vec<u8>],
    ) -> Result<Self::SharedSecret>;

    /// Derive the symmetric session key from the shared secret.
    fn derive_key(secret: Self::SharedSecret) -> Result<Self::Key>;
}
