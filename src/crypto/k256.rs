//! Burmester–Desmedt primitives over secp256k1.

// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    crypto::CycleCrypto,
    errors::{CallerError, InternalError, Result},
};
use k256::{
    elliptic_curve::{
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field,
    },
    AffinePoint, EncodedPoint, ProjectivePoint, Scalar,
};
use rand::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_256};
use std::fmt;
use tracing::error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A derived 256-bit session key.
///
/// Note that this type does not derive [`Debug`] directly; the key material
/// is redacted from any formatted output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey(<redacted>)")
    }
}

/// The reference [`CycleCrypto`] suite: the cyclic protocol in the group of
/// points on secp256k1, with SHA3-256 as the key-derivation function.
///
/// Z and X values are SEC1 compressed points. For a cycle of size `n` with
/// this participant at position `i`:
///
/// - `Z_i = r_i · G`
/// - `X_i = r_i · (Z_{i+1} − Z_{i−1})`
/// - `K   = n·r_i · Z_{i−1} + Σ_{j=0}^{n−2} (n−1−j) · X_{i+j}`
///
/// which every honest participant evaluates to the same point
/// `(Σ r_j·r_{j+1}) · G`.
#[derive(Debug, Clone, Copy)]
pub struct Secp256k1Suite;

impl CycleCrypto for Secp256k1Suite {
    type Scalar = Scalar;
    type SharedSecret = ProjectivePoint;
    type Key = DerivedKey;

    fn generate_ri<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Scalar> {
        Ok(<Scalar as Field>::random(rng))
    }

    fn compute_zi(r: &Scalar) -> Result<Vec<u8>> {
        Ok(point_to_bytes(&(ProjectivePoint::GENERATOR * r)))
    }

    fn compute_xi(r: &Scalar, z_right: &[u8], z_left: &[u8]) -> Result<Vec<u8>> {
        let right = point_from_bytes(z_right)?;
        let left = point_from_bytes(z_left)?;
        Ok(point_to_bytes(&((right - left) * r)))
    }

    fn compute_shared_secret(
        r: &Scalar,
        x_self: &[u8],
        z_left: &[u8],
        x_array: &[Vec<u8>],
    ) -> Result<ProjectivePoint> {
        let size = x_array.len();
        let position = x_array
            .iter()
            .position(|x| x.as_slice() == x_self)
            .ok_or_else(|| {
                error!("This participant's X value is missing from the X array");
                InternalError::InternalInvariantFailed
            })?;

        let mut shared = point_from_bytes(z_left)? * (Scalar::from(size as u64) * r);
        for j in 0..size - 1 {
            let x = point_from_bytes(&x_array[(position + j) % size])?;
            shared += x * Scalar::from((size - 1 - j) as u64);
        }
        Ok(shared)
    }

    fn derive_key(secret: ProjectivePoint) -> Result<DerivedKey> {
        let mut digest = Sha3_256::new();
        digest.update(b"cyclic group key agreement v1");
        digest.update(point_to_bytes(&secret));
        Ok(DerivedKey(digest.finalize().into()))
    }
}

/// Serialize a point as SEC1 compressed bytes.
fn point_to_bytes(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

fn point_from_bytes(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).map_err(|_| {
        error!("Failed to decode bytes as a curve point");
        CallerError::DeserializationFailed
    })?;
    let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    match point {
        Some(point) => Ok(ProjectivePoint::from(point)),
        None => {
            error!("Failed to decode bytes as a curve point");
            Err(CallerError::DeserializationFailed)?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn point_byte_conversion_round_trips() {
        let rng = &mut init_testing();
        let point = ProjectivePoint::GENERATOR * <Scalar as Field>::random(rng);
        let bytes = point_to_bytes(&point);
        assert_eq!(bytes.len(), 33);
        let reconstructed = point_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }

    #[test]
    fn malformed_point_bytes_are_rejected() {
        let garbage = point_from_bytes(&[0xab; 33]);
        assert_eq!(
            garbage,
            Err(InternalError::CallingApplicationMistake(
                CallerError::DeserializationFailed
            ))
        );
        assert!(point_from_bytes(&[]).is_err());
    }

    // Runs the whole protocol at the primitive level: every participant in
    // the cycle must evaluate the same shared secret and key.
    #[test]
    fn all_cycle_positions_derive_the_same_key() -> Result<()> {
        let rng = &mut init_testing();

        for size in 2..=6usize {
            let scalars = (0..size)
                .map(|_| Secp256k1Suite::generate_ri(rng))
                .collect::<Result<Vec<_>>>()?;
            let z_values = scalars
                .iter()
                .map(Secp256k1Suite::compute_zi)
                .collect::<Result<Vec<_>>>()?;
            let x_values = (0..size)
                .map(|i| {
                    Secp256k1Suite::compute_xi(
                        &scalars[i],
                        &z_values[(i + 1) % size],
                        &z_values[(size + i - 1) % size],
                    )
                })
                .collect::<Result<Vec<_>>>()?;

            let keys = (0..size)
                .map(|i| {
                    let shared = Secp256k1Suite::compute_shared_secret(
                        &scalars[i],
                        &x_values[i],
                        &z_values[(size + i - 1) % size],
                        &x_values,
                    )?;
                    Secp256k1Suite::derive_key(shared)
                })
                .collect::<Result<Vec<_>>>()?;

            assert!(
                keys.windows(2).all(|pair| pair[0] == pair[1]),
                "participants disagreed on the key for a cycle of {size}"
            );
        }
        Ok(())
    }
}
