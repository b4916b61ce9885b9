//! Finite-field Diffie-Hellman
//!
//! The initiator generates a fresh prime modulus per handshake and sends
//! `(p, g, g^e mod p)`. The responder reuses `(p, g)` with its own exponent.
//! Both sides compute `peer^e mod p` and feed it to [`crate::kdf`].
//!
//! # Invariants
//!
//! - The secret exponent never leaves [`DheParty`]. It is drawn from
//!   `[2, p-2]` and has no accessor.
//! - [`DheParty::mutual_secret`] consumes the party, so an exponent cannot be
//!   used for a second agreement.
//! - Public values outside `[2, p-2]` are rejected. `0`, `1` and `p-1` would
//!   force the mutual secret into a set of at most two values.

use std::fmt;

use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Smallest modulus [`generate_prime`] will produce
pub const MIN_PRIME_BITS: u64 = 16;

/// Miller-Rabin rounds used by [`generate_prime`]
pub const DEFAULT_PRIMALITY_ROUNDS: usize = 40;

/// Primes below 200 for cheap trial division
const SMALL_PRIMES: [u32; 46] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199,
];

/// Generate a random probable prime of exactly `bits` bits.
///
/// Candidates are odd with the top bit set. Each candidate goes through
/// trial division by [`SMALL_PRIMES`] and then Miller-Rabin.
/// `is_cancelled` is polled between candidates.
///
/// # Errors
///
/// - `InvalidParameter` if `bits` is below [`MIN_PRIME_BITS`]
/// - `Cancelled` if `is_cancelled` returned true
pub fn generate_prime<R, F>(bits: u64, rng: &mut R, is_cancelled: F) -> Result<BigUint, CryptoError>
where
    R: RngCore + CryptoRng,
    F: Fn() -> bool,
{
    if bits < MIN_PRIME_BITS {
        return Err(CryptoError::InvalidParameter {
            reason: format!("prime size {bits} below minimum {MIN_PRIME_BITS} bits"),
        });
    }

    let top_bit = BigUint::one() << (bits - 1);
    loop {
        if is_cancelled() {
            return Err(CryptoError::Cancelled);
        }

        let mut candidate = rng.gen_biguint(bits);
        candidate |= &top_bit;
        candidate |= BigUint::one();

        if is_probable_prime(&candidate, DEFAULT_PRIMALITY_ROUNDS, rng) {
            return Ok(candidate);
        }
    }
}

/// Miller-Rabin with `rounds` random bases, after small-prime trial division.
///
/// Composite inputs pass with probability at most `4^-rounds`.
pub fn is_probable_prime<R>(n: &BigUint, rounds: usize, rng: &mut R) -> bool
where
    R: RngCore + CryptoRng,
{
    let two = BigUint::from(2u32);
    if n < &two {
        return false;
    }

    for &small in &SMALL_PRIMES {
        let small = BigUint::from(small);
        if *n == small {
            return true;
        }
        if (n % &small).is_zero() {
            return false;
        }
    }

    let n_minus_one = n - 1u32;
    let Some(shift) = n_minus_one.trailing_zeros() else {
        return false;
    };
    let odd_part = &n_minus_one >> shift;

    'witness: for _ in 0..rounds {
        let base = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = base.modpow(&odd_part, n);
        if x.is_one() || x == n_minus_one {
            continue;
        }
        for _ in 1..shift {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }

    true
}

/// Check that `value` lies in `[2, p-2]`.
///
/// # Errors
///
/// - `InvalidParameter` if it does not, or if `p` is too small to have such
///   values
pub fn validate_public_value(modulus: &BigUint, value: &BigUint) -> Result<(), CryptoError> {
    let upper = checked_upper_bound(modulus)?;
    if value < &BigUint::from(2u32) || value > &upper {
        return Err(CryptoError::InvalidParameter {
            reason: "public value outside [2, p-2]".to_string(),
        });
    }
    Ok(())
}

/// `p - 2`, or an error if `p < 5`.
fn checked_upper_bound(modulus: &BigUint) -> Result<BigUint, CryptoError> {
    if modulus < &BigUint::from(5u32) || modulus.is_even() {
        return Err(CryptoError::InvalidParameter {
            reason: "modulus must be an odd prime of at least 5".to_string(),
        });
    }
    Ok(modulus - 2u32)
}

/// One side of a Diffie-Hellman exchange.
pub struct DheParty {
    modulus: BigUint,
    generator: BigUint,
    secret_exponent: BigUint,
}

impl DheParty {
    /// Initiator: generate a fresh `bits`-bit prime and a secret exponent.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for a bad size or generator
    /// - `Cancelled` if prime generation was cancelled
    pub fn generate<R, F>(
        bits: u64,
        generator: u32,
        rng: &mut R,
        is_cancelled: F,
    ) -> Result<Self, CryptoError>
    where
        R: RngCore + CryptoRng,
        F: Fn() -> bool,
    {
        let modulus = generate_prime(bits, rng, is_cancelled)?;
        Self::with_parameters(modulus, BigUint::from(generator), rng)
    }

    /// Responder: adopt the peer's `(p, g)` and draw a secret exponent.
    ///
    /// Does not test `p` for primality; callers that received `p` from the
    /// network run [`is_probable_prime`] first.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `p < 5`, `p` is even, or `g` is outside
    ///   `[2, p-2]`
    pub fn with_parameters<R>(
        modulus: BigUint,
        generator: BigUint,
        rng: &mut R,
    ) -> Result<Self, CryptoError>
    where
        R: RngCore + CryptoRng,
    {
        let upper = checked_upper_bound(&modulus)?;
        validate_generator(&modulus, &generator)?;

        // Range upper bound is exclusive
        let secret_exponent = rng.gen_biguint_range(&BigUint::from(2u32), &(upper + 1u32));
        Ok(Self { modulus, generator, secret_exponent })
    }

    /// Build a party from a known exponent. Used for fixed test vectors.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if any value is out of range
    pub fn from_exponent(
        modulus: BigUint,
        generator: BigUint,
        secret_exponent: BigUint,
    ) -> Result<Self, CryptoError> {
        validate_generator(&modulus, &generator)?;
        validate_public_value(&modulus, &secret_exponent).map_err(|_| {
            CryptoError::InvalidParameter { reason: "exponent outside [2, p-2]".to_string() }
        })?;
        Ok(Self { modulus, generator, secret_exponent })
    }

    /// The modulus `p`.
    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    /// The generator `g`.
    pub fn generator(&self) -> &BigUint {
        &self.generator
    }

    /// `g^e mod p`
    pub fn public_value(&self) -> BigUint {
        self.generator.modpow(&self.secret_exponent, &self.modulus)
    }

    /// Compute `peer^e mod p`, consuming this party.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` if `peer_public` is outside `[2, p-2]`
    pub fn mutual_secret(self, peer_public: &BigUint) -> Result<MutualSecret, CryptoError> {
        validate_public_value(&self.modulus, peer_public)?;
        Ok(MutualSecret(peer_public.modpow(&self.secret_exponent, &self.modulus)))
    }
}

impl fmt::Debug for DheParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DheParty")
            .field("modulus_bits", &self.modulus.bits())
            .field("generator", &self.generator)
            .field("secret_exponent", &"[REDACTED]")
            .finish()
    }
}

fn validate_generator(modulus: &BigUint, generator: &BigUint) -> Result<(), CryptoError> {
    validate_public_value(modulus, generator).map_err(|_| CryptoError::InvalidParameter {
        reason: "generator outside [2, p-2]".to_string(),
    })
}

/// Shared Diffie-Hellman result `peer^e mod p`
#[derive(Clone, PartialEq, Eq)]
pub struct MutualSecret(BigUint);

impl MutualSecret {
    /// The secret as an integer.
    pub fn value(&self) -> &BigUint {
        &self.0
    }

    /// Big-endian bytes, left-padded with zeros to the byte length of
    /// `modulus`.
    ///
    /// Fixed width keeps the KDF input identical on both sides even when the
    /// secret happens to have leading zero bytes.
    pub fn to_padded_bytes(&self, modulus: &BigUint) -> Zeroizing<Vec<u8>> {
        let width = modulus.bits().div_ceil(8) as usize;
        let raw = Zeroizing::new(self.0.to_bytes_be());
        let mut padded = Zeroizing::new(vec![0u8; width.saturating_sub(raw.len())]);
        padded.extend_from_slice(&raw);
        padded
    }
}

impl fmt::Debug for MutualSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MutualSecret([REDACTED])")
    }
}
