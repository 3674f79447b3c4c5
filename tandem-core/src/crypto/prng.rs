//! PRNG and number-theory utilities for the crypto primitives.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [crypto module]: crate::crypto

use num::{
    bigint::{BigInt, BigUint, Sign},
    integer::Integer,
    traits::{identities::One, identities::Zero},
};
use rand::RngCore;
use rand_chacha::ChaCha20Rng;

const MILLER_RABIN_ROUNDS: usize = 25;

const SMALL_PRIMES: &[u32] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89,
    97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191,
    193, 197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Generates a secure pseudo-random integer.
///
/// Draws from a uniform distribution over the integers between zero (included)
/// and `max_int` (excluded). Employs the `ChaCha20` stream cipher as a PRNG.
pub fn generate_integer(prng: &mut ChaCha20Rng, max_int: &BigUint) -> BigUint {
    if max_int.is_zero() {
        return BigUint::zero();
    }
    let mut bytes = max_int.to_bytes_le();
    let mut rand_int = max_int.clone();
    while &rand_int >= max_int {
        prng.fill_bytes(&mut bytes);
        rand_int = BigUint::from_bytes_le(&bytes);
    }
    rand_int
}

/// Generates a random prime of exactly `bits` bits.
///
/// Candidates have their two top bits set so that the product of two primes
/// generated with the same `bits` has exactly `2 * bits` bits.
pub fn generate_prime(prng: &mut ChaCha20Rng, bits: usize) -> BigUint {
    debug_assert!(bits >= 16, "prime size too small: {} bits", bits);
    let mut bytes = vec![0_u8; (bits + 7) / 8];
    loop {
        prng.fill_bytes(&mut bytes);
        let mut candidate = BigUint::from_bytes_be(&bytes);
        candidate &= (BigUint::one() << bits) - BigUint::one();
        candidate |= BigUint::one();
        candidate |= BigUint::one() << (bits - 1);
        candidate |= BigUint::one() << (bits - 2);
        if is_prime(&candidate, prng) {
            return candidate;
        }
    }
}

/// Miller-Rabin primality test with trial division by small primes.
pub(crate) fn is_prime(candidate: &BigUint, prng: &mut ChaCha20Rng) -> bool {
    for &small in SMALL_PRIMES {
        let small = BigUint::from(small);
        if candidate == &small {
            return true;
        }
        if (candidate % &small).is_zero() {
            return false;
        }
    }

    let one = BigUint::one();
    let two = &one + &one;
    let n_minus_one = candidate - &one;
    // candidate - 1 = d * 2^s with d odd
    let s = n_minus_one.trailing_zeros().unwrap_or(0);
    let d = &n_minus_one >> s;

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = &two + generate_integer(prng, &(candidate - BigUint::from(4_u8)));
        let mut x = a.modpow(&d, candidate);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 1..s {
            x = (&x * &x) % candidate;
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Computes the multiplicative inverse of `a` modulo `modulus`, if it exists.
pub(crate) fn mod_inverse(a: &BigUint, modulus: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let m = BigInt::from_biguint(Sign::Plus, modulus.clone());
    let (g, x) = extended_gcd(&a, &m);
    if !g.is_one() {
        return None;
    }
    x.mod_floor(&m).to_biguint()
}

/// Returns `(gcd(a, b), x)` such that `a*x ≡ gcd(a, b) (mod b)`.
fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_x, mut x) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let q = &old_r / &r;
        let next_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_x = &old_x - &q * &x;
        old_x = std::mem::replace(&mut x, next_x);
    }
    (old_r, old_x)
}
