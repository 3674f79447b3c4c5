//! A compact Paillier cryptosystem over `num` big integers.
//!
//! Paillier is additively homomorphic: the product of two ciphertexts
//! decrypts to the sum of their plaintexts, and a ciphertext raised to a
//! plaintext scalar decrypts to the scaled plaintext. Plaintexts are signed
//! integers mapped into `Z_n`, with the upper half of the range decoding as
//! negative values.

use num::{
    bigint::{BigInt, BigUint, Sign},
    integer::Integer,
    traits::{identities::One, identities::Zero},
};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::crypto::prng::{generate_integer, generate_prime, mod_inverse};

/// Default Paillier modulus size in bits.
pub const DEFAULT_MODULUS_BITS: usize = 1024;

/// Errors related to Paillier key handling and encryption.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaillierError {
    #[error("plaintext magnitude exceeds half the key modulus")]
    PlaintextTooLarge,

    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("invalid ciphertext encoding")]
    InvalidCiphertext,
}

/// A Paillier ciphertext: an element of `Z_{n^2}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(BigUint);

impl Ciphertext {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes_be()
    }

    /// Deserializes a ciphertext from its big-endian byte representation.
    ///
    /// # Errors
    /// Fails if the encoding is empty.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PaillierError> {
        if bytes.is_empty() {
            return Err(PaillierError::InvalidCiphertext);
        }
        Ok(Self(BigUint::from_bytes_be(bytes)))
    }
}

/// A Paillier public key, sufficient for encryption and the homomorphic
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaillierPublicKey {
    n: BigUint,
    nn: BigUint,
}

impl PaillierPublicKey {
    fn new(n: BigUint) -> Self {
        let nn = &n * &n;
        Self { n, nn }
    }

    /// Encrypts a signed plaintext under this key.
    ///
    /// # Errors
    /// Fails if the plaintext magnitude exceeds `n / 2`, in which case the
    /// signed decoding on the way back would be ambiguous.
    pub fn encrypt(
        &self,
        plaintext: &BigInt,
        prng: &mut ChaCha20Rng,
    ) -> Result<Ciphertext, PaillierError> {
        let m = self.reduce(plaintext)?;
        let r = loop {
            let candidate = generate_integer(prng, &self.n);
            if !candidate.is_zero() && candidate.gcd(&self.n).is_one() {
                break candidate;
            }
        };
        // with g = n + 1, g^m mod n^2 collapses to 1 + m*n
        let gm = (BigUint::one() + m * &self.n) % &self.nn;
        let rn = r.modpow(&self.n, &self.nn);
        Ok(Ciphertext(gm * rn % &self.nn))
    }

    /// Adds two ciphertexts: `dec(add(a, b)) = dec(a) + dec(b)`.
    pub fn add(&self, a: &Ciphertext, b: &Ciphertext) -> Ciphertext {
        Ciphertext(&a.0 * &b.0 % &self.nn)
    }

    /// Multiplies a ciphertext by a plaintext scalar:
    /// `dec(mul_plain(c, k)) = k * dec(c)`.
    pub fn mul_plain(&self, c: &Ciphertext, k: &BigInt) -> Ciphertext {
        let n = BigInt::from_biguint(Sign::Plus, self.n.clone());
        // k mod n is non-negative, so the unwrap cannot fail
        let exponent = k.mod_floor(&n).to_biguint().unwrap();
        Ciphertext(c.0.modpow(&exponent, &self.nn))
    }

    /// Serializes the key as the big-endian bytes of its modulus.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.n.to_bytes_be()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, PaillierError> {
        if bytes.is_empty() {
            return Err(PaillierError::InvalidPublicKey);
        }
        let n = BigUint::from_bytes_be(bytes);
        if n <= BigUint::from(3_u8) || n.is_even() {
            return Err(PaillierError::InvalidPublicKey);
        }
        Ok(Self::new(n))
    }

    /// Maps a signed plaintext into `Z_n`.
    fn reduce(&self, plaintext: &BigInt) -> Result<BigUint, PaillierError> {
        let magnitude = plaintext.magnitude();
        if magnitude > &(&self.n >> 1) {
            return Err(PaillierError::PlaintextTooLarge);
        }
        Ok(match plaintext.sign() {
            Sign::Minus => &self.n - magnitude,
            _ => magnitude.clone(),
        })
    }

    /// Maps an element of `Z_n` back to a signed plaintext.
    fn to_signed(&self, m: BigUint) -> BigInt {
        if m > (&self.n >> 1) {
            -BigInt::from_biguint(Sign::Plus, &self.n - m)
        } else {
            BigInt::from_biguint(Sign::Plus, m)
        }
    }
}

/// The private half of a Paillier keypair. Never leaves the party that
/// generated it.
#[derive(Debug, Clone)]
pub struct PaillierSecretKey {
    lambda: BigUint,
    mu: BigUint,
    public: PaillierPublicKey,
}

impl PaillierSecretKey {
    /// Decrypts a ciphertext into a signed plaintext.
    pub fn decrypt(&self, c: &Ciphertext) -> BigInt {
        let pk = &self.public;
        let u = (&c.0 % &pk.nn).modpow(&self.lambda, &pk.nn);
        let l = (u - BigUint::one()) / &pk.n;
        pk.to_signed(l * &self.mu % &pk.n)
    }
}

/// A Paillier keypair.
#[derive(Debug, Clone)]
pub struct PaillierKeyPair {
    pub public: PaillierPublicKey,
    pub secret: PaillierSecretKey,
}

impl PaillierKeyPair {
    /// Generates a fresh keypair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Self {
        Self::generate_with_rng(&mut ChaCha20Rng::from_entropy(), bits)
    }

    /// Generates a keypair from the given PRNG, for reproducible keys.
    pub fn generate_with_rng(prng: &mut ChaCha20Rng, bits: usize) -> Self {
        loop {
            let p = generate_prime(prng, bits / 2);
            let q = generate_prime(prng, bits / 2);
            if p == q {
                continue;
            }
            let n = &p * &q;
            let lambda = (&p - BigUint::one()).lcm(&(&q - BigUint::one()));
            // with g = n + 1, L(g^lambda mod n^2) = lambda mod n
            let mu = match mod_inverse(&(&lambda % &n), &n) {
                Some(mu) => mu,
                None => continue,
            };
            let public = PaillierPublicKey::new(n);
            let secret = PaillierSecretKey {
                lambda,
                mu,
                public: public.clone(),
            };
            return Self { public, secret };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed;

    fn keys() -> (PaillierKeyPair, ChaCha20Rng) {
        let mut prng = ChaCha20Rng::from_seed([7_u8; 32]);
        let keys = PaillierKeyPair::generate_with_rng(&mut prng, 256);
        (keys, prng)
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let (keys, mut prng) = keys();
        for value in [0_i64, 1, -1, 42, -42, 1_000_000_007, -1_000_000_007] {
            let plaintext = BigInt::from(value);
            let c = keys.public.encrypt(&plaintext, &mut prng).unwrap();
            assert_eq!(keys.secret.decrypt(&c), plaintext);
        }
    }

    #[test]
    fn test_homomorphic_addition() {
        let (keys, mut prng) = keys();
        let a = keys.public.encrypt(&BigInt::from(1234), &mut prng).unwrap();
        let b = keys.public.encrypt(&BigInt::from(-234), &mut prng).unwrap();
        assert_eq!(
            keys.secret.decrypt(&keys.public.add(&a, &b)),
            BigInt::from(1000)
        );
    }

    #[test]
    fn test_homomorphic_scalar_multiplication() {
        let (keys, mut prng) = keys();
        let c = keys.public.encrypt(&BigInt::from(-13), &mut prng).unwrap();
        assert_eq!(
            keys.secret.decrypt(&keys.public.mul_plain(&c, &BigInt::from(3))),
            BigInt::from(-39)
        );
        assert_eq!(
            keys.secret.decrypt(&keys.public.mul_plain(&c, &BigInt::from(-3))),
            BigInt::from(39)
        );
    }

    #[test]
    fn test_homomorphic_laws_on_fixed_precision_reals() {
        let (keys, mut prng) = keys();
        let x = fixed::encode(0.75, 6).unwrap();
        let y = fixed::encode(-0.25, 6).unwrap();
        let k = fixed::encode(1.5, 6).unwrap();

        let cx = keys.public.encrypt(&x, &mut prng).unwrap();
        let cy = keys.public.encrypt(&y, &mut prng).unwrap();

        let sum = keys.secret.decrypt(&keys.public.add(&cx, &cy));
        assert!((fixed::decode(&sum, 6) - 0.5).abs() < 1e-9);

        // the product of two precision-6 encodings lives at precision 12
        let scaled = keys.secret.decrypt(&keys.public.mul_plain(&cx, &k));
        assert!((fixed::decode(&scaled, 12) - 1.125).abs() < 1e-9);
    }

    #[test]
    fn test_plaintext_too_large_is_rejected() {
        let (keys, mut prng) = keys();
        let too_big = BigInt::from_biguint(Sign::Plus, BigUint::one() << 300);
        assert_eq!(
            keys.public.encrypt(&too_big, &mut prng).unwrap_err(),
            PaillierError::PlaintextTooLarge
        );
    }

    #[test]
    fn test_public_key_serialization() {
        let (keys, _) = keys();
        let bytes = keys.public.to_bytes();
        assert_eq!(PaillierPublicKey::from_slice(&bytes).unwrap(), keys.public);
        assert!(PaillierPublicKey::from_slice(&[]).is_err());
    }
}
