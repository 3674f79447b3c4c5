//! Cryptographic primitives of the vertical learning protocol.
//!
//! Two schemes live here, both over big unsigned integers:
//!
//! - `paillier`: an additively homomorphic cryptosystem. Ciphertexts can
//!   be added together and multiplied by plaintext scalars; only the key
//!   owner can decrypt. This is what lets each party fold the peer's
//!   per-sample contributions into its gradient without seeing them.
//! - `blind`: a commutative blinding cipher over a fixed prime group,
//!   used to compare sample identifiers without revealing the ones that
//!   don't match: `E_a(E_b(x)) = E_b(E_a(x))`.
//!
//! # Examples
//! ## Homomorphic addition
//! ```
//! # use num::bigint::BigInt;
//! # use rand::SeedableRng;
//! # use tandem_core::crypto::PaillierKeyPair;
//! let keys = PaillierKeyPair::generate(512);
//! let mut prng = rand_chacha::ChaCha20Rng::from_entropy();
//! let a = keys.public.encrypt(&BigInt::from(20), &mut prng).unwrap();
//! let b = keys.public.encrypt(&BigInt::from(22), &mut prng).unwrap();
//! assert_eq!(keys.secret.decrypt(&keys.public.add(&a, &b)), BigInt::from(42));
//! ```

pub(crate) mod blind;
pub(crate) mod hash;
pub(crate) mod paillier;
pub(crate) mod prng;

pub use self::{
    blind::{decode_id_set, encode_id_set, BlindError, BlindKey, GROUP_ELEMENT_LENGTH},
    hash::Sha256,
    paillier::{
        Ciphertext,
        PaillierError,
        PaillierKeyPair,
        PaillierPublicKey,
        PaillierSecretKey,
        DEFAULT_MODULUS_BITS,
    },
    prng::{generate_integer, generate_prime},
};
