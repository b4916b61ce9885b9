//! Property-based tests for the cipher, chaining mode, KDF and DHE
//!
//! 1. **Block round-trip**: decrypt(encrypt(b, k), k) == b
//! 2. **CBC round-trip**: holds for every length, including block-aligned
//! 3. **Schedule determinism**: equal keys give equal schedules
//! 4. **KDF determinism**: equal inputs give equal keys
//! 5. **DH symmetry**: both sides compute the same mutual secret
//! 6. **CBC diffusion**: a flipped bit damages at most two blocks and is not
//!    detected

use num_bigint::BigUint;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use veilwire_crypto::{
    BLOCK_SIZE, DheParty, RoundKeySchedule, cbc, decrypt_block, derive_key, encrypt_block,
};

fn block() -> impl Strategy<Value = [u8; 16]> {
    any::<[u8; 16]>()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_block_roundtrip(plaintext in block(), key in block()) {
        let schedule = RoundKeySchedule::from_key(&key);
        let ciphertext = encrypt_block(&plaintext, &schedule).unwrap();
        let decrypted = decrypt_block(&ciphertext, &schedule).unwrap();

        // PROPERTY: block decryption inverts encryption
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn prop_cbc_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..200),
        key in block(),
        iv in block(),
    ) {
        let ciphertext = cbc::encrypt(&plaintext, &key, &iv).unwrap();

        prop_assert_eq!(ciphertext.len(), plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE + BLOCK_SIZE);
        prop_assert_eq!(cbc::decrypt(&ciphertext, &key, &iv).unwrap(), plaintext);
    }

    #[test]
    fn prop_schedule_deterministic(key in block(), other in block()) {
        let a = RoundKeySchedule::from_key(&key);
        let b = RoundKeySchedule::from_key(&key);
        prop_assert_eq!(&a, &b);

        if key != other {
            // Round key 0 is the master key itself
            prop_assert_ne!(&a, &RoundKeySchedule::from_key(&other));
        }
    }

    #[test]
    fn prop_kdf_deterministic(
        secret in prop::collection::vec(any::<u8>(), 16..300),
        salt in prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
        iterations in 0u32..50,
    ) {
        let a = derive_key(&secret, 16, iterations, salt.as_deref()).unwrap();
        let b = derive_key(&secret, 16, iterations, salt.as_deref()).unwrap();
        prop_assert_eq!(a.len(), 16);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_dh_symmetry(e1 in 2u32..1_000_000, e2 in 2u32..1_000_000) {
        // 2^31 - 1 is prime
        let p = BigUint::from(2_147_483_647u32);
        let g = BigUint::from(7u32);

        let alice = DheParty::from_exponent(p.clone(), g.clone(), BigUint::from(e1)).unwrap();
        let bob = DheParty::from_exponent(p, g, BigUint::from(e2)).unwrap();
        let a = alice.public_value();
        let b = bob.public_value();

        prop_assert_eq!(alice.mutual_secret(&b).unwrap(), bob.mutual_secret(&a).unwrap());
    }

    #[test]
    fn prop_cbc_bit_flip_is_local_and_undetected(
        plaintext in prop::collection::vec(any::<u8>(), 48..160),
        key in block(),
        iv in block(),
        bit in 0usize..8,
        block_seed in any::<usize>(),
    ) {
        let mut ciphertext = cbc::encrypt(&plaintext, &key, &iv).unwrap();
        let blocks = ciphertext.len() / BLOCK_SIZE;

        // Stay clear of the last two blocks so the length trailer survives
        let target = block_seed % (blocks - 2);
        ciphertext[target * BLOCK_SIZE] ^= 1 << bit;

        // PROPERTY: no error is raised for the corrupted ciphertext
        let decrypted = cbc::decrypt(&ciphertext, &key, &iv).unwrap();
        prop_assert_eq!(decrypted.len(), plaintext.len());
        prop_assert_ne!(&decrypted, &plaintext);

        // PROPERTY: only the flipped block and its successor differ
        for (index, (got, want)) in
            decrypted.chunks(BLOCK_SIZE).zip(plaintext.chunks(BLOCK_SIZE)).enumerate()
        {
            if index != target && index != target + 1 {
                prop_assert_eq!(got, want, "block {} must be untouched", index);
            }
        }

        // The successor differs in exactly the flipped bit
        let next = target + 1;
        if next * BLOCK_SIZE < plaintext.len() {
            prop_assert_eq!(decrypted[next * BLOCK_SIZE] ^ plaintext[next * BLOCK_SIZE], 1 << bit);
        }
    }
}

#[test]
fn fixed_vector_repeated_word_key() {
    let key: Vec<u8> = [0x20, 0x65, 0x0f, 0xb3].repeat(4);
    let schedule = RoundKeySchedule::expand(&key).unwrap();

    let ciphertext = encrypt_block(b"1234567890123456", &schedule).unwrap();
    assert_ne!(&ciphertext, b"1234567890123456");
    assert_eq!(&decrypt_block(&ciphertext, &schedule).unwrap(), b"1234567890123456");
}

#[test]
fn fixed_vector_small_group() {
    let p = BigUint::from(23u32);
    let g = BigUint::from(5u32);

    let lhs = BigUint::from(5u32).modpow(&BigUint::from(6u32), &p).modpow(&BigUint::from(15u32), &p);
    let rhs = BigUint::from(5u32).modpow(&BigUint::from(15u32), &p).modpow(&BigUint::from(6u32), &p);
    assert_eq!(lhs, rhs);

    let alice = DheParty::from_exponent(p.clone(), g.clone(), BigUint::from(6u32)).unwrap();
    let bob = DheParty::from_exponent(p, g, BigUint::from(15u32)).unwrap();
    let (a, b) = (alice.public_value(), bob.public_value());
    assert_eq!(alice.mutual_secret(&b).unwrap().value(), &lhs);
    assert_eq!(bob.mutual_secret(&a).unwrap().value(), &lhs);
}

#[test]
fn generated_parties_derive_same_key() {
    let mut rng = ChaCha20Rng::seed_from_u64(11);
    let initiator = DheParty::generate(256, 2, &mut rng, || false).unwrap();
    let responder =
        DheParty::with_parameters(initiator.modulus().clone(), initiator.generator().clone(), &mut rng)
            .unwrap();

    let modulus = initiator.modulus().clone();
    let (a, b) = (initiator.public_value(), responder.public_value());
    let s1 = initiator.mutual_secret(&b).unwrap();
    let s2 = responder.mutual_secret(&a).unwrap();

    let k1 = derive_key(&s1.to_padded_bytes(&modulus), 16, 1000, Some(b"seed")).unwrap();
    let k2 = derive_key(&s2.to_padded_bytes(&modulus), 16, 1000, Some(b"seed")).unwrap();
    assert_eq!(k1, k2);
}
