//! AES-128 block cipher (FIPS-197)
//!
//! The cipher state is a 4x4 byte matrix filled column by column from the
//! 16-byte block. Encryption runs an initial `AddRoundKey`, nine full rounds
//! and a final round without `MixColumns`. Decryption applies the inverse
//! steps in exactly the reverse order.
//!
//! The substitution tables are computed at compile time from the
//! multiplicative inverse in GF(2^8) followed by the FIPS-197 affine
//! transform, so they are fixed 256-entry tables with no hand-typed values.

use zeroize::Zeroize;

use crate::error::CryptoError;

/// Cipher block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-128 master key size in bytes
pub const KEY_SIZE: usize = 16;

/// Number of rounds for a 128-bit key
pub const ROUNDS: usize = 10;

/// One 16-byte cipher block
pub type Block = [u8; BLOCK_SIZE];

/// Cipher state, indexed `state[row][column]`
type State = [[u8; 4]; 4];

/// Round constants for the key schedule core
const RCON: [u8; ROUNDS] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80, 0x1B, 0x36];

/// Reduction constant for polynomial doubling in GF(2^8)
const REDUCTION: u8 = 0x1B;

/// Forward substitution table
const SBOX: [u8; 256] = build_sbox();

/// Inverse substitution table
const INV_SBOX: [u8; 256] = invert_table(&SBOX);

/// Multiply by x in GF(2^8).
const fn xtime(a: u8) -> u8 {
    let shifted = a << 1;
    if a & 0x80 == 0 { shifted } else { shifted ^ REDUCTION }
}

/// Multiply two field elements in GF(2^8).
const fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        a = xtime(a);
        b >>= 1;
    }
    product
}

/// Multiplicative inverse in GF(2^8), with 0 mapping to 0.
///
/// Computed as `a^254` since the multiplicative group has order 255.
const fn gf_inverse(a: u8) -> u8 {
    if a == 0 {
        return 0;
    }
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp != 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

const fn build_sbox() -> [u8; 256] {
    let mut sbox = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        let b = gf_inverse(i as u8);
        sbox[i] = b
            ^ b.rotate_left(1)
            ^ b.rotate_left(2)
            ^ b.rotate_left(3)
            ^ b.rotate_left(4)
            ^ 0x63;
        i += 1;
    }
    sbox
}

const fn invert_table(table: &[u8; 256]) -> [u8; 256] {
    let mut inverse = [0u8; 256];
    let mut i = 0usize;
    while i < 256 {
        inverse[table[i] as usize] = i as u8;
        i += 1;
    }
    inverse
}

/// Expanded AES-128 key: 11 round keys.
///
/// Round key 0 is mixed in before the first round, round key 10 in the final
/// round. The schedule is a pure function of the master key and is zeroized
/// on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct RoundKeySchedule {
    round_keys: [Block; ROUNDS + 1],
}

impl RoundKeySchedule {
    /// Expand a master key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeySize` if `master_key` is not 16 bytes
    pub fn expand(master_key: &[u8]) -> Result<Self, CryptoError> {
        let key: &[u8; KEY_SIZE] = master_key.try_into().map_err(|_| {
            CryptoError::InvalidKeySize { expected: KEY_SIZE, actual: master_key.len() }
        })?;
        Ok(Self::from_key(key))
    }

    /// Expand a master key of statically known size.
    pub fn from_key(key: &[u8; KEY_SIZE]) -> Self {
        let mut words = [[0u8; 4]; 4 * (ROUNDS + 1)];

        for (i, word) in words.iter_mut().take(4).enumerate() {
            word.copy_from_slice(&key[4 * i..4 * i + 4]);
        }

        for i in 4..words.len() {
            let mut temp = words[i - 1];
            if i % 4 == 0 {
                // Key schedule core: RotWord, SubWord, Rcon
                temp.rotate_left(1);
                for byte in &mut temp {
                    *byte = SBOX[*byte as usize];
                }
                temp[0] ^= RCON[i / 4 - 1];
            }
            for j in 0..4 {
                words[i][j] = words[i - 4][j] ^ temp[j];
            }
        }

        let mut round_keys = [[0u8; BLOCK_SIZE]; ROUNDS + 1];
        for (round, round_key) in round_keys.iter_mut().enumerate() {
            for w in 0..4 {
                round_key[4 * w..4 * w + 4].copy_from_slice(&words[4 * round + w]);
            }
        }

        words.zeroize();

        Self { round_keys }
    }

    /// Round key for `round` (0..=10). `None` past the final round.
    pub fn round_key(&self, round: usize) -> Option<&Block> {
        self.round_keys.get(round)
    }

    /// All round keys in application order.
    pub fn round_keys(&self) -> &[Block; ROUNDS + 1] {
        &self.round_keys
    }
}

impl std::fmt::Debug for RoundKeySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundKeySchedule").finish_non_exhaustive()
    }
}

impl Drop for RoundKeySchedule {
    fn drop(&mut self) {
        self.round_keys.zeroize();
    }
}

/// AES-128 cipher bound to one expanded key.
#[derive(Debug, Clone)]
pub struct Aes128 {
    schedule: RoundKeySchedule,
}

impl Aes128 {
    /// Create a cipher from a 16-byte master key.
    ///
    /// # Errors
    ///
    /// - `InvalidKeySize` if `key` is not 16 bytes
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self { schedule: RoundKeySchedule::expand(key)? })
    }

    /// Expanded key schedule.
    pub fn schedule(&self) -> &RoundKeySchedule {
        &self.schedule
    }

    /// Encrypt one block.
    pub fn encrypt_block(&self, block: &[u8]) -> Result<Block, CryptoError> {
        encrypt_block(block, &self.schedule)
    }

    /// Decrypt one block.
    pub fn decrypt_block(&self, block: &[u8]) -> Result<Block, CryptoError> {
        decrypt_block(block, &self.schedule)
    }
}

/// Encrypt exactly one 16-byte block.
///
/// # Errors
///
/// - `InvalidBlockSize` if `block` is not 16 bytes. Input is never truncated
///   or padded at this layer.
pub fn encrypt_block(block: &[u8], schedule: &RoundKeySchedule) -> Result<Block, CryptoError> {
    Ok(encrypt_array(as_block(block)?, schedule))
}

/// Decrypt exactly one 16-byte block.
///
/// # Errors
///
/// - `InvalidBlockSize` if `block` is not 16 bytes
pub fn decrypt_block(block: &[u8], schedule: &RoundKeySchedule) -> Result<Block, CryptoError> {
    Ok(decrypt_array(as_block(block)?, schedule))
}

fn as_block(bytes: &[u8]) -> Result<&Block, CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidBlockSize { expected: BLOCK_SIZE, actual: bytes.len() })
}

pub(crate) fn encrypt_array(input: &Block, schedule: &RoundKeySchedule) -> Block {
    let keys = schedule.round_keys();
    let mut state = load_state(input);

    add_round_key(&mut state, &keys[0]);

    for round_key in &keys[1..ROUNDS] {
        sub_bytes(&mut state);
        shift_rows(&mut state);
        mix_columns(&mut state);
        add_round_key(&mut state, round_key);
    }

    sub_bytes(&mut state);
    shift_rows(&mut state);
    add_round_key(&mut state, &keys[ROUNDS]);

    store_state(&state)
}

pub(crate) fn decrypt_array(input: &Block, schedule: &RoundKeySchedule) -> Block {
    let keys = schedule.round_keys();
    let mut state = load_state(input);

    add_round_key(&mut state, &keys[ROUNDS]);

    for round_key in keys[1..ROUNDS].iter().rev() {
        inv_shift_rows(&mut state);
        inv_sub_bytes(&mut state);
        add_round_key(&mut state, round_key);
        inv_mix_columns(&mut state);
    }

    inv_shift_rows(&mut state);
    inv_sub_bytes(&mut state);
    add_round_key(&mut state, &keys[0]);

    store_state(&state)
}

fn load_state(block: &Block) -> State {
    let mut state = [[0u8; 4]; 4];
    for (i, byte) in block.iter().enumerate() {
        state[i % 4][i / 4] = *byte;
    }
    state
}

fn store_state(state: &State) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    for (i, byte) in block.iter_mut().enumerate() {
        *byte = state[i % 4][i / 4];
    }
    block
}

fn add_round_key(state: &mut State, round_key: &Block) {
    for (i, byte) in round_key.iter().enumerate() {
        state[i % 4][i / 4] ^= byte;
    }
}

fn sub_bytes(state: &mut State) {
    for byte in state.iter_mut().flatten() {
        *byte = SBOX[*byte as usize];
    }
}

fn inv_sub_bytes(state: &mut State) {
    for byte in state.iter_mut().flatten() {
        *byte = INV_SBOX[*byte as usize];
    }
}

/// Row `r` rotates left by `r` positions.
fn shift_rows(state: &mut State) {
    for (r, row) in state.iter_mut().enumerate() {
        row.rotate_left(r);
    }
}

fn inv_shift_rows(state: &mut State) {
    for (r, row) in state.iter_mut().enumerate() {
        row.rotate_right(r);
    }
}

fn mix_columns(state: &mut State) {
    for c in 0..4 {
        let a = [state[0][c], state[1][c], state[2][c], state[3][c]];
        state[0][c] = gf_mul(a[0], 2) ^ gf_mul(a[1], 3) ^ a[2] ^ a[3];
        state[1][c] = a[0] ^ gf_mul(a[1], 2) ^ gf_mul(a[2], 3) ^ a[3];
        state[2][c] = a[0] ^ a[1] ^ gf_mul(a[2], 2) ^ gf_mul(a[3], 3);
        state[3][c] = gf_mul(a[0], 3) ^ a[1] ^ a[2] ^ gf_mul(a[3], 2);
    }
}

fn inv_mix_columns(state: &mut State) {
    for c in 0..4 {
        let a = [state[0][c], state[1][c], state[2][c], state[3][c]];
        state[0][c] = gf_mul(a[0], 14) ^ gf_mul(a[1], 11) ^ gf_mul(a[2], 13) ^ gf_mul(a[3], 9);
        state[1][c] = gf_mul(a[0], 9) ^ gf_mul(a[1], 14) ^ gf_mul(a[2], 11) ^ gf_mul(a[3], 13);
        state[2][c] = gf_mul(a[0], 13) ^ gf_mul(a[1], 9) ^ gf_mul(a[2], 14) ^ gf_mul(a[3], 11);
        state[3][c] = gf_mul(a[0], 11) ^ gf_mul(a[1], 13) ^ gf_mul(a[2], 9) ^ gf_mul(a[3], 14);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_from_hex(s: &str) -> Block {
        let bytes = hex::decode(s).unwrap();
        bytes.try_into().unwrap()
    }

    #[test]
    fn sbox_matches_published_entries() {
        assert_eq!(SBOX[0x00], 0x63);
        assert_eq!(SBOX[0x01], 0x7C);
        assert_eq!(SBOX[0x53], 0xED);
        assert_eq!(SBOX[0xFF], 0x16);
        assert_eq!(INV_SBOX[0x00], 0x52);
        assert_eq!(INV_SBOX[0x63], 0x00);
    }

    #[test]
    fn sbox_is_a_permutation() {
        for i in 0..=255u8 {
            assert_eq!(INV_SBOX[SBOX[i as usize] as usize], i);
        }
    }

    #[test]
    fn gf_mul_matches_fips_example() {
        // FIPS-197 section 4.2: {57} x {83} = {c1}
        assert_eq!(gf_mul(0x57, 0x83), 0xC1);
        assert_eq!(xtime(0x57), 0xAE);
        assert_eq!(xtime(0xAE), 0x47);
    }

    #[test]
    fn key_expansion_final_round_key() {
        // FIPS-197 appendix A.1, w[40..44]
        let schedule =
            RoundKeySchedule::expand(&hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap())
                .unwrap();

        assert_eq!(schedule.round_key(0).unwrap(), &block_from_hex("2b7e151628aed2a6abf7158809cf4f3c"));
        assert_eq!(
            schedule.round_key(ROUNDS).unwrap(),
            &block_from_hex("d014f9a8c9ee2589e13f0cc8b6630ca6")
        );
        assert!(schedule.round_key(ROUNDS + 1).is_none());
    }

    #[test]
    fn fips_197_appendix_c1_vector() {
        let cipher = Aes128::new(&hex::decode("000102030405060708090a0b0c0d0e0f").unwrap()).unwrap();
        let plaintext = block_from_hex("00112233445566778899aabbccddeeff");
        let expected = block_from_hex("69c4e0d86a7b0430d8cdb78070b4c55a");

        let ciphertext = cipher.encrypt_block(&plaintext).unwrap();
        assert_eq!(ciphertext, expected);
        assert_eq!(cipher.decrypt_block(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn fips_197_appendix_b_vector() {
        let cipher = Aes128::new(&hex::decode("2b7e151628aed2a6abf7158809cf4f3c").unwrap()).unwrap();
        let plaintext = block_from_hex("3243f6a8885a308d313198a2e0370734");

        let ciphertext = cipher.encrypt_block(&plaintext).unwrap();
        assert_eq!(ciphertext, block_from_hex("3925841d02dc09fbdc118597196a0b32"));
    }

    #[test]
    fn repeated_word_key_roundtrip() {
        let key: Vec<u8> = [0x20, 0x65, 0x0F, 0xB3].repeat(4);
        let schedule = RoundKeySchedule::expand(&key).unwrap();
        let plaintext = b"1234567890123456";

        let ciphertext = encrypt_block(plaintext, &schedule).unwrap();
        assert_ne!(&ciphertext, plaintext);

        let decrypted = decrypt_block(&ciphertext, &schedule).unwrap();
        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn rejects_short_and_long_blocks() {
        let schedule = RoundKeySchedule::from_key(&[0u8; KEY_SIZE]);

        assert_eq!(
            encrypt_block(&[0u8; 15], &schedule),
            Err(CryptoError::InvalidBlockSize { expected: 16, actual: 15 })
        );
        assert_eq!(
            decrypt_block(&[0u8; 17], &schedule),
            Err(CryptoError::InvalidBlockSize { expected: 16, actual: 17 })
        );
        assert!(encrypt_block(&[], &schedule).is_err());
    }

    #[test]
    fn rejects_wrong_key_size() {
        assert_eq!(
            RoundKeySchedule::expand(&[0u8; 24]),
            Err(CryptoError::InvalidKeySize { expected: 16, actual: 24 })
        );
    }

    #[test]
    fn shift_rows_inverts() {
        let mut state = load_state(&block_from_hex("000102030405060708090a0b0c0d0e0f"));
        let original = state;
        shift_rows(&mut state);
        assert_eq!(state[1], [original[1][1], original[1][2], original[1][3], original[1][0]]);
        inv_shift_rows(&mut state);
        assert_eq!(state, original);
    }

    #[test]
    fn mix_columns_inverts() {
        let mut state = load_state(&block_from_hex("db135345f20a225c01010101c6c6c6c6"));
        let original = state;
        mix_columns(&mut state);
        // FIPS-197 test column: db 13 53 45 -> 8e 4d a1 bc
        assert_eq!([state[0][0], state[1][0], state[2][0], state[3][0]], [0x8E, 0x4D, 0xA1, 0xBC]);
        inv_mix_columns(&mut state);
        assert_eq!(state, original);
    }
}
