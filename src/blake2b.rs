//! Blake2b-512 hashing as RandomX uses it.
//!
//! The RFC 7693 core comes from the `blake2` crate. What RandomX adds on top
//! is hand-built here: the Argon2d variable-length extension (`H'` in the
//! Argon2 paper) and the byte-oriented random stream that seeds the
//! superscalar generator.

use blake2::digest::{Update, VariableOutput};
use blake2::{Blake2b512, Blake2bVar, Digest};

use crate::error::{Error, Result};

/// Maximum digest size of vanilla Blake2b, in bytes.
pub const MAX_DIGEST_SIZE: usize = 64;

/// Hashes `input` into `output`, whose length selects the digest size.
///
/// `input` must be non-empty and `output` between 1 and 64 bytes; RandomX
/// never uses the key parameter, so it is absent from the contract.
pub fn hash(output: &mut [u8], input: &[u8]) -> Result<()> {
    if input.is_empty() || input.len() >= u32::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "invalid input size: {}",
            input.len()
        )));
    }

    if output.is_empty() || output.len() > MAX_DIGEST_SIZE {
        return Err(Error::InvalidArgument(format!(
            "invalid digest size: {}",
            output.len()
        )));
    }

    let mut hasher = Blake2bVar::new(output.len()).expect("digest size already validated");
    hasher.update(input);
    hasher
        .finalize_variable(output)
        .expect("digest size already validated");

    Ok(())
}

/// Blake2b-512 of `input`, for the internal call sites whose sizes are fixed
/// by the algorithm.
pub(crate) fn hash64(input: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    Digest::update(&mut hasher, input);

    let mut out = [0u8; 64];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// The Argon2d variable-length extension.
///
/// The first 64 bytes of `output` are Blake2b-512 of
/// `(output.len() as u32 LE) || input`; each following step hashes the
/// previous 64-byte window and advances 32 bytes, and the final digest is
/// sized to fill the remainder exactly. Argon2d calls this with a 1024-byte
/// output and a 72-byte input.
pub fn hash_variable(output: &mut [u8], input: &[u8]) -> Result<()> {
    if input.is_empty() || input.len() >= u32::MAX as usize {
        return Err(Error::InvalidArgument(format!(
            "invalid input size: {}",
            input.len()
        )));
    }

    if output.is_empty() {
        return Err(Error::InvalidArgument("invalid digest size: 0".to_string()));
    }

    let digest_size = output.len() as u32;
    let initial_size = output.len().min(MAX_DIGEST_SIZE);

    let mut hasher = Blake2bVar::new(initial_size).expect("digest size already validated");
    hasher.update(&digest_size.to_le_bytes());
    hasher.update(input);
    hasher
        .finalize_variable(&mut output[..initial_size])
        .expect("digest size already validated");

    if output.len() <= MAX_DIGEST_SIZE {
        return Ok(());
    }

    const STEP: usize = MAX_DIGEST_SIZE / 2;
    let mut to_produce = output.len() - STEP;
    let mut offset = STEP;

    while to_produce > MAX_DIGEST_SIZE {
        // The input window overlaps the output window, so it is copied out
        // before the digest lands.
        let mut window = [0u8; MAX_DIGEST_SIZE];
        window.copy_from_slice(&output[offset - STEP..offset - STEP + MAX_DIGEST_SIZE]);
        output[offset..offset + MAX_DIGEST_SIZE].copy_from_slice(&hash64(&window));

        offset += STEP;
        to_produce -= STEP;
    }

    let mut window = vec![0u8; to_produce];
    window.copy_from_slice(&output[offset - STEP..offset - STEP + to_produce]);
    hash(&mut output[offset..offset + to_produce], &window)?;

    Ok(())
}

/// Byte-oriented pseudo-random stream derived from Blake2b-512.
///
/// The seed (truncated to 60 bytes) and a 4-byte little-endian nonce fill a
/// 64-byte state which is immediately rehashed. Draws consume state bytes in
/// order; whenever a draw would run past the end, the whole state is
/// rehashed in place and the position resets.
pub struct Rng {
    state: [u8; 64],
    position: usize,
}

impl Rng {
    const MAX_SEED_SIZE: usize = 60;

    pub fn new(seed: &[u8], nonce: u32) -> Self {
        let size = seed.len().min(Self::MAX_SEED_SIZE);

        let mut state = [0u8; 64];
        state[..size].copy_from_slice(&seed[..size]);
        state[size..size + 4].copy_from_slice(&nonce.to_le_bytes());

        let mut rng = Self { state, position: 0 };
        rng.rehash();
        rng
    }

    pub fn u8(&mut self) -> u8 {
        if self.position + 1 > self.state.len() {
            self.rehash();
        }

        let value = self.state[self.position];
        self.position += 1;
        value
    }

    pub fn u32(&mut self) -> u32 {
        if self.position + 4 > self.state.len() {
            self.rehash();
        }

        let value = u32::from_le_bytes(
            self.state[self.position..self.position + 4]
                .try_into()
                .expect("4-byte window"),
        );
        self.position += 4;
        value
    }

    fn rehash(&mut self) {
        self.state = hash64(&self.state);
        self.position = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_abc() {
        let mut digest = [0u8; 64];
        hash(&mut digest, b"abc").unwrap();

        let expected = hex::decode(
            "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1\
             7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923",
        )
        .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn vector_64_byte_input() {
        let input = hex::decode(
            "3caf6a0f4551dcd8c409a5d504e001ee10225d780af8560d31c5801616e02564\
             6c0c0008b9169f863106a77268f0c84aac1d89e79b376b91a07be842a5377153",
        )
        .unwrap();

        let mut digest = [0u8; 64];
        hash(&mut digest, &input).unwrap();

        let expected = hex::decode(
            "76193888b751abd16fcccbf2f9c78e15fc20c9e6ab32c1a1a90b19fe14190396\
             c1a0e9ea219531bfbfb15568ef3a1c58a81e957a09fbad4256757ecf1b33da49",
        )
        .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn vector_256_byte_input() {
        let input = [0x37u8; 256];

        let mut digest = [0u8; 64];
        hash(&mut digest, &input).unwrap();

        let expected = hex::decode(
            "46b11e36bf69f39244e924e9004de2f392ae482159fc972becbe1794e869866f\
             d3988fe3d28be80791553a6c08abb471da8be22756b370ea2a1acc6deacf2fac",
        )
        .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());
    }

    #[test]
    fn rejects_invalid_sizes() {
        let mut digest = [0u8; 64];
        assert!(matches!(
            hash(&mut digest, b""),
            Err(crate::Error::InvalidArgument(_))
        ));

        let mut oversized = [0u8; 65];
        assert!(matches!(
            hash(&mut oversized, b"abc"),
            Err(crate::Error::InvalidArgument(_))
        ));

        assert!(matches!(
            hash(&mut [], b"abc"),
            Err(crate::Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn rng_draw_sequence() {
        let mut rng = Rng::new(b"test key 000", 0);

        assert_eq!(rng.u8(), 216);
        assert_eq!(rng.u32(), 1645563116);

        // Exhaust the state so the next draw forces a rehash.
        for _ in 0..15 {
            rng.u32();
        }

        assert_eq!(rng.u32(), 3927737455);
    }

    #[test]
    fn rng_nonce_changes_stream() {
        let mut a = Rng::new(b"test key 000", 0);
        let mut b = Rng::new(b"test key 000", 1);
        assert_ne!(a.u32(), b.u32());
    }
}
