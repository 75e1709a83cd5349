//! Per-VM working memory.

use crate::aes;
use crate::error::Result;
use crate::params::SCRATCHPAD_L3_SIZE;

/// 2 MiB of mutable memory seeded by the 1-round AES generator. The seed is
/// overwritten with the generator's final state, chaining it forward.
pub struct Scratchpad {
    memory: Vec<u8>,
}

impl Scratchpad {
    pub fn new(seed: &mut [u8; 64]) -> Result<Self> {
        let mut memory = vec![0u8; SCRATCHPAD_L3_SIZE as usize];
        aes::fill_1r(&mut memory, seed)?;
        Ok(Self { memory })
    }

    /// Reads an 8-byte little-endian value. `offset` must already be masked
    /// to the addressed scratchpad level.
    #[inline(always)]
    pub fn read_u64(&self, offset: u32) -> u64 {
        let offset = offset as usize;
        u64::from_le_bytes(
            self.memory[offset..offset + 8]
                .try_into()
                .expect("8-byte window"),
        )
    }

    #[inline(always)]
    pub fn write_u64(&mut self, offset: u32, value: u64) {
        let offset = offset as usize;
        self.memory[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_chains_forward() {
        let mut seed = [7u8; 64];
        let before = seed;
        let sp = Scratchpad::new(&mut seed).unwrap();

        assert_eq!(sp.as_bytes().len(), SCRATCHPAD_L3_SIZE as usize);
        assert_ne!(seed, before);
        // The final generator state equals the last 64 bytes written.
        assert_eq!(&sp.as_bytes()[sp.as_bytes().len() - 64..], &seed[..]);
    }

    #[test]
    fn read_write_round_trip() {
        let mut seed = [0u8; 64];
        let mut sp = Scratchpad::new(&mut seed).unwrap();

        sp.write_u64(0x1FFFF8, 0x0123456789ABCDEF);
        assert_eq!(sp.read_u64(0x1FFFF8), 0x0123456789ABCDEF);
    }
}
