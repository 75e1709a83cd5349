//! Public hashing interface.

use tracing::info;

use crate::argon2d;
use crate::blake2b;
use crate::dataset::{self, Dataset};
use crate::error::Result;
use crate::params::{
    ARGON2D_SALT, BLOCK_TEMPLATE_NONCE_OFFSET, BLOCK_TEMPLATE_SIZE, CACHE_ACCESSES,
};
use crate::superscalar;
use crate::vm::Vm;

/// A keyed RandomX hasher.
///
/// Construction fills the 256 MiB cache with Argon2d and expands the 2 GiB
/// dataset from it; both are immutable afterwards and shared by every hash
/// under the same key. Hashing itself is single-threaded per call; separate
/// `run` calls on one `Hasher` may execute concurrently, each on its own
/// scratchpad.
pub struct Hasher {
    key: Vec<u8>,
    dataset: Dataset,
}

impl Hasher {
    /// Builds the cache and dataset for `key`, blocking until ready.
    pub fn new(key: &[u8]) -> Result<Self> {
        let dataset = build_dataset(key)?;
        Ok(Self {
            key: key.to_vec(),
            dataset,
        })
    }

    /// Rekeys the hasher. A no-op when `key` equals the current key.
    pub fn reset(&mut self, key: &[u8]) -> Result<()> {
        if !self.key.is_empty() && self.key == key {
            return Ok(());
        }

        self.dataset = build_dataset(key)?;
        self.key = key.to_vec();
        Ok(())
    }

    /// Computes the RandomX hash of `input` under the current key.
    pub fn run(&self, input: &[u8]) -> Result<[u8; 32]> {
        let mut vm = Vm::new(input, self.dataset.items())?;
        vm.execute()
    }
}

fn build_dataset(key: &[u8]) -> Result<Dataset> {
    info!(key_len = key.len(), "building cache and dataset");

    let mut cache = argon2d::new_memory();
    argon2d::fill_memory(&mut cache, key, &ARGON2D_SALT)?;

    let mut generator = superscalar::Generator::new(blake2b::Rng::new(key, 0));
    let programs: [superscalar::Program; CACHE_ACCESSES] =
        std::array::from_fn(|_| generator.generate());

    dataset::build(&cache, &programs)
}

/// A 76-byte mining blob with a 4-byte little-endian nonce at offset 39.
#[derive(Clone)]
pub struct BlockTemplate {
    data: [u8; BLOCK_TEMPLATE_SIZE],
}

impl BlockTemplate {
    pub fn new(data: [u8; BLOCK_TEMPLATE_SIZE]) -> Self {
        Self { data }
    }

    /// Advances the nonce by `offset`.
    pub fn next(&mut self, offset: u32) {
        let range = BLOCK_TEMPLATE_NONCE_OFFSET..BLOCK_TEMPLATE_NONCE_OFFSET + 4;
        let nonce = u32::from_le_bytes(self.data[range.clone()].try_into().expect("4-byte nonce"));
        self.data[range].copy_from_slice(&nonce.wrapping_add(offset).to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
