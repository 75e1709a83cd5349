//! RandomX-tuned Argon2d memory filler.
//!
//! Fills the 256 MiB cache from `(key, salt)` with parallelism 1, 262 144
//! blocks, 3 passes, version 0x13 and an empty secret/associated-data. The
//! tag length is 0: no final hash is produced, the filled memory *is* the
//! output. The round function is the Argon2 variant of Blake2b mixing (the
//! extra `2 * lo32 * lo32` term), applied rowwise and then columnwise over
//! each 1 KiB block.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use tracing::debug;

use crate::blake2b;
use crate::error::{Error, Result};
use crate::params::{
    ARGON2D_BLOCK_SIZE, ARGON2D_ITERATIONS, ARGON2D_MEMORY_BLOCKS, ARGON2D_PARALLELISM,
    ARGON2D_TYPE, ARGON2D_VERSION,
};

/// Words per 1 KiB memory block.
pub const BLOCK_WORDS: usize = ARGON2D_BLOCK_SIZE / 8;

/// A single Argon2d memory block, viewed as 128 little-endian 64-bit words.
pub type Block = [u64; BLOCK_WORDS];

/// The whole cache memory.
pub type Memory = Vec<Block>;

/// Number of equally long lane slices; slice ends act as sync points.
const SYNC_POINTS: u32 = 4;

const MASK_32: u64 = 0xffff_ffff;

/// Allocates a zeroed cache-sized memory.
pub fn new_memory() -> Memory {
    vec![[0u64; BLOCK_WORDS]; ARGON2D_MEMORY_BLOCKS as usize]
}

/// Fills `memory` from `(password, salt)`.
///
/// `memory` must hold exactly [`ARGON2D_MEMORY_BLOCKS`](crate::params::ARGON2D_MEMORY_BLOCKS)
/// blocks and `salt` at least 8 bytes.
pub fn fill_memory(memory: &mut Memory, password: &[u8], salt: &[u8]) -> Result<()> {
    if memory.len() != ARGON2D_MEMORY_BLOCKS as usize {
        return Err(Error::InvalidArgument(format!(
            "mismatched cache size: {} blocks, expected {}",
            memory.len(),
            ARGON2D_MEMORY_BLOCKS
        )));
    }

    if salt.len() < 8 {
        return Err(Error::InvalidArgument(format!(
            "invalid salt size: {}",
            salt.len()
        )));
    }

    let h0 = initial_hash(password, salt);

    debug!(blocks = memory.len(), "argon2d first pass");
    first_pass(memory, &h0)?;
    debug!(passes = ARGON2D_ITERATIONS - 1, "argon2d remaining passes");
    remaining_passes(memory);

    Ok(())
}

/// `H0`: Blake2b-512 over the length-prefixed parameter block
/// (Argon2 spec section 3.2).
fn initial_hash(password: &[u8], salt: &[u8]) -> [u8; 64] {
    let mut hasher = Blake2bVar::new(64).expect("64 is a valid digest size");

    for param in [
        ARGON2D_PARALLELISM,
        0, // tag length
        ARGON2D_MEMORY_BLOCKS,
        ARGON2D_ITERATIONS,
        ARGON2D_VERSION,
        ARGON2D_TYPE,
    ] {
        hasher.update(&param.to_le_bytes());
    }

    hasher.update(&(password.len() as u32).to_le_bytes());
    hasher.update(password);
    hasher.update(&(salt.len() as u32).to_le_bytes());
    hasher.update(salt);
    hasher.update(&0u32.to_le_bytes()); // empty secret
    hasher.update(&0u32.to_le_bytes()); // empty associated data

    let mut h0 = [0u8; 64];
    hasher
        .finalize_variable(&mut h0)
        .expect("64 is a valid digest size");
    h0
}

/// First pass: blocks 0 and 1 of each lane come from the variable-length
/// extension over `H0 || block_index || lane`, block 2 mixes them, and every
/// further block mixes its predecessor with a data-dependent reference
/// block. From slice 1 on, references may cross lanes but only into
/// finalized slices.
fn first_pass(memory: &mut Memory, h0: &[u8; 64]) -> Result<()> {
    let blocks_per_lane = ARGON2D_MEMORY_BLOCKS / ARGON2D_PARALLELISM;
    let blocks_per_slice = blocks_per_lane / SYNC_POINTS;

    for lane in 0..ARGON2D_PARALLELISM {
        let lane_start = (lane * blocks_per_lane) as usize;

        let mut input = [0u8; 72];
        input[..64].copy_from_slice(h0);
        input[68..72].copy_from_slice(&lane.to_le_bytes());

        let mut raw = [0u8; ARGON2D_BLOCK_SIZE];

        input[64..68].copy_from_slice(&0u32.to_le_bytes());
        blake2b::hash_variable(&mut raw, &input)?;
        memory[lane_start] = block_from_bytes(&raw);

        input[64..68].copy_from_slice(&1u32.to_le_bytes());
        blake2b::hash_variable(&mut raw, &input)?;
        memory[lane_start + 1] = block_from_bytes(&raw);

        let (prev, reference) = (memory[lane_start], memory[lane_start + 1]);
        mix_blocks(&mut memory[lane_start + 2], &prev, &reference, false);

        let mut prev_idx = 2u64;
        for idx in 3..blocks_per_slice as u64 {
            let cur_idx = lane_start + idx as usize;
            // For pass 0 slice 0 the window is every block built so far.
            let ref_length = prev_idx;
            let j1 = memory[prev_idx as usize][0] & MASK_32;
            let ref_index = reference_index(j1, ref_length);

            let (prev, reference) = (memory[prev_idx as usize], memory[ref_index as usize]);
            mix_blocks(&mut memory[cur_idx], &prev, &reference, false);
            prev_idx += 1;
        }
    }

    for slice in 1..SYNC_POINTS {
        for lane in 0..ARGON2D_PARALLELISM {
            let lane_start = lane * blocks_per_lane;

            for idx in 0..blocks_per_slice {
                let cur_idx = (lane_start + slice * blocks_per_slice + idx) as usize;
                let prev_idx = cur_idx - 1;
                let j1 = memory[prev_idx][0] & MASK_32;
                let j2 = memory[prev_idx][0] >> 32;
                let ref_lane = (j2 % ARGON2D_PARALLELISM as u64) as u32;

                // Cross-lane references are limited to finished slices; the
                // own lane may reach anything up to the previous block.
                let ref_length = if ref_lane == lane {
                    (prev_idx - lane_start as usize) as u64
                } else {
                    (blocks_per_slice * slice) as u64
                };
                let z = reference_index(j1, ref_length);
                let ref_index = (ref_lane * blocks_per_lane) as u64 + z;

                let (prev, reference) = (memory[prev_idx], memory[ref_index as usize]);
                mix_blocks(&mut memory[cur_idx], &prev, &reference, false);
            }
        }
    }

    Ok(())
}

/// Passes 1 and 2: the first block of each lane folds over the lane's last
/// block, every other block mixes into its existing content, and reference
/// selection uses a rolling window of the three previous slices.
fn remaining_passes(memory: &mut Memory) {
    let blocks_per_lane = ARGON2D_MEMORY_BLOCKS / ARGON2D_PARALLELISM;
    let blocks_per_slice = blocks_per_lane / SYNC_POINTS;

    for _pass in 1..ARGON2D_ITERATIONS {
        for lane in 0..ARGON2D_PARALLELISM {
            let lane_start = (blocks_per_lane * lane) as usize;
            let prev_idx = lane_start + blocks_per_lane as usize - 1;
            let j1 = memory[prev_idx][0] & MASK_32;
            let j2 = memory[prev_idx][0] >> 32;
            let ref_lane = (j2 % ARGON2D_PARALLELISM as u64) as u32;

            let ref_length =
                (blocks_per_lane - blocks_per_slice - u32::from(ref_lane == lane)) as u64;
            let z = reference_index(j1, ref_length);
            let ref_index = (ref_lane * blocks_per_lane + blocks_per_slice) as u64 + z;

            let (prev, reference) = (memory[prev_idx], memory[ref_index as usize]);
            mix_blocks(&mut memory[lane_start], &prev, &reference, true);
        }

        for slice in 0..SYNC_POINTS {
            for lane in 0..ARGON2D_PARALLELISM {
                let lane_start = (blocks_per_lane * lane + blocks_per_slice * slice) as usize;

                // Slice 0 starts at 1: its first block was just computed.
                for idx in u32::from(slice == 0)..blocks_per_slice {
                    let cur_idx = lane_start + idx as usize;
                    let prev_idx = cur_idx - 1;
                    let j1 = memory[prev_idx][0] & MASK_32;
                    let j2 = memory[prev_idx][0] >> 32;
                    let ref_lane = (j2 % ARGON2D_PARALLELISM as u64) as u32;

                    // Same-lane references also see the blocks built so far
                    // this slice; at idx 0 the window shrinks by one.
                    let mut ref_length = blocks_per_lane - blocks_per_slice;
                    if ref_lane == lane {
                        ref_length = ref_length.wrapping_add(idx).wrapping_sub(1);
                    }
                    let z = reference_index(j1, u64::from(ref_length));

                    // The window starts three slices back and may wrap the
                    // lane.
                    let shift = blocks_per_slice * ((slice + 1) % SYNC_POINTS);
                    let shifted = (shift as u64 + z) % blocks_per_lane as u64;
                    let ref_index = (ref_lane * blocks_per_lane) as u64 + shifted;

                    let (prev, reference) = (memory[prev_idx], memory[ref_index as usize]);
                    mix_blocks(&mut memory[cur_idx], &prev, &reference, true);
                }
            }
        }
    }
}

/// The Argon2 index function: maps `J1` onto a block offset inside a window
/// of `ref_length` eligible blocks, biased toward recent blocks.
#[inline]
fn reference_index(j1: u64, ref_length: u64) -> u64 {
    let x = (j1 * j1) >> 32;
    let y = (ref_length * x) >> 32;
    ref_length - 1 - y
}

/// Compression function G. `R = X ^ Y`, one Blake2b-style round over each of
/// the 8 rows, one over each of the 8 reshaped columns, output `Z ^ R`
/// (additionally xoring the overwritten block on passes beyond the first).
fn mix_blocks(cur: &mut Block, prev: &Block, reference: &Block, xor_blocks: bool) {
    let mut tmp = [0u64; BLOCK_WORDS];

    for i in 0..BLOCK_WORDS {
        tmp[i] = prev[i] ^ reference[i];
        cur[i] = tmp[i] ^ (if xor_blocks { cur[i] } else { 0 });
    }

    for row in 0..8 {
        let offset = 16 * row;
        let mut v: [u64; 16] = tmp[offset..offset + 16].try_into().expect("16-word row");
        round(&mut v);
        tmp[offset..offset + 16].copy_from_slice(&v);
    }

    for col in 0..8 {
        let mut v = [0u64; 16];
        for j in 0..8 {
            v[2 * j] = tmp[2 * col + 16 * j];
            v[2 * j + 1] = tmp[2 * col + 1 + 16 * j];
        }

        round(&mut v);

        for j in 0..8 {
            tmp[2 * col + 16 * j] = v[2 * j];
            tmp[2 * col + 1 + 16 * j] = v[2 * j + 1];
        }
    }

    for i in 0..BLOCK_WORDS {
        cur[i] ^= tmp[i];
    }
}

fn round(v: &mut [u64; 16]) {
    g(v, 0, 4, 8, 12);
    g(v, 1, 5, 9, 13);
    g(v, 2, 6, 10, 14);
    g(v, 3, 7, 11, 15);
    g(v, 0, 5, 10, 15);
    g(v, 1, 6, 11, 12);
    g(v, 2, 7, 8, 13);
    g(v, 3, 4, 9, 14);
}

/// Blake2b G with the Argon2 multiplication term `2 * lo32(a) * lo32(b)`.
#[inline(always)]
fn g(v: &mut [u64; 16], a: usize, b: usize, c: usize, d: usize) {
    v[a] = mixing_add(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(32);
    v[c] = mixing_add(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(24);
    v[a] = mixing_add(v[a], v[b]);
    v[d] = (v[d] ^ v[a]).rotate_right(16);
    v[c] = mixing_add(v[c], v[d]);
    v[b] = (v[b] ^ v[c]).rotate_right(63);
}

#[inline(always)]
fn mixing_add(x: u64, y: u64) -> u64 {
    x.wrapping_add(y)
        .wrapping_add((x & MASK_32).wrapping_mul(y & MASK_32).wrapping_mul(2))
}

fn block_from_bytes(bytes: &[u8; ARGON2D_BLOCK_SIZE]) -> Block {
    let mut block = [0u64; BLOCK_WORDS];
    for (word, chunk) in block.iter_mut().zip(bytes.chunks_exact(8)) {
        *word = u64::from_le_bytes(chunk.try_into().expect("8-byte chunk"));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_length_extension_vector() {
        let input = hex::decode(
            "340575f85795c20ed0e07f7356a02cf55018567f6ad34f24590ff8f8b12ffaaa\
             d9348a3070f3f589e4a2b4187cd267fc0498080fb1e077c4fc2206732d0c14b2\
             0000000000000000",
        )
        .unwrap();
        assert_eq!(input.len(), 72);

        let mut output = vec![0u8; 1024];
        blake2b::hash_variable(&mut output, &input).unwrap();

        let expected = hex::decode(concat!(
            "258c444b5ba3556f902bc25ffa6f09b76cbc44c0b3cd099df4dfc9f563c21753",
            "baaa24a372b8485bac3c79ac22520f385cd5439a1b27d6feacd359c692b33e14",
            "6211e5b194952723ae7e3c04b251abdafff0e0f24a3a7c74e091fb9489ddbbd2",
            "47b7d872a43700b611e262b3d60451234bf5c9db7ffc48da1f8f35f604abb1dc",
            "9f274297aa7c722562d5183ceb7465837232aeaa83a47b55333154cfd586cf79",
            "774b75bef120525d5d7fd709cc42d6c007daac7d8206f65f8e9d5b9a3bd54368",
            "c9111207d86aab382a757dfd4723573e5505865b616d0879bc4777f52ef504d3",
            "0d919e5abdc0cb24cbeb7756eac75a663b5e1801fa799d01bfe8e2628b4b8fa3",
            "1511baa8e06e3860833727c12bcb131ebf4d27937c69df23d894a5aa0430e403",
            "922cb9fbb373f72287e6e51219fc1242bcd2734fa651448f0f311cf23cf3e55a",
            "da310a2c4a38b77cb90c33f288d75fb234abb8b325365a6685d50f874742922b",
            "6642e0b3ce760bd5c439e5b22826e0d80c5326944a1b35ef6a1dd9a607855ad3",
            "b4a77e4e5d791dd4bcc52c401a90ac5f93d11ce313d44abc413b3e4c7394e5a8",
            "6a31bac6d0778fa2680fdb0f53d6653d5c956e16cf45a83f104ccd96afe3e8d0",
            "57f85d48963e4cbc03351881c7c89af0ed8f4e0eaf911bcdf2d342e376426e77",
            "40fe08d8d8306a42c2152eb8fa3afb8510b3a4fb3951ec794ae6d8115781e967",
            "7b9443f9494236ababc1229b5865310265540ac10cfa1b9260e7de1c9952814d",
            "d2475d05178d48730c3f5097198894c34a0c606687b91b7f35065f647ac6d7d4",
            "f4289cbd86b0f3656c2ac09d939864c8a7ca984882a95661d5c01f05bf42112d",
            "6663edfdb6eb7c2e5a938cc24a4a016445a9102fb244d42e115a2916c6d98b5e",
            "7d79d8dc627d1563b320ba24f61d95cd39a175bbd83440662b4289367e3e0704",
            "24ae6e11c8ce4536e5823840b9e579db25147bf385af7d6bcef4f0df5b5864d6",
            "1b119aec7de18c4861e5b7cc3637872f513c29d121ab146f11338aa8229e5da9",
            "d37f7309e6edf351fcdda135b65463f65c4c1aacc47925ecbe9b83de374ae65b",
            "9f7927e7bbcce4c520f645ea7f21a32ef1b454da1aaf525c0f7bfe72bb2f4d3f",
            "d7db5dbcff4f68f8803ab831d043af4a9fb04fd18d6cadbe1b61f9f76333e2b1",
            "d9b341f5e24c28981966db0231ac8e70838d789e1de6ff6cede2adf124c855e2",
            "b72602fc1903f996e01683ce8c5a88910017bff3f63f40b60a586e28f88d15dc",
            "87eb8339060c14decb96bf42e7c19981e082c99de3394b5422b8080a33d1f14b",
            "d991e87a64cd217c6ebed7ed8fc322604ec638abb93fc7429838196d2e6d5198",
            "6066389b94c49a6b0a63cc46d696ff4a4aef918edcbb5cce5363f73ca4710d6a",
            "efce887294c08479f379c81841313e1b6e502ac66e0ba8104a3b2f53572f1f4b",
        ))
        .unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn variable_length_extension_is_pure() {
        let input = [0x5au8; 72];

        let mut a = vec![0u8; 1024];
        let mut b = vec![0u8; 1024];
        blake2b::hash_variable(&mut a, &input).unwrap();
        blake2b::hash_variable(&mut b, &input).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn rejects_bad_shapes() {
        let mut short = vec![[0u64; BLOCK_WORDS]; 8];
        assert!(matches!(
            fill_memory(&mut short, b"key", b"RandomX\x03"),
            Err(Error::InvalidArgument(_))
        ));

        let mut memory = new_memory();
        assert!(matches!(
            fill_memory(&mut memory, b"key", b"short"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
