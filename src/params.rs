//! RandomX algorithm parameters.
//!
//! Values follow the reference configuration. Changing any of them breaks
//! compatibility with the canonical test vectors, so the invariants the
//! algorithm relies on are checked at compile time below.

/// Size of the mining block template in bytes.
pub const BLOCK_TEMPLATE_SIZE: usize = 76;

/// Byte offset of the 4-byte little-endian nonce inside a block template.
pub const BLOCK_TEMPLATE_NONCE_OFFSET: usize = 39;

// --- Argon2d parameters -------------------------------------------------

/// Salt used for cache initialization ("RandomX\x03").
pub const ARGON2D_SALT: [u8; 8] = *b"RandomX\x03";

/// Number of parallel lanes for cache initialization.
pub const ARGON2D_PARALLELISM: u32 = 1;

/// Number of 1 KiB blocks in the cache.
pub const ARGON2D_MEMORY_BLOCKS: u32 = 262_144;

/// Number of passes over the cache memory.
pub const ARGON2D_ITERATIONS: u32 = 3;

/// Argon2 type identifier (0 = Argon2d).
pub const ARGON2D_TYPE: u32 = 0;

/// Argon2 version.
pub const ARGON2D_VERSION: u32 = 0x13;

/// Argon2d memory block size in bytes.
pub const ARGON2D_BLOCK_SIZE: usize = 1024;

/// Total cache size in bytes.
pub const CACHE_SIZE: usize = ARGON2D_MEMORY_BLOCKS as usize * ARGON2D_BLOCK_SIZE;

// --- Superscalar parameters ---------------------------------------------

/// Target latency for a superscalar program, in cycles of the reference CPU.
pub const SUPERSCALAR_LATENCY: u32 = 170;

/// Maximum number of instructions in a superscalar program.
pub const SUPERSCALAR_MAX_PROGRAM_SIZE: usize = 3 * SUPERSCALAR_LATENCY as usize + 2;

// --- Scratchpad parameters ----------------------------------------------

/// L1 scratchpad size in bytes.
pub const SCRATCHPAD_L1_SIZE: u32 = 16_384;

/// L2 scratchpad size in bytes.
pub const SCRATCHPAD_L2_SIZE: u32 = 262_144;

/// L3 (full) scratchpad size in bytes.
pub const SCRATCHPAD_L3_SIZE: u32 = 2_097_152;

/// 8-byte alignment masks for the three scratchpad levels.
pub const SCRATCHPAD_L1_MASK: u32 = (SCRATCHPAD_L1_SIZE - 1) & !7;
pub const SCRATCHPAD_L2_MASK: u32 = (SCRATCHPAD_L2_SIZE - 1) & !7;
pub const SCRATCHPAD_L3_MASK: u32 = (SCRATCHPAD_L3_SIZE - 1) & !7;

/// 64-byte alignment mask for whole-register-file scratchpad access.
pub const SCRATCHPAD_L3_MASK64: u32 = (SCRATCHPAD_L3_SIZE - 1) & !63;

// --- Dataset parameters -------------------------------------------------

/// Dataset base size in bytes (2 GiB).
pub const DATASET_BASE_SIZE: u64 = 2_147_483_648;

/// Dataset extra size in bytes (32 MiB - 64 B), used to vary the per-program
/// dataset offset.
pub const DATASET_EXTRA_SIZE: u64 = 33_554_368;

/// Size of a single dataset item in bytes.
pub const DATASET_ITEM_SIZE: usize = 64;

/// Number of dataset items covered by the extra region.
pub const DATASET_EXTRA_ITEMS: u64 = DATASET_EXTRA_SIZE / DATASET_ITEM_SIZE as u64;

/// 64-byte alignment mask for dataset addressing.
pub const DATASET_ALIGN_MASK: u32 = ((DATASET_BASE_SIZE - 1) & !(DATASET_ITEM_SIZE as u64 - 1)) as u32;

/// Number of random cache accesses per dataset item.
pub const CACHE_ACCESSES: usize = 8;

/// Number of dataset items contained in the cache.
pub const CACHE_ITEM_COUNT: u32 = (CACHE_SIZE / DATASET_ITEM_SIZE) as u32;

/// Mask used to map a register value onto a cache item index.
pub const CACHE_ITEM_MASK: u32 = CACHE_ITEM_COUNT - 1;

// --- Program parameters -------------------------------------------------

/// Number of instructions in a RandomX program.
pub const PROGRAM_SIZE: usize = 256;

/// Number of loop iterations per program.
pub const PROGRAM_ITERATIONS: u32 = 2048;

/// Number of chained programs per hash.
pub const PROGRAM_COUNT: usize = 8;

/// Jump condition mask size in bits.
pub const JUMP_BITS: u32 = 8;

/// Jump condition mask offset in bits.
pub const JUMP_OFFSET: u32 = 8;

/// Size of the program buffer in bytes: 128-byte entropy header followed by
/// 256 8-byte instructions. The last 64 bytes double as the next seed.
pub const PROGRAM_BYTES: usize = 128 + 8 * PROGRAM_SIZE;

// --- Instruction frequencies (per 256 opcode values) ----------------------

pub const FREQ_IADD_RS: u32 = 16;
pub const FREQ_IADD_M: u32 = 7;
pub const FREQ_ISUB_R: u32 = 16;
pub const FREQ_ISUB_M: u32 = 7;
pub const FREQ_IMUL_R: u32 = 16;
pub const FREQ_IMUL_M: u32 = 4;
pub const FREQ_IMULH_R: u32 = 4;
pub const FREQ_IMULH_M: u32 = 1;
pub const FREQ_ISMULH_R: u32 = 4;
pub const FREQ_ISMULH_M: u32 = 1;
pub const FREQ_IMUL_RCP: u32 = 8;
pub const FREQ_INEG_R: u32 = 2;
pub const FREQ_IXOR_R: u32 = 15;
pub const FREQ_IXOR_M: u32 = 5;
pub const FREQ_IROR_R: u32 = 8;
pub const FREQ_IROL_R: u32 = 2;
pub const FREQ_ISWAP_R: u32 = 4;
pub const FREQ_FSWAP_R: u32 = 4;
pub const FREQ_FADD_R: u32 = 16;
pub const FREQ_FADD_M: u32 = 5;
pub const FREQ_FSUB_R: u32 = 16;
pub const FREQ_FSUB_M: u32 = 5;
pub const FREQ_FSCAL_R: u32 = 6;
pub const FREQ_FMUL_R: u32 = 32;
pub const FREQ_FDIV_M: u32 = 4;
pub const FREQ_FSQRT_R: u32 = 6;
pub const FREQ_CBRANCH: u32 = 25;
pub const FREQ_CFROUND: u32 = 1;
pub const FREQ_ISTORE: u32 = 16;

// --- Float environment ----------------------------------------------------

/// Default MXCSR word: flush-to-zero, denormals-are-zero, round-to-nearest,
/// all exceptions masked.
pub const MXCSR_DEFAULT: u32 = 0x9FC0;

/// Number of floating-point rounding modes.
pub const ROUNDING_MODES: u32 = 4;

// --- Compile-time invariants ----------------------------------------------

const _: () = {
    assert!(ARGON2D_MEMORY_BLOCKS.is_power_of_two());
    assert!(ARGON2D_MEMORY_BLOCKS >= 8 * ARGON2D_PARALLELISM);
    assert!(ARGON2D_ITERATIONS > 0);
    assert!(ARGON2D_SALT.len() >= 8);
    assert!(ARGON2D_TYPE == 0 && ARGON2D_VERSION == 0x13);

    assert!(SUPERSCALAR_LATENCY >= 1 && SUPERSCALAR_LATENCY <= 10_000);

    assert!(SCRATCHPAD_L1_SIZE.is_power_of_two() && SCRATCHPAD_L1_SIZE >= 64);
    assert!(SCRATCHPAD_L2_SIZE.is_power_of_two() && SCRATCHPAD_L2_SIZE >= SCRATCHPAD_L1_SIZE);
    assert!(SCRATCHPAD_L3_SIZE.is_power_of_two() && SCRATCHPAD_L3_SIZE >= SCRATCHPAD_L2_SIZE);

    assert!(DATASET_BASE_SIZE.is_power_of_two());
    assert!(DATASET_EXTRA_SIZE % DATASET_ITEM_SIZE as u64 == 0);
    assert!((DATASET_EXTRA_ITEMS + 1).is_power_of_two());
    assert!(CACHE_ACCESSES >= 2);
    assert!(CACHE_ITEM_COUNT.is_power_of_two());

    assert!(PROGRAM_SIZE >= 8 && PROGRAM_SIZE <= 32_768);
    assert!(PROGRAM_ITERATIONS > 0 && PROGRAM_COUNT > 0);
    assert!(JUMP_BITS > 0 && JUMP_BITS + JUMP_OFFSET <= 16);

    let freq_sum = FREQ_IADD_RS
        + FREQ_IADD_M
        + FREQ_ISUB_R
        + FREQ_ISUB_M
        + FREQ_IMUL_R
        + FREQ_IMUL_M
        + FREQ_IMULH_R
        + FREQ_IMULH_M
        + FREQ_ISMULH_R
        + FREQ_ISMULH_M
        + FREQ_IMUL_RCP
        + FREQ_INEG_R
        + FREQ_IXOR_R
        + FREQ_IXOR_M
        + FREQ_IROR_R
        + FREQ_IROL_R
        + FREQ_ISWAP_R
        + FREQ_FSWAP_R
        + FREQ_FADD_R
        + FREQ_FADD_M
        + FREQ_FSUB_R
        + FREQ_FSUB_M
        + FREQ_FSCAL_R
        + FREQ_FMUL_R
        + FREQ_FDIV_M
        + FREQ_FSQRT_R
        + FREQ_CBRANCH
        + FREQ_CFROUND
        + FREQ_ISTORE;
    assert!(freq_sum == 256);
};
