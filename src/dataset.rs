//! Dataset construction.
//!
//! The 2 GiB read-only dataset is expanded from the cache by running eight
//! superscalar programs per 64-byte item. Construction is the only parallel
//! part of the engine: a fixed pool of worker threads pops job indexes from
//! a relaxed atomic counter, each job filling a disjoint contiguous range of
//! items.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use tracing::{debug, info};

use crate::argon2d;
use crate::error::{Error, Result};
use crate::params::{
    CACHE_ACCESSES, CACHE_ITEM_MASK, DATASET_BASE_SIZE, DATASET_EXTRA_SIZE, DATASET_ITEM_SIZE,
};
use crate::superscalar;

/// A 64-byte dataset item viewed as 8 words.
pub type DatasetItem = [u64; 8];

/// Splitting jobs below this size stops paying off.
const MIN_ITEMS_PER_JOB: u32 = 32_768;

/// Multiplier seeding item word 0 from the item number.
const ITEM_MUL: u64 = 6364136223846793005;

/// Constants xored into item word 0 to seed words 1..7.
const ITEM_XOR: [u64; 7] = [
    9298411001130361340,
    12065312585734608966,
    9306329213124626780,
    5281919268842080866,
    10536153434571861004,
    3398623926847679864,
    9549104520008361294,
];

/// The expanded dataset. Item count is padded up to a multiple of
/// `thread_count * 4`; padding items go through the same recurrence as real
/// items but are never read while hashing.
pub struct Dataset {
    items: Vec<DatasetItem>,
}

impl Dataset {
    pub fn items(&self) -> &[DatasetItem] {
        &self.items
    }
}

/// Executes one superscalar program over the item registers with wrapping
/// 64-bit arithmetic.
pub(crate) fn execute_program(program: &superscalar::Program, r: &mut [u64; 8]) {
    use superscalar::Opcode;

    for instr in &program.instructions[..program.size] {
        let dst = instr.dst as usize;
        let src = instr.src.unwrap_or(0) as usize;

        match instr.opcode {
            Opcode::IsubR => r[dst] = r[dst].wrapping_sub(r[src]),
            Opcode::IxorR => r[dst] ^= r[src],
            Opcode::IaddRs => r[dst] = r[dst].wrapping_add(r[src] << instr.mod_shift()),
            Opcode::ImulR => r[dst] = r[dst].wrapping_mul(r[src]),
            Opcode::IrorC => r[dst] = r[dst].rotate_right(instr.imm32),
            Opcode::IaddC7 | Opcode::IaddC8 | Opcode::IaddC9 => {
                r[dst] = r[dst].wrapping_add(instr.imm32 as i32 as u64);
            }
            Opcode::IxorC7 | Opcode::IxorC8 | Opcode::IxorC9 => {
                r[dst] ^= instr.imm32 as i32 as u64;
            }
            Opcode::ImulhR => {
                r[dst] = (((r[dst] as u128) * (r[src] as u128)) >> 64) as u64;
            }
            Opcode::IsmulhR => {
                r[dst] = (((r[dst] as i64 as i128) * (r[src] as i64 as i128)) >> 64) as u64;
            }
            Opcode::ImulRcp => r[dst] = r[dst].wrapping_mul(instr.reciprocal),
            Opcode::Invalid => unreachable!("instructions past size are never executed"),
        }
    }
}

/// Computes a single dataset item: seed the 8 item words from the item
/// number, then run 8 rounds of (read cache item, execute program, mix),
/// each round chaining the next cache index through the previous program's
/// address register.
pub fn compute_item(
    cache: &argon2d::Memory,
    programs: &[superscalar::Program; CACHE_ACCESSES],
    item_number: u64,
) -> DatasetItem {
    let mut r = [0u64; 8];
    r[0] = (item_number + 1).wrapping_mul(ITEM_MUL);
    for (i, xor) in ITEM_XOR.iter().enumerate() {
        r[i + 1] = r[0] ^ xor;
    }

    let mut register_value = item_number;

    for program in programs {
        let index = (register_value & u64::from(CACHE_ITEM_MASK)) as usize;
        let block = &cache[index / 16];
        let word_offset = (index % 16) * 8;

        execute_program(program, &mut r);

        for (word, cache_word) in r.iter_mut().zip(&block[word_offset..word_offset + 8]) {
            *word ^= *cache_word;
        }

        register_value = r[program.address_register as usize];
    }

    r
}

/// Covariant raw pointer to the dataset buffer, shared across workers that
/// write disjoint ranges.
#[derive(Clone, Copy)]
struct ItemsPtr(*mut DatasetItem);

// SAFETY: workers obtain disjoint slices through non-overlapping job
// ranges; the join at the end of the scope publishes all writes.
unsafe impl Send for ItemsPtr {}
unsafe impl Sync for ItemsPtr {}

/// Expands the dataset from the cache and the 8 superscalar programs,
/// blocking until every worker has joined.
pub fn build(
    cache: &argon2d::Memory,
    programs: &[superscalar::Program; CACHE_ACCESSES],
) -> Result<Dataset> {
    let thread_count = num_cpus::get().max(1) as u32;
    let total_size = DATASET_BASE_SIZE + DATASET_EXTRA_SIZE;

    // Pad the item count so that every thread gets the same amount of work
    // in batches of 4 items; padding items are never read while hashing.
    let alignment = u64::from(thread_count) * 4 * DATASET_ITEM_SIZE as u64;
    let padding = alignment - total_size % alignment;
    let items_count = ((total_size + padding) / DATASET_ITEM_SIZE as u64) as u32;
    let items_per_thread = items_count / thread_count;

    // Split each thread's share into smaller jobs to even out scheduling
    // variance, as long as the padding stays unchanged and jobs do not drop
    // below the floor.
    let mut task_divisor: u32 = 1;
    let mut new_padding = padding;
    while items_per_thread / task_divisor > MIN_ITEMS_PER_JOB && new_padding == padding {
        task_divisor *= 2;
        let new_alignment = alignment * u64::from(task_divisor);
        new_padding = new_alignment - total_size % new_alignment;
    }
    task_divisor = (task_divisor / 2).max(1);

    let items_per_job = items_per_thread / task_divisor;
    let max_jobs = items_count / items_per_job;
    debug_assert_eq!(items_count % items_per_job, 0);

    info!(
        items = items_count,
        threads = thread_count,
        jobs = max_jobs,
        "building dataset"
    );

    let mut items: Vec<DatasetItem> = vec![[0u64; 8]; items_count as usize];
    let job_counter = AtomicU32::new(0);
    let base = ItemsPtr(items.as_mut_ptr());

    let worker_panicked = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(thread_count as usize);

        for _ in 0..thread_count {
            let job_counter = &job_counter;
            handles.push(scope.spawn(move || {
                let base = base;
                let mut job = job_counter.fetch_add(1, Ordering::Relaxed);
                while job < max_jobs {
                    let start_item = job * items_per_job;

                    // SAFETY: each job index is handed out exactly once by
                    // the counter, so this range is written by one worker
                    // only and does not overlap any other job's range.
                    let out = unsafe {
                        std::slice::from_raw_parts_mut(
                            base.0.add(start_item as usize),
                            items_per_job as usize,
                        )
                    };

                    for (offset, slot) in out.iter_mut().enumerate() {
                        *slot = compute_item(cache, programs, u64::from(start_item) + offset as u64);
                    }

                    job = job_counter.fetch_add(1, Ordering::Relaxed);
                }
            }));
        }

        // Join every handle before reporting so no panic leaks into the
        // scope's implicit join.
        let results: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
        results.into_iter().any(|result| result.is_err())
    });

    if worker_panicked {
        return Err(Error::Internal("dataset worker panicked".to_string()));
    }

    debug!("dataset ready");
    Ok(Dataset { items })
}
