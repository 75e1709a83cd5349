//! Cross-component known-answer scenarios.
//!
//! The cache for the standard test key is filled once and shared; the
//! end-to-end scenarios that require the full 2 GiB dataset are `#[ignore]`d
//! and meant to be run with `cargo test --release -- --ignored`.

use std::sync::OnceLock;

use crate::params::{ARGON2D_SALT, CACHE_ACCESSES};
use crate::{argon2d, blake2b, dataset, superscalar, Hasher};

const TEST_KEY: &[u8] = b"test key 000";

fn block_template() -> Vec<u8> {
    hex::decode(
        "0707f7a4f0d605b303260816ba3f10902e1a145ac5fad3aa3af6ea44c11869dc\
         4f853f002b2eea0000000077b206a02ca5b1d4ce6bbfdf0acac38bded34d2dcd\
         eef95cd20cefc12f61d56109",
    )
    .unwrap()
}

fn test_cache() -> &'static argon2d::Memory {
    static CACHE: OnceLock<argon2d::Memory> = OnceLock::new();
    CACHE.get_or_init(|| {
        let mut memory = argon2d::new_memory();
        argon2d::fill_memory(&mut memory, TEST_KEY, &ARGON2D_SALT).unwrap();
        memory
    })
}

fn test_programs() -> &'static [superscalar::Program; CACHE_ACCESSES] {
    static PROGRAMS: OnceLock<[superscalar::Program; CACHE_ACCESSES]> = OnceLock::new();
    PROGRAMS.get_or_init(|| {
        let mut generator = superscalar::Generator::new(blake2b::Rng::new(TEST_KEY, 0));
        std::array::from_fn(|_| generator.generate())
    })
}

#[test]
fn argon2d_cache_vectors() {
    let cache = test_cache();

    assert_eq!(cache[0][0], 0x191E0E1D23C02186);
    assert_eq!(cache[12253][29], 0xF1B62FE6210BF8B1);
    assert_eq!(cache[262143][127], 0x1F47F056D05CD99B);
}

#[test]
fn argon2d_cache_vectors_block_template_key() {
    let mut memory = argon2d::new_memory();
    argon2d::fill_memory(&mut memory, &block_template(), &ARGON2D_SALT).unwrap();

    assert_eq!(memory[0][0], 0x910AF08F94413CFD);
    assert_eq!(memory[12253][29], 0x5D4D75503A52283D);
    assert_eq!(memory[262143][127], 0x13A957F411409896);
}

#[test]
fn dataset_item_vectors() {
    let cache = test_cache();
    let programs = test_programs();

    let item = |n: u64| dataset::compute_item(cache, programs, n);

    assert_eq!(item(0)[0], 0x680588A85AE222DB);
    assert_eq!(item(2)[1], 0xBBE8D699A7C504DC);
    assert_eq!(item(3)[7], 0x7908E227A0EFFB29);
    assert_eq!(item(213)[7], 0x81BCAC0872EE9D29);
    assert_eq!(item(2137213)[7], 0x01DAC57C3F3A27A8);
    assert_eq!(item(10000000)[0], 0x7943A1F6186FFB72);
    assert_eq!(item(20000000)[0], 0x9035244D718095E1);
    assert_eq!(item(30000000)[0], 0x145A5091F7853099);
    assert_eq!(item(34078719)[7], 0x10844958C957DFC2);
}

#[test]
fn dataset_items_are_deterministic() {
    let cache = test_cache();
    let programs = test_programs();

    assert_eq!(
        dataset::compute_item(cache, programs, 12345),
        dataset::compute_item(cache, programs, 12345)
    );
    assert_ne!(
        dataset::compute_item(cache, programs, 12345),
        dataset::compute_item(cache, programs, 12346)
    );
}

// Builds the full 2 GiB dataset and runs the canonical end-to-end vectors;
// needs ~2.5 GiB of memory and several minutes of CPU.
#[test]
#[ignore = "builds the full 2 GiB dataset; run with --release -- --ignored"]
fn end_to_end_hash_vectors() {
    let mut hasher = Hasher::new(TEST_KEY).unwrap();

    let hash = hasher.run(b"This is a test").unwrap();
    assert_eq!(
        hex::encode(hash),
        "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
    );

    let hash = hasher.run(b"Lorem ipsum dolor sit amet").unwrap();
    assert_eq!(
        hex::encode(hash),
        "300a0adb47603dedb42228ccb2b211104f4da45af709cd7547cd049e9489c969"
    );

    // Hashing is repeatable under the same key.
    let hash = hasher.run(b"This is a test").unwrap();
    assert_eq!(
        hex::encode(hash),
        "639183aae1bf4c9a35884cb46b09cad9175f04efd7684e7262a0ac1c2f0b4e3f"
    );

    // Resetting to the same key keeps the dataset.
    hasher.reset(TEST_KEY).unwrap();
    let hash = hasher.run(b"Lorem ipsum dolor sit amet").unwrap();
    assert_eq!(
        hex::encode(hash),
        "300a0adb47603dedb42228ccb2b211104f4da45af709cd7547cd049e9489c969"
    );

    // Empty input is rejected at the Blake2b seam.
    assert!(matches!(
        hasher.run(b""),
        Err(crate::Error::InvalidArgument(_))
    ));
}
