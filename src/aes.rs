//! Single-round AES generators and the scratchpad fingerprint.
//!
//! All three facilities run fixed, specification-defined key material
//! through the plain AES round function (`SubBytes`/`ShiftRows`/
//! `MixColumns`/`AddRoundKey`) or its inverse. The round transforms come
//! from `aes::hazmat`, which is bit-identical to the AESENC/AESDEC
//! instructions and carries its own hardware dispatch, so software and
//! AES-NI builds produce the same stream.

use aes::hazmat::{cipher_round, equiv_inv_cipher_round};
use aes::Block;

use crate::error::{Error, Result};

// key0..key3 = Blake2b-512("RandomX AesGenerator1R keys")
const GEN_1R_KEYS: [[u8; 16]; 4] = [
    [
        0x53, 0xa5, 0xac, 0x6d, 0x09, 0x66, 0x71, 0x62, 0x2b, 0x55, 0xb5, 0xdb, 0x17, 0x49, 0xf4,
        0xb4,
    ],
    [
        0x07, 0xaf, 0x7c, 0x6d, 0x0d, 0x71, 0x6a, 0x84, 0x78, 0xd3, 0x25, 0x17, 0x4e, 0xdc, 0xa1,
        0x0d,
    ],
    [
        0xf1, 0x62, 0x12, 0x3f, 0xc6, 0x7e, 0x94, 0x9f, 0x4f, 0x79, 0xc0, 0xf4, 0x45, 0xe3, 0x20,
        0x3e,
    ],
    [
        0x35, 0x81, 0xef, 0x6a, 0x7c, 0x31, 0xba, 0xb1, 0x88, 0x4c, 0x31, 0x16, 0x54, 0x91, 0x16,
        0x49,
    ],
];

// key0..key3 = Blake2b-512("RandomX AesGenerator4R keys 0-3")
// key4..key7 = Blake2b-512("RandomX AesGenerator4R keys 4-7")
const GEN_4R_KEYS: [[u8; 16]; 8] = [
    [
        0xdd, 0xaa, 0x21, 0x64, 0xdb, 0x3d, 0x83, 0xd1, 0x2b, 0x6d, 0x54, 0x2f, 0x3f, 0xd2, 0xe5,
        0x99,
    ],
    [
        0x50, 0x34, 0x0e, 0xb2, 0x55, 0x3f, 0x91, 0xb6, 0x53, 0x9d, 0xf7, 0x06, 0xe5, 0xcd, 0xdf,
        0xa5,
    ],
    [
        0x04, 0xd9, 0x3e, 0x5c, 0xaf, 0x7b, 0x5e, 0x51, 0x9f, 0x67, 0xa4, 0x0a, 0xbf, 0x02, 0x1c,
        0x17,
    ],
    [
        0x63, 0x37, 0x62, 0x85, 0x08, 0x5d, 0x8f, 0xe7, 0x85, 0x37, 0x67, 0xcd, 0x91, 0xd2, 0xde,
        0xd8,
    ],
    [
        0x73, 0x6f, 0x82, 0xb5, 0xa6, 0xa7, 0xd6, 0xe3, 0x6d, 0x8b, 0x51, 0x3d, 0xb4, 0xff, 0x9e,
        0x22,
    ],
    [
        0xf3, 0x6b, 0x56, 0xc7, 0xd9, 0xb3, 0x10, 0x9c, 0x4e, 0x4d, 0x02, 0xe9, 0xd2, 0xb7, 0x72,
        0xb2,
    ],
    [
        0xe7, 0xc9, 0x73, 0xf2, 0x8b, 0xa3, 0x65, 0xf7, 0x0a, 0x66, 0xa9, 0x2b, 0xa7, 0xef, 0x3b,
        0xf6,
    ],
    [
        0x09, 0xd6, 0x7c, 0x7a, 0xde, 0x39, 0x58, 0x91, 0xfd, 0xd1, 0x06, 0x0c, 0x2d, 0x76, 0xb0,
        0xc0,
    ],
];

// state0..state3 = Blake2b-512("RandomX AesHash1R state")
const HASH_1R_STATE: [u8; 64] = [
    0x0d, 0x2c, 0xb5, 0x92, 0xde, 0x56, 0xa8, 0x9f, 0x47, 0xdb, 0x82, 0xcc, 0xad, 0x3a, 0x98,
    0xd7, 0x6e, 0x99, 0x8d, 0x33, 0x98, 0xb7, 0xc7, 0x15, 0x5a, 0x12, 0x9e, 0xf5, 0x57, 0x80,
    0xe7, 0xac, 0x17, 0x00, 0x77, 0x6a, 0xd0, 0xc7, 0x62, 0xae, 0x6b, 0x50, 0x79, 0x50, 0xe4,
    0x7c, 0xa0, 0xe8, 0x0c, 0x24, 0x0a, 0x63, 0x8d, 0x82, 0xad, 0x07, 0x05, 0x00, 0xa1, 0x79,
    0x48, 0x49, 0x99, 0x7e,
];

// xkey0, xkey1 = Blake2b-256("RandomX AesHash1R xkeys")
const HASH_1R_XKEYS: [[u8; 16]; 2] = [
    [
        0x89, 0x83, 0xfa, 0xf6, 0x9f, 0x94, 0x24, 0x8b, 0xbf, 0x56, 0xdc, 0x90, 0x01, 0x02, 0x89,
        0x06,
    ],
    [
        0xd1, 0x63, 0xb2, 0x61, 0x3c, 0xe0, 0xf4, 0x51, 0xc6, 0x43, 0x10, 0xee, 0x9b, 0xf9, 0x18,
        0xed,
    ],
];

#[inline(always)]
fn encode(state: &mut Block, key: &Block) {
    cipher_round(state, key);
}

#[inline(always)]
fn decode(state: &mut Block, key: &Block) {
    equiv_inv_cipher_round(state, key);
}

fn load_lanes(seed: &[u8; 64]) -> [Block; 4] {
    [
        Block::clone_from_slice(&seed[0..16]),
        Block::clone_from_slice(&seed[16..32]),
        Block::clone_from_slice(&seed[32..48]),
        Block::clone_from_slice(&seed[48..64]),
    ]
}

fn store_lanes(seed: &mut [u8; 64], lanes: &[Block; 4]) {
    for (i, lane) in lanes.iter().enumerate() {
        seed[16 * i..16 * (i + 1)].copy_from_slice(lane.as_slice());
    }
}

/// 1-round generator: fills `output` in 64-byte steps from four 128-bit
/// lanes, two decoded and two encoded against fixed lane keys. The seed is
/// replaced with the final lane state.
pub fn fill_1r(output: &mut [u8], seed: &mut [u8; 64]) -> Result<()> {
    if output.len() % 64 != 0 {
        return Err(Error::InvalidArgument(format!(
            "invalid output size: {}",
            output.len()
        )));
    }

    let keys: [Block; 4] = GEN_1R_KEYS.map(Block::from);
    let mut lanes = load_lanes(seed);

    for chunk in output.chunks_exact_mut(64) {
        decode(&mut lanes[0], &keys[0]);
        encode(&mut lanes[1], &keys[1]);
        decode(&mut lanes[2], &keys[2]);
        encode(&mut lanes[3], &keys[3]);

        for (i, lane) in lanes.iter().enumerate() {
            chunk[16 * i..16 * (i + 1)].copy_from_slice(lane.as_slice());
        }
    }

    store_lanes(seed, &lanes);
    Ok(())
}

/// 4-round generator: same structure as [`fill_1r`] but four rounds per
/// 64-byte block with two 4-key schedules. Used to materialize RandomX
/// programs from the evolving seed.
pub fn fill_4r(output: &mut [u8], seed: &mut [u8; 64]) -> Result<()> {
    if output.len() % 64 != 0 {
        return Err(Error::InvalidArgument(format!(
            "invalid output size: {}",
            output.len()
        )));
    }

    let keys: [Block; 8] = GEN_4R_KEYS.map(Block::from);
    let mut lanes = load_lanes(seed);

    for chunk in output.chunks_exact_mut(64) {
        for round in 0..4 {
            decode(&mut lanes[0], &keys[round]);
            encode(&mut lanes[1], &keys[round]);
            decode(&mut lanes[2], &keys[4 + round]);
            encode(&mut lanes[3], &keys[4 + round]);
        }

        for (i, lane) in lanes.iter().enumerate() {
            chunk[16 * i..16 * (i + 1)].copy_from_slice(lane.as_slice());
        }
    }

    store_lanes(seed, &lanes);
    Ok(())
}

/// 1-round fingerprint: absorbs `input` 64 bytes at a time into four lanes
/// (input blocks act as round keys), applies two fixed-key finalization
/// rounds and concatenates the lanes into a 64-byte digest.
pub fn hash_1r(output: &mut [u8; 64], input: &[u8]) -> Result<()> {
    if input.len() % 64 != 0 {
        return Err(Error::InvalidArgument(format!(
            "invalid input size: {}",
            input.len()
        )));
    }

    let mut lanes = load_lanes(&HASH_1R_STATE);

    for chunk in input.chunks_exact(64) {
        encode(&mut lanes[0], Block::from_slice(&chunk[0..16]));
        decode(&mut lanes[1], Block::from_slice(&chunk[16..32]));
        encode(&mut lanes[2], Block::from_slice(&chunk[32..48]));
        decode(&mut lanes[3], Block::from_slice(&chunk[48..64]));
    }

    for xkey in &HASH_1R_XKEYS {
        let key = Block::from(*xkey);
        encode(&mut lanes[0], &key);
        decode(&mut lanes[1], &key);
        encode(&mut lanes[2], &key);
        decode(&mut lanes[3], &key);
    }

    store_lanes(output, &lanes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 64] {
        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(
            &hex::decode("6c19536eb2de31b6c0065f7f116e86f960d8af0c57210a6584c3237b9d064dc7")
                .unwrap(),
        );
        seed
    }

    #[test]
    fn fill_1r_vectors() {
        let mut seed = test_seed();

        let mut out = [0u8; 64];
        fill_1r(&mut out, &mut seed).unwrap();

        let expected = hex::decode(
            "fa89397dd6ca422513aeadba3f124b5540324c4ad4b6db434394307a17c833ab\
             a330406d942cc6cd1d2b92a617b1726c56e28c091f52d9d2eb2f527537f2752a",
        )
        .unwrap();
        assert_eq!(out.as_slice(), expected.as_slice());
        // The seed was replaced with the final lane state, which for a
        // 64-byte output equals the output itself.
        assert_eq!(seed.as_slice(), expected.as_slice());

        let mut out2 = [0u8; 256];
        fill_1r(&mut out2, &mut seed).unwrap();

        let expected2 = hex::decode(
            "231125d76543e806c015cf2edd4611eaa15495f8eef5fc0a5c63abccb3606e33\
             cb149022a2cc6188e44e6b95a3c46d4aa9d56a7344664d6010b55daa60e2c270\
             67ba55efc6af1f758925ce702d1b8982f32f3222954f5f1aca3b42fd0f714abc\
             17fa2e3e5c66829465bd54cd8cbe4d4cc0b164d9847bb469667b0c72a5d5f781\
             694451d6029405cad12c7a82374dda2cc3a002182176bbf3ef3d4954069ebbe5\
             810a8d7fe93ed5e7f2bcfb4632a95789cb6c8778fca14b73514597ead6d01986\
             86f3781633ba4e3c41ededd5f8439cb5f1656cb5c24a9314ba8e080b616d81f6\
             d56635cd239954576b89691a22695da9913d0579dd8608a339cb341c678e5fbe",
        )
        .unwrap();
        assert_eq!(out2.as_slice(), expected2.as_slice());
    }

    #[test]
    fn fill_4r_vectors() {
        let mut seed = test_seed();

        let mut out = [0u8; 64];
        fill_4r(&mut out, &mut seed).unwrap();

        let expected = hex::decode(
            "7596e422dba53fa5c112391178256860b4124e33c3c1a6285fa051a3c0a79ab4\
             c9ae1320506ab932d5ad00e6145cd658554d4c885ce082b23031cd407103e724",
        )
        .unwrap();
        assert_eq!(out.as_slice(), expected.as_slice());

        let mut out2 = [0u8; 256];
        fill_4r(&mut out2, &mut seed).unwrap();

        let expected2 = hex::decode(
            "821ad10a2a03eb20f2f3c23044d63fb9f44d9dd574de80125f6fd481a4b9f9a4\
             3e6c6b6f03609ae4307e84a34cd0cd5d13edc5d00962145ca8e1fe46525b6f6e\
             a57599803f7ed461b47cbb677140d9d258968358885adff25519024b63c672f7\
             328ae872ce28e8d6f024f2b5f7eb931e16254a6294fa778cc60d27eb9c32047d\
             fe7826c999c7b1be4137c9ee08682d6f2aa9977a1c9539c1c4558f4becf1e9a7\
             e507a4126b217bbb9347e0a556c4f2608b744fd20d7f44086ebc52a3879f9fbe\
             0e56017f831f129127cf156fc68c0ca6bcadfdc1072ff19bafade206cbd0dc5d\
             993beca12ca0ada0354eb23a3710a043644e8bc1ed12c9c015e16ad29a04ac78",
        )
        .unwrap();
        assert_eq!(out2.as_slice(), expected2.as_slice());
    }

    #[test]
    fn hash_1r_vectors() {
        let input = hex::decode(
            "2e8bf089473ac54d9876c553391dd237e37579bd740d0abf80738f76780551fa\
             9d0136bcfef4390017905477122d75ea8bfff5a6410e6141df1b124c8d561db3",
        )
        .unwrap();

        let mut digest = [0u8; 64];
        hash_1r(&mut digest, &input).unwrap();

        let expected = hex::decode(
            "156e437289bf8919fc1e6e0df209937a5875e7912f764ee97fcfb4c8f448a055\
             f8cdf2d7ab419457e2626b5861fa6f83c8f8c06dd4acc1c3cd9bd0e392a1d108",
        )
        .unwrap();
        assert_eq!(digest.as_slice(), expected.as_slice());

        let mut long_input = Vec::with_capacity(256);
        for _ in 0..4 {
            long_input.extend_from_slice(&input);
        }

        hash_1r(&mut digest, &long_input).unwrap();

        let expected2 = hex::decode(
            "576886cf0f39f82b6cb4040fed5f33faaf435b5c4936245446557967921599d7\
             cc99c4c7c891a9843a65f6028bcb4179016e2e2bdc50f8bd6f2971c058e6146e",
        )
        .unwrap();
        assert_eq!(digest.as_slice(), expected2.as_slice());
    }

    #[test]
    fn rejects_unaligned_sizes() {
        let mut seed = test_seed();
        let mut out = [0u8; 63];
        assert!(fill_1r(&mut out, &mut seed).is_err());
        assert!(fill_4r(&mut out, &mut seed).is_err());

        let mut digest = [0u8; 64];
        assert!(hash_1r(&mut digest, &[0u8; 100]).is_err());
    }
}
