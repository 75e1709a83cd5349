//! # rxhash
//!
//! A CPU-optimized RandomX proof-of-work hash engine, bit-exact with the
//! canonical specification.
//!
//! Given a key (which seeds a 256 MiB Argon2d cache, expanded into a 2 GiB
//! read-only dataset by superscalar programs) and an arbitrary-length
//! input, the engine deterministically computes a 32-byte hash: a fresh
//! random program is generated and compiled for every one of the 8 chained
//! program runs, executed against a 2 MiB scratchpad with dataset mixing,
//! and finalized through an AES fingerprint and Blake2b.
//!
//! ## Example
//!
//! ```no_run
//! use rxhash::Hasher;
//!
//! // Builds the cache and dataset for the key; this is the expensive part
//! // and is reused across hashes.
//! let hasher = Hasher::new(b"test key 000")?;
//!
//! let hash = hasher.run(b"This is a test")?;
//! println!("{}", hash.iter().map(|b| format!("{b:02x}")).collect::<String>());
//! # Ok::<(), rxhash::Error>(())
//! ```
//!
//! ## Layout
//!
//! The crate is organized leaves-first: [`blake2b`], [`aes`] and
//! [`argon2d`] provide the primitives; [`superscalar`] and [`dataset`]
//! build the read-only memory; the VM and [`Hasher`] drive per-hash
//! execution. All algorithm constants live in [`params`].

pub mod aes;
pub mod argon2d;
pub mod blake2b;
pub mod dataset;
mod error;
mod fenv;
mod hasher;
pub mod params;
pub mod program;
mod reciprocal;
pub mod scratchpad;
pub mod superscalar;
mod vm;

pub use error::{Error, Result};
pub use hasher::{BlockTemplate, Hasher};
pub use reciprocal::reciprocal;
pub use scratchpad::Scratchpad;

#[cfg(test)]
mod tests;
