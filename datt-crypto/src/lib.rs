// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous cryptography for datt nodes.
//!
//! CPU-bound work (hashing, key derivation, signing, verification) runs on a bounded pool of OS
//! threads so the protocol loop never blocks on it. A process-wide default pool is created
//! lazily and shared by every [`CryptoEngine`] that does not bring its own; passing an explicit
//! [`WorkerPool`] keeps an engine fully isolated, which is what tests want.

mod engine;
mod pool;

pub use engine::{ChildXkeys, CryptoEngine, CryptoEngineError, Endian, Xkeys};
pub use pool::WorkerPool;
