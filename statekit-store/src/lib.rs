//! # statekit-store
//!
//! In-memory persistence adapter for the statekit engine.
//!
//! [`MemoryStore`] implements the [`MachineStore`](statekit_core::MachineStore)
//! contract with atomic check-and-set lock semantics. It is the reference
//! adapter: durable implementations should copy its lock and commit
//! discipline onto their own medium.

pub mod memory;

pub use memory::MemoryStore;
