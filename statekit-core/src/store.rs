//! The persistence-adapter contract consumed by the engine.
//!
//! The core never persists anything itself. Adapters implement
//! [`MachineStore`] over whatever durable medium they like; the engine
//! only requires that `lock` is an atomic check-and-set at the storage
//! boundary and that `commit` makes the new state and the lock release
//! visible together.

use crate::definition::MachineDefinition;
use crate::error::FsmError;
use crate::instance::MachineInstance;
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque proof of exclusive mutation rights over one instance identity.
///
/// Not reentrant: holding a token does not allow acquiring a second one
/// for the same id. Compared by value only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Generates a fresh token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps a stored token value, for adapters reloading lock state.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LockToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Durable storage of machine instances.
///
/// Single-writer discipline: `lock` is the sole serialization point for a
/// given id, and every mutation of a stored record happens under a held
/// token. Operations on distinct ids are fully independent.
pub trait MachineStore<S, E>: Send + Sync
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    /// Persists a freshly built instance: assigns an id, stores initial
    /// state and context, and establishes the lock in the caller's favor.
    /// The returned instance carries both the id and the lock token.
    fn create(&self, instance: MachineInstance<S, E>) -> Result<MachineInstance<S, E>, FsmError>;

    /// Reconstitutes an instance from its stored string encoding using
    /// the definition's conversion functions. The result carries no lock
    /// token. Fails with [`FsmError::InstanceNotFound`] if no record
    /// exists for `id`.
    fn read(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
    ) -> Result<MachineInstance<S, E>, FsmError>;

    /// Durably persists the instance's state and context and releases its
    /// lock token, atomically: either both the new state and the release
    /// are visible to a subsequent `read`/`lock`, or neither. Committing
    /// without the matching held token fails with
    /// [`FsmError::LockConflict`] and changes nothing.
    fn commit(&self, instance: &MachineInstance<S, E>) -> Result<(), FsmError>;

    /// Atomically checks-and-sets the lock for `id`, returning a fresh
    /// token, or [`FsmError::LockConflict`] if already held. There is no
    /// lease or expiry: a crashed holder leaves the record locked until
    /// the adapter's operator intervenes.
    fn lock(&self, id: &str) -> Result<LockToken, FsmError>;

    /// Clears the lock for `id`. Only the holder may clear it: a
    /// non-matching token is an explicit [`FsmError::LockConflict`], never
    /// a silent no-op.
    fn unlock(&self, id: &str, token: &LockToken) -> Result<(), FsmError>;
}
