//! Machine instance model and its string-encoded persistence form.

use crate::definition::{Context, MachineDefinition};
use crate::error::FsmError;
use crate::store::LockToken;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A runtime instance of a machine type.
///
/// Instances start in the definition's initial state with no id and no
/// lock; the persistence adapter assigns the id on
/// [`create`](crate::store::MachineStore::create), and a lock token is
/// attached while the holder has exclusive mutation rights.
pub struct MachineInstance<S, E> {
    id: Option<String>,
    def: Arc<MachineDefinition<S, E>>,
    current_state: S,
    context: Context,
    lock: Option<LockToken>,
    created_at: i64,
    updated_at: i64,
}

impl<S, E> MachineInstance<S, E>
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    /// Starts building an instance of the given machine type.
    pub fn of_type(def: &Arc<MachineDefinition<S, E>>) -> InstanceBuilder<S, E> {
        InstanceBuilder {
            def: Arc::clone(def),
        }
    }

    /// The id assigned by the persistence layer, if any.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn definition(&self) -> &Arc<MachineDefinition<S, E>> {
        &self.def
    }

    pub fn current_state(&self) -> &S {
        &self.current_state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The lock token held by this in-memory handle, if any. Only the
    /// holder of the token may commit or unlock the stored record.
    pub fn lock_token(&self) -> Option<&LockToken> {
        self.lock.as_ref()
    }

    /// Returns true if the instance has reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.def.is_terminal(&self.current_state)
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Assigns the storage id. Called by persistence adapters when the
    /// instance is first created.
    pub fn assign_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Attaches a lock token obtained from the adapter.
    pub fn attach_lock(&mut self, token: LockToken) {
        self.lock = Some(token);
    }

    /// Detaches and returns the held lock token, if any.
    pub fn take_lock(&mut self) -> Option<LockToken> {
        self.lock.take()
    }

    /// Commits a transition: state and context change together, never
    /// independently.
    pub(crate) fn commit_transition(&mut self, to: S, context: Context) {
        self.current_state = to;
        self.context = context;
        self.updated_at = now_millis();
    }

    /// Encodes the instance into its columnar string form for storage.
    /// Fails with [`FsmError::NotPersisted`] until an id is assigned.
    pub fn to_record(&self) -> Result<InstanceRecord, FsmError> {
        let id = self.id.clone().ok_or(FsmError::NotPersisted)?;
        Ok(InstanceRecord {
            id,
            machine: self.def.name().to_string(),
            state: self.def.encode_state(&self.current_state),
            context: self.context.clone(),
            locked_by: self.lock.as_ref().map(|t| t.as_str().to_string()),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    /// Reconstitutes an instance from its stored form using the
    /// definition's conversion functions.
    ///
    /// The result never carries a lock token: the token is proof of
    /// ownership, and reading a record does not confer it.
    pub fn from_record(
        def: &Arc<MachineDefinition<S, E>>,
        record: &InstanceRecord,
    ) -> Result<Self, FsmError> {
        if record.machine != def.name() {
            return Err(FsmError::Decode {
                reason: format!(
                    "record for instance '{}' belongs to machine '{}', not '{}'",
                    record.id,
                    record.machine,
                    def.name()
                ),
            });
        }
        let current_state = def.decode_state(&record.state)?;
        Ok(Self {
            id: Some(record.id.clone()),
            def: Arc::clone(def),
            current_state,
            context: record.context.clone(),
            lock: None,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl<S: fmt::Debug, E> fmt::Debug for MachineInstance<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineInstance")
            .field("id", &self.id)
            .field("state", &self.current_state)
            .field("context", &self.context)
            .field("locked", &self.lock.is_some())
            .finish()
    }
}

/// Second step of instance construction: `of_type(def).with_context(ctx)`.
pub struct InstanceBuilder<S, E> {
    def: Arc<MachineDefinition<S, E>>,
}

impl<S, E> InstanceBuilder<S, E>
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    /// Produces a fresh instance in the definition's initial state carrying
    /// the given context. No transitions fire here; automatic transitions
    /// run only when the executor first drives the instance.
    pub fn with_context(self, context: Context) -> MachineInstance<S, E> {
        let now = now_millis();
        MachineInstance {
            id: None,
            current_state: self.def.initial_state().clone(),
            def: self.def,
            context,
            lock: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// String-encoded instance as the persistence layer stores it. The `state`
/// column holds the definition codec's encoding; `locked_by` is the lock
/// token currently holding the record, adapter-internal and never exposed
/// through [`MachineInstance::from_record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub machine: String,
    pub state: String,
    pub context: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}
