//! Lock-aware machine service.
//!
//! Ties the executor to a persistence adapter: every mutation runs inside
//! a lock -> read -> execute -> commit envelope, and the commit releases
//! the lock in the same step that persists the new state. On any failure
//! after acquisition the lock is rolled back and the original error is
//! surfaced.

use crate::definition::{Context, MachineDefinition};
use crate::error::FsmError;
use crate::instance::MachineInstance;
use crate::store::MachineStore;
use std::hash::Hash;
use std::sync::Arc;

/// Drives persisted machine instances through a [`MachineStore`].
pub struct MachineService<T> {
    store: T,
}

impl<T> MachineService<T> {
    pub fn new(store: T) -> Self {
        Self { store }
    }

    /// The underlying adapter.
    pub fn store(&self) -> &T {
        &self.store
    }

    /// Builds an instance of `def` with the given context and persists it.
    /// The adapter assigns the id and establishes the lock in the caller's
    /// favor, so the returned instance is ready to be driven and then
    /// [`complete`](MachineService::complete)d or
    /// [`release`](MachineService::release)d.
    pub fn create<S, E>(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        context: Context,
    ) -> Result<MachineInstance<S, E>, FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        let instance = MachineInstance::of_type(def).with_context(context);
        let stored = self.store.create(instance)?;
        tracing::debug!(
            machine = def.name(),
            instance = stored.id().unwrap_or("?"),
            "instance created"
        );
        Ok(stored)
    }

    /// Reconstitutes the instance with the given id. The result carries no
    /// lock token.
    pub fn read<S, E>(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
    ) -> Result<MachineInstance<S, E>, FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        self.store.read(def, id)
    }

    /// Sends an event to the instance with the given id: applies the
    /// matching transition, drains any automatic transitions it enabled,
    /// and commits the result. Returns the updated, unlocked instance.
    pub fn send_event<S, E>(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
        event: &E,
    ) -> Result<MachineInstance<S, E>, FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        self.drive(def, id, |instance| {
            instance.apply(event)?;
            instance.advance()
        })
    }

    /// Drains pending automatic transitions of the instance with the given
    /// id and commits the result.
    pub fn advance_machine<S, E>(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
    ) -> Result<MachineInstance<S, E>, FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        self.drive(def, id, MachineInstance::advance)
    }

    /// Commits an instance the caller already holds the lock for (the
    /// post-`create` flow). The commit releases the lock; the instance's
    /// token is detached on success.
    pub fn complete<S, E>(&self, instance: &mut MachineInstance<S, E>) -> Result<(), FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        if instance.lock_token().is_none() {
            return Err(FsmError::LockRequired {
                instance_id: instance.id().unwrap_or("?").to_string(),
            });
        }
        self.store.commit(instance)?;
        instance.take_lock();
        Ok(())
    }

    /// Releases an instance's lock without committing anything. On failure
    /// the token stays attached.
    pub fn release<S, E>(&self, instance: &mut MachineInstance<S, E>) -> Result<(), FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        let id = match instance.id() {
            Some(id) => id.to_string(),
            None => return Err(FsmError::NotPersisted),
        };
        let token = instance.take_lock().ok_or_else(|| FsmError::LockRequired {
            instance_id: id.clone(),
        })?;
        if let Err(err) = self.store.unlock(&id, &token) {
            instance.attach_lock(token);
            return Err(err);
        }
        Ok(())
    }

    /// The lock -> read -> execute -> commit envelope shared by all
    /// by-id mutations. On any failure after acquisition the lock is
    /// released; an unlock failure is logged but never masks the
    /// original error.
    fn drive<S, E>(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
        step: impl FnOnce(&mut MachineInstance<S, E>) -> Result<(), FsmError>,
    ) -> Result<MachineInstance<S, E>, FsmError>
    where
        T: MachineStore<S, E>,
        S: Clone + Eq + Hash,
        E: Clone + Eq + Hash,
    {
        let token = self.store.lock(id)?;

        let attempt = self.store.read(def, id).and_then(|mut instance| {
            instance.attach_lock(token.clone());
            step(&mut instance)?;
            self.store.commit(&instance)?;
            instance.take_lock();
            Ok(instance)
        });

        match attempt {
            Ok(instance) => Ok(instance),
            Err(err) => {
                if let Err(unlock_err) = self.store.unlock(id, &token) {
                    tracing::warn!(
                        instance = id,
                        error = %unlock_err,
                        "failed to release lock after aborted mutation"
                    );
                }
                Err(err)
            }
        }
    }
}
