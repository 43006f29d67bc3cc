//! In-memory machine store.
//!
//! Records live in a [`DashMap`] keyed by instance id. Every lock
//! operation mutates the record through the map's entry guard, which holds
//! the shard lock for the duration: the check and the set are a single
//! atomic step, so two racing `lock` calls can never both succeed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use statekit_core::{
    FsmError, InstanceRecord, LockToken, MachineDefinition, MachineInstance, MachineStore,
};
use std::hash::Hash;
use std::sync::Arc;
use uuid::Uuid;

/// The reference [`MachineStore`] implementation. Nothing survives a
/// process restart; it exists for tests, examples, and as the template
/// for durable adapters.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, InstanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    pub fn instance_count(&self) -> usize {
        self.records.len()
    }

    /// A copy of the raw stored record, mainly for inspection in tests
    /// and tooling.
    pub fn record(&self, id: &str) -> Option<InstanceRecord> {
        self.records.get(id).map(|r| r.clone())
    }
}

impl<S, E> MachineStore<S, E> for MemoryStore
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    fn create(&self, mut instance: MachineInstance<S, E>) -> Result<MachineInstance<S, E>, FsmError> {
        let id = Uuid::new_v4().to_string();
        instance.assign_id(id.clone());
        instance.attach_lock(LockToken::generate());

        let record = instance.to_record()?;
        match self.records.entry(id.clone()) {
            Entry::Occupied(_) => Err(FsmError::Store {
                reason: format!("duplicate instance id: {id}"),
            }),
            Entry::Vacant(slot) => {
                slot.insert(record);
                tracing::debug!(instance = %id, "instance record created");
                Ok(instance)
            }
        }
    }

    fn read(
        &self,
        def: &Arc<MachineDefinition<S, E>>,
        id: &str,
    ) -> Result<MachineInstance<S, E>, FsmError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| FsmError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        MachineInstance::from_record(def, &record)
    }

    fn commit(&self, instance: &MachineInstance<S, E>) -> Result<(), FsmError> {
        let token = instance
            .lock_token()
            .ok_or_else(|| FsmError::LockRequired {
                instance_id: instance.id().unwrap_or("?").to_string(),
            })?;
        let mut record = instance.to_record()?;
        // the commit releases the lock in the same atomic write
        record.locked_by = None;
        let id = record.id.clone();

        let mut stored = self
            .records
            .get_mut(&id)
            .ok_or_else(|| FsmError::InstanceNotFound {
                instance_id: id.clone(),
            })?;
        if stored.locked_by.as_deref() != Some(token.as_str()) {
            return Err(FsmError::LockConflict { instance_id: id });
        }
        record.created_at = stored.created_at;
        *stored = record;
        Ok(())
    }

    fn lock(&self, id: &str) -> Result<LockToken, FsmError> {
        let mut stored = self
            .records
            .get_mut(id)
            .ok_or_else(|| FsmError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        if stored.locked_by.is_some() {
            return Err(FsmError::LockConflict {
                instance_id: id.to_string(),
            });
        }
        let token = LockToken::generate();
        stored.locked_by = Some(token.as_str().to_string());
        Ok(token)
    }

    fn unlock(&self, id: &str, token: &LockToken) -> Result<(), FsmError> {
        let mut stored = self
            .records
            .get_mut(id)
            .ok_or_else(|| FsmError::InstanceNotFound {
                instance_id: id.to_string(),
            })?;
        if stored.locked_by.as_deref() != Some(token.as_str()) {
            return Err(FsmError::LockConflict {
                instance_id: id.to_string(),
            });
        }
        stored.locked_by = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use statekit_core::{Context, Transition};

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum OrderState {
        Created,
        Paid,
        Shipped,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum OrderEvent {
        Pay,
        Ship,
    }

    fn order_machine() -> Arc<MachineDefinition<OrderState, OrderEvent>> {
        Arc::new(
            MachineDefinition::builder("order")
                .states([OrderState::Created, OrderState::Paid, OrderState::Shipped])
                .events([OrderEvent::Pay, OrderEvent::Ship])
                .initial_state(OrderState::Created)
                .terminal_states([OrderState::Shipped])
                .transition(Transition::event(
                    OrderState::Created,
                    OrderState::Paid,
                    OrderEvent::Pay,
                ))
                .transition(Transition::event(
                    OrderState::Paid,
                    OrderState::Shipped,
                    OrderEvent::Ship,
                ))
                .state_to_string(|s| format!("{s:?}"))
                .string_to_state(|s| match s {
                    "Created" => Some(OrderState::Created),
                    "Paid" => Some(OrderState::Paid),
                    "Shipped" => Some(OrderState::Shipped),
                    _ => None,
                })
                .event_to_string(|e| format!("{e:?}"))
                .string_to_event(|e| match e {
                    "Pay" => Some(OrderEvent::Pay),
                    "Ship" => Some(OrderEvent::Ship),
                    _ => None,
                })
                .build()
                .unwrap(),
        )
    }

    fn create_order(
        store: &MemoryStore,
        def: &Arc<MachineDefinition<OrderState, OrderEvent>>,
        ctx: Context,
    ) -> MachineInstance<OrderState, OrderEvent> {
        let instance = MachineInstance::of_type(def).with_context(ctx);
        store.create(instance).unwrap()
    }

    #[test]
    fn test_create_assigns_id_and_lock() {
        let store = MemoryStore::new();
        let def = order_machine();

        let stored = create_order(&store, &def, Context::new());
        assert!(stored.id().is_some());
        assert!(stored.lock_token().is_some());
        assert_eq!(store.instance_count(), 1);

        let record = store.record(stored.id().unwrap()).unwrap();
        assert_eq!(record.state, "Created");
        assert_eq!(
            record.locked_by.as_deref(),
            Some(stored.lock_token().unwrap().as_str())
        );
    }

    #[test]
    fn test_read_reconstitutes_without_lock() {
        let store = MemoryStore::new();
        let def = order_machine();
        let mut ctx = Context::new();
        ctx.insert("customer".to_string(), "c-7".to_string());

        let stored = create_order(&store, &def, ctx.clone());
        let read = store.read(&def, stored.id().unwrap()).unwrap();

        assert_eq!(read.id(), stored.id());
        assert_eq!(*read.current_state(), OrderState::Created);
        assert_eq!(*read.context(), ctx);
        assert!(read.lock_token().is_none());
    }

    #[test]
    fn test_read_unknown_id_fails() {
        let store = MemoryStore::new();
        let def = order_machine();
        assert!(matches!(
            store.read(&def, "missing"),
            Err(FsmError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn test_new_instance_is_locked_in_creators_favor() {
        let store = MemoryStore::new();
        let def = order_machine();
        let stored = create_order(&store, &def, Context::new());
        let id = stored.id().unwrap();

        let err = MachineStore::<OrderState, OrderEvent>::lock(&store, id).unwrap_err();
        assert!(matches!(err, FsmError::LockConflict { .. }));
        assert!(err.to_string().contains(id));
    }

    #[test]
    fn test_unlock_with_wrong_token_is_an_error() {
        let store = MemoryStore::new();
        let def = order_machine();
        let stored = create_order(&store, &def, Context::new());
        let id = stored.id().unwrap();

        let intruder = LockToken::generate();
        let err =
            MachineStore::<OrderState, OrderEvent>::unlock(&store, id, &intruder).unwrap_err();
        assert!(matches!(err, FsmError::LockConflict { .. }));

        // the rightful holder can still release
        MachineStore::<OrderState, OrderEvent>::unlock(
            &store,
            id,
            stored.lock_token().unwrap(),
        )
        .unwrap();
        assert!(store.record(id).unwrap().locked_by.is_none());
    }

    #[test]
    fn test_commit_persists_and_releases_atomically() {
        let store = MemoryStore::new();
        let def = order_machine();
        let mut stored = create_order(&store, &def, Context::new());
        let id = stored.id().unwrap().to_string();

        stored.apply(&OrderEvent::Pay).unwrap();
        store.commit(&stored).unwrap();

        let record = store.record(&id).unwrap();
        assert_eq!(record.state, "Paid");
        assert!(record.locked_by.is_none());

        // releasing freed the id for the next writer
        let token = MachineStore::<OrderState, OrderEvent>::lock(&store, &id).unwrap();
        MachineStore::<OrderState, OrderEvent>::unlock(&store, &id, &token).unwrap();
    }

    #[test]
    fn test_commit_with_stale_token_changes_nothing() {
        let store = MemoryStore::new();
        let def = order_machine();
        let mut stored = create_order(&store, &def, Context::new());
        let id = stored.id().unwrap().to_string();

        // the holder releases, then tries to commit with the stale token
        let token = stored.take_lock().unwrap();
        MachineStore::<OrderState, OrderEvent>::unlock(&store, &id, &token).unwrap();
        stored.attach_lock(token);
        stored.apply(&OrderEvent::Pay).unwrap();

        let err = store.commit(&stored).unwrap_err();
        assert!(matches!(err, FsmError::LockConflict { .. }));
        assert_eq!(store.record(&id).unwrap().state, "Created");
    }

    #[test]
    fn test_lock_race_yields_a_single_winner() {
        let store = Arc::new(MemoryStore::new());
        let def = order_machine();
        let stored = create_order(&store, &def, Context::new());
        let id = stored.id().unwrap().to_string();
        MachineStore::<OrderState, OrderEvent>::unlock(
            &*store,
            &id,
            stored.lock_token().unwrap(),
        )
        .unwrap();

        let threads = 16;
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                std::thread::spawn(move || {
                    MachineStore::<OrderState, OrderEvent>::lock(&*store, &id).is_ok()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    proptest! {
        #[test]
        fn prop_context_survives_create_and_read(
            entries in proptest::collection::hash_map("[a-z]{1,8}", "[ -~]{0,16}", 0..8)
        ) {
            let store = MemoryStore::new();
            let def = order_machine();
            let ctx: Context = entries.into_iter().collect();

            let stored = create_order(&store, &def, ctx.clone());
            let read = store.read(&def, stored.id().unwrap()).unwrap();
            prop_assert_eq!(read.context(), &ctx);
        }
    }

    #[test]
    fn test_record_json_roundtrip() {
        let store = MemoryStore::new();
        let def = order_machine();
        let stored = create_order(&store, &def, Context::new());
        let record = store.record(stored.id().unwrap()).unwrap();

        let json = serde_json::to_string(&record).unwrap();
        let back: InstanceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
