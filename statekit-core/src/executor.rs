//! Transition execution: event dispatch and the automatic (STP) drain.
//!
//! Both entry points are all-or-nothing per transition: the action runs
//! over a copy of the context, and state and context are committed
//! together only if it succeeds. A failed action, a missing transition
//! row, or a detected STP cycle leaves the instance exactly as the last
//! successful commit left it.

use crate::definition::{MachineDefinition, Transition, Trigger};
use crate::error::FsmError;
use crate::instance::MachineInstance;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

impl<S, E> MachineInstance<S, E>
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    /// Applies a single event-triggered transition.
    ///
    /// Fails with [`FsmError::NoSuchTransition`] if the current state is
    /// terminal or has no row for the event; the instance is unchanged.
    /// Does not drain automatic transitions afterwards; compose with
    /// [`advance`](MachineInstance::advance) for straight-through chaining.
    pub fn apply(&mut self, event: &E) -> Result<(), FsmError> {
        let def = Arc::clone(self.definition());

        let lookup = if def.is_terminal(self.current_state()) {
            None
        } else {
            def.transition_for(self.current_state(), event)
        };
        let transition = lookup.ok_or_else(|| FsmError::NoSuchTransition {
            state: def.encode_state(self.current_state()),
            event: def.encode_event(event),
        })?;

        self.fire(&def, transition)
    }

    /// Drains automatic (STP) transitions from the current state.
    ///
    /// Stops cleanly when the current state is terminal or has no STP row.
    /// Revisiting a state within one drain is a cycle no external event
    /// can break; the drain aborts with [`FsmError::InfiniteLoop`] and the
    /// instance stays at the last committed state.
    pub fn advance(&mut self) -> Result<(), FsmError> {
        let def = Arc::clone(self.definition());
        let mut visited: HashSet<S> = HashSet::new();

        loop {
            if def.is_terminal(self.current_state()) {
                return Ok(());
            }
            let Some(transition) = def.stp_transition_for(self.current_state()) else {
                return Ok(());
            };
            if !visited.insert(self.current_state().clone()) {
                return Err(FsmError::InfiniteLoop {
                    state: def.encode_state(self.current_state()),
                });
            }
            self.fire(&def, transition)?;
        }
    }

    fn fire(
        &mut self,
        def: &MachineDefinition<S, E>,
        transition: &Transition<S, E>,
    ) -> Result<(), FsmError> {
        let next_context = match &transition.action {
            Some(action) => {
                action
                    .run(self.context().clone())
                    .map_err(|e| FsmError::ActionExecution {
                        state: def.encode_state(self.current_state()),
                        reason: e.to_string(),
                    })?
            }
            None => self.context().clone(),
        };

        tracing::debug!(
            machine = def.name(),
            from = %def.encode_state(&transition.from),
            to = %def.encode_state(&transition.to),
            automatic = matches!(transition.trigger, Trigger::Automatic),
            "transition fired"
        );

        self.commit_transition(transition.to.clone(), next_context);
        Ok(())
    }
}
