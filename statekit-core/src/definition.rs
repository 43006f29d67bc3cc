//! Machine definition types and the definition builder.
//!
//! A definition is built once, validated exhaustively, and then shared
//! immutably (behind an `Arc`) by every instance of that machine type:
//!
//! ```
//! use statekit_core::{MachineDefinition, Transition};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum S { Draft, Live }
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum E { Publish }
//!
//! let def = MachineDefinition::builder("post")
//!     .states([S::Draft, S::Live])
//!     .events([E::Publish])
//!     .initial_state(S::Draft)
//!     .terminal_states([S::Live])
//!     .transition(Transition::event(S::Draft, S::Live, E::Publish))
//!     .state_to_string(|s| format!("{s:?}"))
//!     .string_to_state(|s| match s {
//!         "Draft" => Some(S::Draft),
//!         "Live" => Some(S::Live),
//!         _ => None,
//!     })
//!     .event_to_string(|e| format!("{e:?}"))
//!     .string_to_event(|e| match e {
//!         "Publish" => Some(E::Publish),
//!         _ => None,
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert!(def.transition_for(&S::Draft, &E::Publish).is_some());
//! ```

use crate::error::FsmError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Mutable data carried by a machine instance, keyed and valued by strings.
pub type Context = HashMap<String, String>;

/// Failure reported by a transition action.
#[derive(Debug, Clone)]
pub struct ActionError {
    reason: String,
}

impl ActionError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

impl std::error::Error for ActionError {}

/// Side effect executed as part of a transition.
///
/// The action receives a copy of the instance context and returns the
/// context the instance should carry after the transition. If the action
/// fails, the transition does not commit and the instance keeps its prior
/// state and context.
pub trait TransitionAction: Send + Sync {
    fn run(&self, ctx: Context) -> Result<Context, ActionError>;
}

impl<F> TransitionAction for F
where
    F: Fn(Context) -> Result<Context, ActionError> + Send + Sync,
{
    fn run(&self, ctx: Context) -> Result<Context, ActionError> {
        self(ctx)
    }
}

/// What fires a transition: an external event, or nothing at all (STP).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger<E> {
    /// Straight-through processing: fires as soon as the source state is
    /// entered, with no external event.
    Automatic,
    /// Fires when the named event is sent to the machine.
    Event(E),
}

/// An edge in the machine graph.
#[derive(Clone)]
pub struct Transition<S, E> {
    pub from: S,
    pub to: S,
    pub trigger: Trigger<E>,
    pub action: Option<Arc<dyn TransitionAction>>,
}

impl<S, E> Transition<S, E> {
    /// An event-triggered transition with no action.
    pub fn event(from: S, to: S, event: E) -> Self {
        Self {
            from,
            to,
            trigger: Trigger::Event(event),
            action: None,
        }
    }

    /// An event-triggered transition that executes an action.
    pub fn event_with_action(
        from: S,
        to: S,
        event: E,
        action: impl TransitionAction + 'static,
    ) -> Self {
        Self {
            from,
            to,
            trigger: Trigger::Event(event),
            action: Some(Arc::new(action)),
        }
    }

    /// An automatic (STP) transition with no action.
    pub fn stp(from: S, to: S) -> Self {
        Self {
            from,
            to,
            trigger: Trigger::Automatic,
            action: None,
        }
    }

    /// An automatic (STP) transition that executes an action.
    pub fn stp_with_action(from: S, to: S, action: impl TransitionAction + 'static) -> Self {
        Self {
            from,
            to,
            trigger: Trigger::Automatic,
            action: Some(Arc::new(action)),
        }
    }

    /// Returns true if this transition fires without an external event.
    pub fn is_automatic(&self) -> bool {
        matches!(self.trigger, Trigger::Automatic)
    }
}

impl<S: fmt::Debug, E: fmt::Debug> fmt::Debug for Transition<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("trigger", &self.trigger)
            .field("action", &self.action.as_ref().map(|_| "<action>"))
            .finish()
    }
}

type Encoder<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
type Decoder<T> = Arc<dyn Fn(&str) -> Option<T> + Send + Sync>;

/// The four caller-supplied conversion functions between states/events and
/// their string representation. The persistence layer relies on these being
/// mutual inverses over the declared state and event sets.
#[derive(Clone)]
pub(crate) struct StateCodec<S, E> {
    pub(crate) state_to_string: Encoder<S>,
    pub(crate) string_to_state: Decoder<S>,
    pub(crate) event_to_string: Encoder<E>,
    pub(crate) string_to_event: Decoder<E>,
}

/// Lookup key for the transition table: `(from, event)` for triggered rows,
/// `(from, None)` for the single STP row a state may have.
type TransitionKey<S, E> = (S, Option<E>);

/// Validated, immutable blueprint of a machine type.
pub struct MachineDefinition<S, E> {
    name: String,
    states: HashSet<S>,
    events: HashSet<E>,
    initial: S,
    terminal: HashSet<S>,
    transitions: HashMap<TransitionKey<S, E>, Transition<S, E>>,
    codec: StateCodec<S, E>,
}

impl<S, E> MachineDefinition<S, E>
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    /// Starts building a definition for the named machine type.
    pub fn builder(name: impl Into<String>) -> MachineDefinitionBuilder<S, E> {
        MachineDefinitionBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &HashSet<S> {
        &self.states
    }

    pub fn events(&self) -> &HashSet<E> {
        &self.events
    }

    pub fn initial_state(&self) -> &S {
        &self.initial
    }

    pub fn terminal_states(&self) -> &HashSet<S> {
        &self.terminal
    }

    /// Returns true if the given state accepts no further transitions.
    pub fn is_terminal(&self, state: &S) -> bool {
        self.terminal.contains(state)
    }

    /// Looks up the transition fired by `event` from `state`.
    pub fn transition_for(&self, state: &S, event: &E) -> Option<&Transition<S, E>> {
        self.transitions
            .get(&(state.clone(), Some(event.clone())))
    }

    /// Looks up the automatic (STP) transition out of `state`, if any.
    pub fn stp_transition_for(&self, state: &S) -> Option<&Transition<S, E>> {
        self.transitions.get(&(state.clone(), None))
    }

    pub fn encode_state(&self, state: &S) -> String {
        (self.codec.state_to_string)(state)
    }

    /// Decodes a stored state string, rejecting anything outside the
    /// declared state set.
    pub fn decode_state(&self, repr: &str) -> Result<S, FsmError> {
        (self.codec.string_to_state)(repr)
            .filter(|s| self.states.contains(s))
            .ok_or_else(|| FsmError::Decode {
                reason: format!("'{repr}' is not a state of machine '{}'", self.name),
            })
    }

    pub fn encode_event(&self, event: &E) -> String {
        (self.codec.event_to_string)(event)
    }

    /// Decodes a stored event string, rejecting anything outside the
    /// declared event set.
    pub fn decode_event(&self, repr: &str) -> Result<E, FsmError> {
        (self.codec.string_to_event)(repr)
            .filter(|e| self.events.contains(e))
            .ok_or_else(|| FsmError::Decode {
                reason: format!("'{repr}' is not an event of machine '{}'", self.name),
            })
    }
}

impl<S, E> fmt::Debug for MachineDefinition<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineDefinition")
            .field("name", &self.name)
            .field("states", &self.states.len())
            .field("events", &self.events.len())
            .field("transitions", &self.transitions.len())
            .finish()
    }
}

/// Fluent builder for [`MachineDefinition`]. All validation happens in
/// [`build`](MachineDefinitionBuilder::build); no partially-validated
/// definition is ever exposed.
pub struct MachineDefinitionBuilder<S, E> {
    name: String,
    states: Vec<S>,
    events: Vec<E>,
    initial: Option<S>,
    terminal: Vec<S>,
    transitions: Vec<Transition<S, E>>,
    state_to_string: Option<Encoder<S>>,
    string_to_state: Option<Decoder<S>>,
    event_to_string: Option<Encoder<E>>,
    string_to_event: Option<Decoder<E>>,
}

impl<S, E> MachineDefinitionBuilder<S, E>
where
    S: Clone + Eq + Hash,
    E: Clone + Eq + Hash,
{
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            events: Vec::new(),
            initial: None,
            terminal: Vec::new(),
            transitions: Vec::new(),
            state_to_string: None,
            string_to_state: None,
            event_to_string: None,
            string_to_event: None,
        }
    }

    pub fn states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.states.extend(states);
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = E>) -> Self {
        self.events.extend(events);
        self
    }

    pub fn initial_state(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    pub fn terminal_states(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.terminal.extend(states);
        self
    }

    pub fn transition(mut self, transition: Transition<S, E>) -> Self {
        self.transitions.push(transition);
        self
    }

    pub fn transitions(mut self, transitions: impl IntoIterator<Item = Transition<S, E>>) -> Self {
        self.transitions.extend(transitions);
        self
    }

    pub fn state_to_string(mut self, f: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        self.state_to_string = Some(Arc::new(f));
        self
    }

    pub fn string_to_state(mut self, f: impl Fn(&str) -> Option<S> + Send + Sync + 'static) -> Self {
        self.string_to_state = Some(Arc::new(f));
        self
    }

    pub fn event_to_string(mut self, f: impl Fn(&E) -> String + Send + Sync + 'static) -> Self {
        self.event_to_string = Some(Arc::new(f));
        self
    }

    pub fn string_to_event(mut self, f: impl Fn(&str) -> Option<E> + Send + Sync + 'static) -> Self {
        self.string_to_event = Some(Arc::new(f));
        self
    }

    /// Validates the accumulated configuration and produces the immutable
    /// definition, or fails naming the first violated invariant.
    pub fn build(self) -> Result<MachineDefinition<S, E>, FsmError> {
        if self.name.is_empty() {
            return Err(config_error("machine name is not set"));
        }

        let codec = StateCodec {
            state_to_string: self
                .state_to_string
                .ok_or_else(|| config_error("state_to_string conversion is not set"))?,
            string_to_state: self
                .string_to_state
                .ok_or_else(|| config_error("string_to_state conversion is not set"))?,
            event_to_string: self
                .event_to_string
                .ok_or_else(|| config_error("event_to_string conversion is not set"))?,
            string_to_event: self
                .string_to_event
                .ok_or_else(|| config_error("string_to_event conversion is not set"))?,
        };

        let states: HashSet<S> = self.states.into_iter().collect();
        if states.is_empty() {
            return Err(config_error("no states declared"));
        }
        let events: HashSet<E> = self.events.into_iter().collect();

        let encode = |s: &S| (codec.state_to_string)(s);

        let initial = self
            .initial
            .ok_or_else(|| config_error("initial state is not set"))?;
        if !states.contains(&initial) {
            return Err(config_error(format!(
                "initial state '{}' is not a declared state",
                encode(&initial)
            )));
        }

        let mut terminal = HashSet::new();
        for state in self.terminal {
            if !states.contains(&state) {
                return Err(config_error(format!(
                    "terminal state '{}' is not a declared state",
                    encode(&state)
                )));
            }
            terminal.insert(state);
        }

        let mut transitions: HashMap<TransitionKey<S, E>, Transition<S, E>> = HashMap::new();
        for t in self.transitions {
            if !states.contains(&t.from) {
                return Err(config_error(format!(
                    "transition source '{}' is not a declared state",
                    encode(&t.from)
                )));
            }
            if !states.contains(&t.to) {
                return Err(config_error(format!(
                    "transition target '{}' is not a declared state",
                    encode(&t.to)
                )));
            }
            if terminal.contains(&t.from) {
                return Err(config_error(format!(
                    "terminal state '{}' has an outgoing transition",
                    encode(&t.from)
                )));
            }

            let key = match &t.trigger {
                Trigger::Event(event) => {
                    if !events.contains(event) {
                        return Err(config_error(format!(
                            "transition event '{}' is not a declared event",
                            (codec.event_to_string)(event)
                        )));
                    }
                    (t.from.clone(), Some(event.clone()))
                }
                Trigger::Automatic => (t.from.clone(), None),
            };

            if transitions.contains_key(&key) {
                let reason = match &key.1 {
                    Some(event) => format!(
                        "duplicate transition from '{}' on event '{}'",
                        encode(&t.from),
                        (codec.event_to_string)(event)
                    ),
                    None => format!(
                        "duplicate automatic transition from '{}'",
                        encode(&t.from)
                    ),
                };
                return Err(config_error(reason));
            }
            transitions.insert(key, t);
        }

        Ok(MachineDefinition {
            name: self.name,
            states,
            events,
            initial,
            terminal,
            transitions,
            codec,
        })
    }
}

fn config_error(reason: impl Into<String>) -> FsmError {
    FsmError::Configuration {
        reason: reason.into(),
    }
}
