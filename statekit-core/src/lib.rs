//! # statekit-core
//!
//! Generic finite-state-machine execution engine.
//!
//! This crate provides:
//! - Machine definition building and exhaustive validation
//! - Typed machine instances with a string-keyed context
//! - Transition execution: event dispatch and automatic (STP) chaining
//! - Single-writer lock discipline over a narrow persistence-adapter
//!   contract
//!
//! The core is pure computation: it never performs I/O of its own, and
//! consumes durable storage only through the [`MachineStore`] trait.

pub mod definition;
pub mod error;
pub mod executor;
pub mod instance;
pub mod service;
pub mod store;

pub use definition::{
    ActionError, Context, MachineDefinition, MachineDefinitionBuilder, Transition,
    TransitionAction, Trigger,
};
pub use error::FsmError;
pub use instance::{InstanceRecord, MachineInstance};
pub use service::MachineService;
pub use store::{LockToken, MachineStore};
