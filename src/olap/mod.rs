//! OLAP connectors.
//!
//! Statements reach a store through an [`OlapConnector`], which admits them
//! by priority and enforces the execution timeout.

mod gate;
mod memory;
mod statement;
mod store;

pub use gate::{GatePermit, PriorityGate};
pub use memory::MemoryOlap;
pub use statement::{
    Column, PRIORITY_INTERACTIVE, PRIORITY_MIGRATION, PRIORITY_RECONCILE, QueryResult, Statement,
    quote_identifier, quote_literal,
};
pub use store::{DEFAULT_MAX_CONCURRENCY, OlapConnector, OlapStore};
