//! Workflow engine core: definitions, node evaluation, execution, scheduling.
//!
//! - `definition` -- YAML parsing and structural validation
//! - `graph` -- petgraph view of a workflow for reachability and loop checks
//! - `context` -- execution context keys and message template rendering
//! - `predicate` -- condition node predicate evaluation
//! - `split` -- weighted and field-based branch selection
//! - `evaluator` -- per-node decisions
//! - `checkpoint` -- conditional writes of execution transitions
//! - `executor` -- the execution state machine
//! - `retry` -- back-off policy, due-retry lookup, maintenance
//! - `scheduler` -- due schedule processing and next-fire computation
//! - `tick` -- the periodic orchestration entry point

pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod evaluator;
pub mod executor;
pub mod graph;
pub mod predicate;
pub mod retry;
pub mod scheduler;
pub mod split;
pub mod tick;

#[cfg(test)]
pub(crate) mod testing;
