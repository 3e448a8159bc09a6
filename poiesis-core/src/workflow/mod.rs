//! Workflow definitions and execution
//!
//! A workflow is an ordered list of phases, each resolved to a provider
//! capability at run time. The [`engine::WorkflowEngine`] drives one task per
//! execution through its phases; the [`executor::PhaseExecutor`] handles the
//! per-phase timeout/retry/quality-gate cycle; [`refine::RefineLoop`] adds
//! the workflow-level self-critique iteration.

pub mod adapter;
pub mod context;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod phase;
pub mod quality;
pub mod refine;

pub use adapter::{PhaseSpec, WorkflowAdapter};
pub use context::WorkflowContext;
pub use definition::{RefineLoopConfig, WorkflowDefinition};
pub use engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use executor::PhaseExecutor;
pub use phase::{PhaseConfig, PhaseResult, PhaseStatus, MAX_RETRIES_LIMIT, TIMEOUT_SECONDS_RANGE};
pub use quality::{Assessment, Assessor, FnAssessor, RouterAssessor};
pub use refine::RefineLoop;
