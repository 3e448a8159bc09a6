//! # Poiesis
//!
//! An orchestration engine for multi-phase content generation. Workflows are
//! ordered lists of phases; each phase asks a routed model provider for one
//! capability (research, content, assessment, image, publishing) and carries
//! its own timeout, retry budget, and optional quality gate.
//!
//! The main pieces:
//!
//! - [`provider::ProviderRegistry`] + [`provider::ModelRouter`]: capability
//!   profiles and prioritized fallback chains over generation backends
//! - [`workflow::WorkflowEngine`]: runs one task through its phases with
//!   cooperative cancellation and a workflow-level timeout ceiling
//! - [`workflow::RefineLoop`]: bounded draft/assess/refine self-critique
//! - [`store::TaskStore`]: persistence seam; an in-memory store ships for
//!   tests and single-process use
//! - [`api::Orchestrator`]: the narrow async surface embedders call
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use poiesis_core::api::Orchestrator;
//! use poiesis_core::config::EngineConfig;
//! use poiesis_core::provider::{backends::OllamaBackend, Capability, ModelProfile, ModelRouter, ProviderRegistry};
//! use poiesis_core::store::InMemoryTaskStore;
//! use poiesis_core::workflow::{PhaseConfig, WorkflowAdapter, WorkflowDefinition, WorkflowEngine};
//!
//! # async fn run() -> poiesis_core::Result<()> {
//! let mut registry = ProviderRegistry::new();
//! registry.register(
//!     ModelProfile::new("ollama")
//!         .with_capabilities([Capability::Research, Capability::Content, Capability::Assess])
//!         .local(),
//!     Arc::new(OllamaBackend::from_env()),
//! )?;
//! let registry = Arc::new(registry);
//!
//! let router = Arc::new(ModelRouter::builder(registry.clone()).build());
//! let store = InMemoryTaskStore::shared();
//! let engine = Arc::new(
//!     WorkflowEngine::builder(router, store.clone())
//!         .config(EngineConfig::load()?)
//!         .build(),
//! );
//!
//! let orchestrator = Orchestrator::new(engine, store, WorkflowAdapter::new(registry));
//! orchestrator.register_workflow(WorkflowDefinition::new(
//!     "blog-post",
//!     "Blog post",
//!     vec![
//!         PhaseConfig::new("research", Capability::Research),
//!         PhaseConfig::new("draft", Capability::Content),
//!     ],
//! ))?;
//!
//! let receipt = orchestrator
//!     .create_execution("blog-post", serde_json::json!("why borrow checkers matter"))
//!     .await?;
//! let status = orchestrator.execution_status(&receipt.execution_id).await?;
//! println!("{:?}", status.status);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod provider;
pub mod store;
pub mod task;
pub mod workflow;

pub use error::{PoiesisError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing output for embedders that have no subscriber of their
/// own. Levels come from `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Common imports for embedders
pub mod prelude {
    pub use crate::api::{ExecutionReceipt, ExecutionStatus, Orchestrator};
    pub use crate::config::EngineConfig;
    pub use crate::error::{PoiesisError, Result};
    pub use crate::events::{EngineEvent, EventSink};
    pub use crate::provider::{
        Capability, FallbackChain, GenerationOutput, GenerationProvider, GenerationRequest,
        ModelProfile, ModelRouter, ProviderRegistry,
    };
    pub use crate::store::{InMemoryTaskStore, TaskStore};
    pub use crate::task::{Task, TaskStatus};
    pub use crate::workflow::{
        PhaseConfig, PhaseResult, PhaseStatus, RefineLoopConfig, WorkflowAdapter,
        WorkflowDefinition, WorkflowEngine,
    };
}
