//! Attune Engine - behavioral telemetry aggregation and rule-based
//! intervention.
//!
//! The engine reads per-user interaction telemetry (clicks, keypresses,
//! answer submissions, tab/cursor activity) from an event store, aggregates
//! each active user's recent activity into a rolling feature window, and
//! evaluates a declarative rule catalog against the derived features to
//! decide whether an intervention should be surfaced to that user. Matched
//! actions are recorded back into the event stream for the delivery side.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                         Attune Engine                          │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌─────────┐  │
//! │  │  Scanner  │──▶│  Features  │──▶│ Evaluator │──▶│ Emitter │  │
//! │  │ (active   │   │ (rolling   │   │ (rule     │   │ (action │  │
//! │  │  users)   │   │  window)   │   │  catalog) │   │  events)│  │
//! │  └───────────┘   └────────────┘   └───────────┘   └─────────┘  │
//! │        ▲                │                                │     │
//! │        │                ▼                                ▼     │
//! │  ┌───────────────────────────────────────────────────────────┐ │
//! │  │                       Event store                         │ │
//! │  └───────────────────────────────────────────────────────────┘ │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One cycle runs per scheduler tick; users are processed independently and
//! a failure for one never aborts the others.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use attune_engine::pipeline::{CycleDriver, PipelineSettings};
//! use attune_engine::rules::RuleCatalog;
//! use attune_engine::store::MemoryStore;
//!
//! # async fn demo() {
//! let store = Arc::new(MemoryStore::new());
//! let catalog = Arc::new(RuleCatalog::from_json(r#"[
//!     {"id": "struggling", "priority": 30,
//!      "condition": {"consecutive_wrong": 2},
//!      "action": {"kind": "offer_hint"}}
//! ]"#).unwrap());
//!
//! let driver = CycleDriver::new(store, catalog, PipelineSettings::default());
//! driver.run_cycle(chrono::Utc::now()).await;
//! # }
//! ```

pub mod config;
pub mod core;
pub mod event;
pub mod pipeline;
pub mod rules;
pub mod store;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{extract, EvaluationContext, SwitchRateTracker, WindowFeatures};
pub use event::{ActionSuggestion, EventKind, FeatureWindow, RawEvent};
pub use pipeline::{CycleDriver, PipelineSettings, PipelineStats};
pub use rules::{evaluate, CatalogError, Condition, Rule, RuleCatalog};
pub use store::{EventStore, MemoryStore, StoreError};

// Server re-exports (when enabled)
#[cfg(feature = "server")]
pub use server::{ServerConfig, SessionRegistry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
