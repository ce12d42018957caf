// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod model;

// Declarative transform pipeline (registry + record/frame/summary steps)
pub mod transform;

// Artifacts on disk and the relational store
pub mod artifacts;
pub mod store;

// Remote interaction service
pub mod service;

// Stages
pub mod enhance;
pub mod fetch;
pub mod loader;
pub mod reconcile;

pub mod pipeline;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::artifacts::{ArtifactKey, ArtifactStore};
pub use crate::config::transforms::TransformsConfig;
pub use crate::config::SyncConfig;
pub use crate::enhance::{EnhancementReport, Enhancer, UnitError, WorkerPool};
pub use crate::error::{SyncError, TransformError};
pub use crate::model::{ContactId, DateRange, InteractionRecord, InteractionType, Row, Scalar};
pub use crate::pipeline::{Pipelines, RunSummary, SyncPipeline};
pub use crate::service::{FixtureService, HttpInteractionService, InteractionService};
pub use crate::store::{SqliteWarehouse, Table, Warehouse};
pub use crate::transform::{PipelineKind, StepRegistry, StepSpec, Transformer};
