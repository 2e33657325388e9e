//! autoplan - Plan execution engine
//!
//! Executes declarative analysis plans against tabular datasets: an ordered
//! list of column transformations followed by candidate model training and
//! scoring for one task kind.
//!
//! # Modules
//!
//! - [`plan`] - Plan schema, task selector and plan validation
//! - [`dataset`] - Schema descriptor, missing-value accounting, data loading
//! - [`preprocessing`] - Transformer registry and pipeline applier
//! - [`training`] - Model registry, train/test split, training executor and models
//! - [`engine`] - `PlanEngine` facade and execution reports
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod error;
pub mod config;

// Inputs
pub mod plan;
pub mod dataset;

// Execution
pub mod preprocessing;
pub mod training;
pub mod engine;

// Services
pub mod cli;

pub use error::{PlanError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ErrorKind, PlanError, Result};

    // Configuration
    pub use crate::config::{EngineConfig, ResidualMissing};

    // Plan
    pub use crate::plan::{AnalysisPlan, ModelSpec, Parameters, PlanWarning, TaskKind, TransformationStep};

    // Dataset
    pub use crate::dataset::{ColumnType, DataLoader, DatasetInput, MissingCount, RunConfig, SchemaDescriptor};

    // Preprocessing
    pub use crate::preprocessing::{PipelineApplier, StepReport, StepStatus, TransformerKind, TransformerRegistry};

    // Training
    pub use crate::training::{
        CandidateOutcome, CandidateScore, Model, ModelRegistry, Scorer, TrainTestSplit, TrainingData,
        TrainingExecutor,
    };

    // Engine
    pub use crate::engine::{ExecutionReport, PlanEngine};
}
