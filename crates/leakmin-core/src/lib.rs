//! Reduction pipeline: oracle-bound token reduction, the structural reducer
//! bridge, adaptive timeouts, the timing log and the batch orchestrator.

pub mod config;
pub mod limits;
pub mod llm;
pub mod orchestrator;
pub mod property;
pub mod structural;
pub mod timeout;
pub mod timing;

pub use config::{ConfigError, ReductionConfig};
pub use limits::{retry_bounded, RetryExhausted, StopReason};
pub use llm::{check_expected_imports, LlmReducer, ReduceError, TokenReduction};
pub use orchestrator::{
    BatchError, BatchRunner, BatchSummary, Orchestrator, TaskError, TaskInput, TaskOutcome, Tier,
};
pub use property::{run_companion, PropertyError, PropertyRequest};
pub use structural::{PersesBridge, StructuralError, StructuralJob, StructuralReducer};
pub use timeout::{Baseline, BaselineProbe};
pub use timing::{PersistGuard, TaskContext, TimingEvent, TimingLog};
