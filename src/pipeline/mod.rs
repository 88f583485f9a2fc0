//! Pipeline components: resolution, permission gate, policy listing, evaluation, orchestration.

pub mod context;
pub mod evaluate;
pub mod orchestrator;
pub mod permissions;
pub mod policies;
pub mod resolve;
pub mod workers;

pub use context::{
    CancelToken, PipelineChannels, PipelineContext, PipelineTuning, create_pipeline_channels,
    effective_threads,
};
pub use evaluate::{evaluate_policy, time_series_request};
pub use orchestrator::{EstimateStream, run_pipeline};
pub use permissions::admit_project;
pub use policies::enumerate_policies;
pub use resolve::{ProjectWalk, resolve_projects};
pub use workers::{join_stage, spawn_stage_workers};
