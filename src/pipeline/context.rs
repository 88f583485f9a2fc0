//! Pipeline context and tuning: shared read-only data handed to every worker, queue sizing,
//! and the channels connecting the stages.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::backend::Backend;
use crate::types::{AlertPolicy, PolicyResult, ProjectId, ScanConfig, TimeWindow};

/// Worker count per stage and capacity of the queues between stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipelineTuning {
    pub num_threads: usize,
    pub channel_cap: usize,
}

impl PipelineTuning {
    pub fn for_config(config: &ScanConfig) -> Self {
        Self {
            num_threads: effective_threads(
                config.threads,
                config.projects.len(),
                config.policies.len(),
            ),
            channel_cap: config.threads.max(1),
        }
    }
}

/// Workers per stage: the configured count, raised to the number of explicitly named projects
/// or policies so none of them waits behind the others.
pub fn effective_threads(threads: usize, explicit_projects: usize, explicit_policies: usize) -> usize {
    threads.max(explicit_projects).max(explicit_policies).max(1)
}

/// Shared cancellation flag. Sources stop producing and workers stop dequeuing once set.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only state every stage needs. Cloned into each thread.
#[derive(Clone)]
pub struct PipelineContext {
    pub backend: Backend,
    pub config: Arc<ScanConfig>,
    pub window: TimeWindow,
    pub cancel: CancelToken,
}

/// Queues between the stages:
/// sources → projects → permission gate → admitted → policy listing → policies → evaluation → results.
pub struct PipelineChannels {
    pub project_tx: Sender<ProjectId>,
    pub project_rx: Receiver<ProjectId>,
    pub admitted_tx: Sender<ProjectId>,
    pub admitted_rx: Receiver<ProjectId>,
    pub policy_tx: Sender<AlertPolicy>,
    pub policy_rx: Receiver<AlertPolicy>,
    pub result_tx: Sender<PolicyResult>,
    pub result_rx: Receiver<PolicyResult>,
}

pub fn create_pipeline_channels(channel_cap: usize) -> PipelineChannels {
    let (project_tx, project_rx) = bounded::<ProjectId>(channel_cap);
    let (admitted_tx, admitted_rx) = bounded::<ProjectId>(channel_cap);
    let (policy_tx, policy_rx) = bounded::<AlertPolicy>(channel_cap);
    let (result_tx, result_rx) = bounded::<PolicyResult>(channel_cap);
    PipelineChannels {
        project_tx,
        project_rx,
        admitted_tx,
        admitted_rx,
        policy_tx,
        policy_rx,
        result_tx,
        result_rx,
    }
}
