use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::types::{AlertPolicy, PolicyResult, ProjectId, ResourceRef, ScanConfig, TimeWindow};
use crate::backend::Backend;
use crate::utils::config::REQUIRED_PERMISSIONS;

use super::context::{
    CancelToken, PipelineContext, PipelineTuning, create_pipeline_channels,
};
use super::evaluate::evaluate_policy;
use super::permissions::admit_project;
use super::policies::enumerate_policies;
use super::resolve::resolve_projects;
use super::workers::{join_stage, spawn_stage_workers};

/// Stream of policy results. Yields until every stage has drained.
///
/// Call [`EstimateStream::finish`] afterwards to wait for the pipeline threads and surface
/// worker panics. Dropping the stream early disconnects the result queue, which winds the
/// pipeline down from the last stage back to the sources.
pub struct EstimateStream {
    results: Receiver<PolicyResult>,
    coordinator: JoinHandle<Result<()>>,
}

impl Iterator for EstimateStream {
    type Item = PolicyResult;

    fn next(&mut self) -> Option<PolicyResult> {
        self.results.recv().ok()
    }
}

impl EstimateStream {
    /// Wait for all pipeline threads. Results not yet read are discarded.
    pub fn finish(self) -> Result<()> {
        let EstimateStream {
            results,
            coordinator,
        } = self;
        drop(results);
        coordinator
            .join()
            .map_err(|_| anyhow!("pipeline coordinator panicked"))?
    }
}

/// Start the pipeline:
/// sources → projects → permission gate → admitted → policy listing → policies → evaluation → results.
///
/// Each queue closes when the last thread holding its sender exits, so a stage finishes only after
/// its input closed and drained. A coordinator thread joins the stages in that order.
pub fn run_pipeline(
    backend: Backend,
    config: &ScanConfig,
    window: TimeWindow,
    cancel: CancelToken,
) -> Result<EstimateStream> {
    let tuning = PipelineTuning::for_config(config);
    debug!(
        "Pipeline: {} workers per stage, queue capacity {}",
        tuning.num_threads, tuning.channel_cap
    );
    let ctx = PipelineContext {
        backend,
        config: Arc::new(config.clone()),
        window,
        cancel,
    };
    let channels = create_pipeline_channels(tuning.channel_cap);

    let source_handles = spawn_sources(&ctx, &channels.project_tx, &channels.policy_tx)?;
    drop(channels.project_tx);

    let gate_handles = spawn_stage_workers(
        "permissions",
        tuning.num_threads,
        channels.project_rx,
        &channels.admitted_tx,
        &ctx.cancel,
        {
            let ctx = ctx.clone();
            move |project: ProjectId, admitted: &Sender<ProjectId>| {
                if !admit_project(
                    ctx.backend.resources.as_ref(),
                    &project,
                    &REQUIRED_PERMISSIONS,
                    ctx.config.test_permissions,
                ) {
                    return true;
                }
                admitted.send(project).is_ok()
            }
        },
    )?;
    drop(channels.admitted_tx);

    let listing_handles = spawn_stage_workers(
        "policies",
        tuning.num_threads,
        channels.admitted_rx,
        &channels.policy_tx,
        &ctx.cancel,
        {
            let ctx = ctx.clone();
            move |project: ProjectId, policies: &Sender<AlertPolicy>| {
                let listed = enumerate_policies(
                    ctx.backend.policies.as_ref(),
                    &project,
                    ctx.config.include_disabled,
                );
                for policy in listed {
                    if ctx.cancel.is_cancelled() {
                        break;
                    }
                    if policies.send(policy).is_err() {
                        return false;
                    }
                }
                true
            }
        },
    )?;
    drop(channels.policy_tx);

    let eval_handles = spawn_stage_workers(
        "evaluate",
        tuning.num_threads,
        channels.policy_rx,
        &channels.result_tx,
        &ctx.cancel,
        {
            let ctx = ctx.clone();
            move |policy: AlertPolicy, results: &Sender<PolicyResult>| {
                let result = evaluate_policy(ctx.backend.queries.as_ref(), &policy, &ctx.window);
                debug!(
                    "Evaluated {}: {} series, ${:.4}",
                    result.name, result.time_series, result.price
                );
                results.send(result).is_ok()
            }
        },
    )?;
    // Dropping the last sender here leaves the result queue owned by the evaluation workers.
    drop(channels.result_tx);

    let coordinator = thread::Builder::new()
        .name("pipeline-coordinator".into())
        .spawn(move || {
            let panicked = join_stage("source", source_handles)
                + join_stage("permissions", gate_handles)
                + join_stage("policies", listing_handles)
                + join_stage("evaluate", eval_handles);
            if panicked > 0 {
                bail!("{} pipeline thread(s) panicked", panicked);
            }
            Ok(())
        })
        .context("spawn pipeline coordinator")?;

    Ok(EstimateStream {
        results: channels.result_rx,
        coordinator,
    })
}

fn spawn_source<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{name}-source"))
        .spawn(f)
        .with_context(|| format!("spawn {name} source"))
}

/// One producer per kind of scan root. Explicit projects and hierarchy roots feed the project
/// queue; explicit policies skip straight to the policy queue.
fn spawn_sources(
    ctx: &PipelineContext,
    project_tx: &Sender<ProjectId>,
    policy_tx: &Sender<AlertPolicy>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    if !ctx.config.projects.is_empty() {
        let (ctx, tx) = (ctx.clone(), project_tx.clone());
        handles.push(spawn_source("projects", move || feed_projects(&ctx, &tx))?);
    }

    let roots: Vec<ResourceRef> = ctx
        .config
        .scan_targets()
        .iter()
        .filter_map(|t| t.resource())
        .collect();
    if !roots.is_empty() {
        let (ctx, tx) = (ctx.clone(), project_tx.clone());
        handles.push(spawn_source("hierarchy", move || {
            walk_hierarchy(&ctx, roots, &tx)
        })?);
    }

    if !ctx.config.policies.is_empty() {
        let (ctx, tx) = (ctx.clone(), policy_tx.clone());
        handles.push(spawn_source("policies", move || fetch_policies(&ctx, &tx))?);
    }

    Ok(handles)
}

fn feed_projects(ctx: &PipelineContext, tx: &Sender<ProjectId>) {
    for project in &ctx.config.projects {
        if ctx.cancel.is_cancelled() || tx.send(project.clone()).is_err() {
            return;
        }
    }
}

fn walk_hierarchy(ctx: &PipelineContext, roots: Vec<ResourceRef>, tx: &Sender<ProjectId>) {
    for root in roots {
        debug!("Listing projects under {}", root);
        let projects = resolve_projects(
            ctx.backend.resources.as_ref(),
            root,
            ctx.config.recursive,
            &ctx.config.excluded_folders,
        );
        for project in projects {
            if ctx.cancel.is_cancelled() || tx.send(project).is_err() {
                return;
            }
        }
    }
}

fn fetch_policies(ctx: &PipelineContext, tx: &Sender<AlertPolicy>) {
    for name in &ctx.config.policies {
        if ctx.cancel.is_cancelled() {
            return;
        }
        match ctx.backend.policies.get_alert_policy(name) {
            Ok(policy) => {
                if tx.send(policy).is_err() {
                    return;
                }
            }
            Err(e) => warn!("Failed to get alert policy {}: {:#}", name, e),
        }
    }
}
