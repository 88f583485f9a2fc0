//! Fixed-size worker pools shared by every pipeline stage.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::context::CancelToken;

/// Single stage worker: take items from `input` and hand them to `work` until the input closes,
/// the run is cancelled, or `work` reports that downstream is gone. Dropping `output` on exit is
/// what lets the next stage's queue close once every worker of this stage is done.
fn stage_worker_loop<I, O, F>(input: Receiver<I>, output: Sender<O>, cancel: CancelToken, work: Arc<F>)
where
    F: Fn(I, &Sender<O>) -> bool,
{
    while !cancel.is_cancelled() {
        let Ok(item) = input.recv() else { break };
        if !work(item, &output) {
            break;
        }
    }
    drop(output);
}

/// Spawn `num_threads` workers for one stage. The caller must drop its own `output` sender after
/// this so the queue closes when the last worker exits.
///
/// `work` returns `false` once a send fails (every receiver downstream is gone).
pub fn spawn_stage_workers<I, O, F>(
    stage: &'static str,
    num_threads: usize,
    input: Receiver<I>,
    output: &Sender<O>,
    cancel: &CancelToken,
    work: F,
) -> Result<Vec<JoinHandle<()>>>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I, &Sender<O>) -> bool + Send + Sync + 'static,
{
    let work = Arc::new(work);
    let handles = (0..num_threads)
        .map(|i| {
            let input = input.clone();
            let output = output.clone();
            let cancel = cancel.clone();
            let work = Arc::clone(&work);
            thread::Builder::new()
                .name(format!("{stage}-{i}"))
                .spawn(move || stage_worker_loop(input, output, cancel, work))
                .with_context(|| format!("spawn {stage} worker"))
        })
        .collect::<Result<Vec<_>>>()?;
    debug!("Spawned {} {} workers", handles.len(), stage);
    Ok(handles)
}

/// Join every handle of a stage. Returns the number of workers that panicked.
pub fn join_stage(stage: &str, handles: Vec<JoinHandle<()>>) -> usize {
    let panicked = handles
        .into_iter()
        .map(JoinHandle::join)
        .filter(|r| r.is_err())
        .count();
    if panicked > 0 {
        error!("{} {} worker(s) panicked", panicked, stage);
    } else {
        debug!("{} stage drained", stage);
    }
    panicked
}
