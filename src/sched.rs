//  Copyright 2024 UFO Engine Developers.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! The dynamic scheduler. A run goes through fixed phases: expand the graph
//! across remotes and GPUs, map every task to a process-node, wire the
//! groups, set the tasks up, then drive one worker thread per task through
//! the pull/process/push protocol until every stream has terminated.

use std::{
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use log::{debug, info, warn};
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use crate::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
    graph::{Edge, NodeId, TaskGraph},
    group::{Group, SendPattern},
    json,
    messenger::MessageType,
    remote::{RemoteNode, RemoteTask},
    resources::Resources,
    task::{ProcNode, Task, TaskMode, TaskNode},
};

lazy_static::lazy_static! {
    static ref N_CPUS: usize = num_cpus::get();
}

/// Only the dynamic scheduler is implemented; `fixed` is a named extension
/// point sharing the same task contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Dynamic,
    Fixed,
}

impl FromStr for SchedulerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dynamic" => Ok(SchedulerKind::Dynamic),
            "fixed" => Ok(SchedulerKind::Fixed),
            other => Err(Error::graph(format!("unknown scheduler `{}`", other))),
        }
    }
}

/// How work is distributed when remote peers are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Split the stream across peers: a share of the buffers goes to each.
    Stream,
    /// Send the full graph to every peer; each runs it independently.
    Replicate,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Replicate GPU-capable sub-paths across the available devices.
    pub expand: bool,
    pub remote_mode: RemoteMode,
    pub trace: bool,
    pub timestamps: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            expand: true,
            remote_mode: RemoteMode::Stream,
            trace: false,
            timestamps: false,
        }
    }
}

type ProgressHook = Arc<dyn Fn(&str, u64) + Send + Sync>;

#[derive(Default, Clone)]
struct TaskTrace {
    label: String,
    n_process: u64,
    n_generate: u64,
    process_time: Duration,
    generate_time: Duration,
    started: Option<chrono::DateTime<chrono::Local>>,
    finished: Option<chrono::DateTime<chrono::Local>>,
}

struct SharedRun {
    stop: Arc<AtomicBool>,
    errors: Mutex<Vec<Error>>,
    progress: Option<ProgressHook>,
    traces: Mutex<Vec<TaskTrace>>,
    tracing: bool,
}

/// Rotating list of input groups feeding one port. After every pop the
/// cursor advances one slot; a group that reports end-of-stream drops out of
/// the rotation, and the port is exhausted once the rotation is empty.
struct RotatingInput {
    entries: Vec<(Arc<Group>, usize)>,
    cursor: usize,
}

impl RotatingInput {
    fn pop(&mut self) -> Result<Option<Buffer>> {
        while !self.entries.is_empty() {
            let index = self.cursor % self.entries.len();
            let (group, target) = &self.entries[index];
            match group.pop_input(*target)? {
                Some(buffer) => {
                    self.cursor = (index + 1) % self.entries.len();
                    return Ok(Some(buffer));
                }
                None => {
                    self.entries.remove(index);
                }
            }
        }
        Ok(None)
    }
}

struct WorkerCtx {
    label: String,
    inputs: Vec<RotatingInput>,
    output: Arc<Group>,
    leaf: bool,
    proc: ProcNode,
    processed: u64,
    trace: TaskTrace,
}

pub struct Scheduler {
    config: SchedulerConfig,
    resources: Arc<Resources>,
    remotes: Vec<Arc<RemoteNode>>,
    stop: Arc<AtomicBool>,
    progress: Option<ProgressHook>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, resources: Arc<Resources>) -> Self {
        Scheduler {
            config,
            resources,
            remotes: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn add_remote(&mut self, node: Arc<RemoteNode>) {
        self.remotes.push(node);
    }

    /// Connect to every `tcp://host:port` peer before running.
    pub fn connect_remotes(&mut self, addrs: &[String]) -> Result<()> {
        for addr in addrs {
            let node = RemoteNode::connect(addr)?;
            info!("connected to remote peer {}", addr);
            self.remotes.push(Arc::new(node));
        }
        Ok(())
    }

    /// Called once per buffer observed at a leaf task, with the leaf's label
    /// and its running count.
    pub fn set_progress_hook<F>(&mut self, hook: F)
    where
        F: Fn(&str, u64) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(hook));
    }

    /// Request cooperative cancellation. Every worker observes the flag on
    /// its next queue timeout and unwinds by propagating end-of-stream.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    /// Execute the graph until every stream terminates. Returns the first
    /// error a worker surfaced, after a best-effort teardown of the rest.
    pub fn run(&self, graph: &mut TaskGraph) -> Result<()> {
        self.stop.store(false, Ordering::Relaxed);
        let start = Instant::now();

        if graph.num_nodes() == 0 {
            return Err(Error::graph("cannot run an empty graph"));
        }

        self.expand_remote(graph)?;
        self.expand_gpu(graph)?;
        self.map(graph);
        let (groups, mut contexts) = self.wire(graph)?;
        self.setup(graph)?;

        let shared = SharedRun {
            stop: Arc::clone(&self.stop),
            errors: Mutex::new(Vec::new()),
            progress: self.progress.clone(),
            traces: Mutex::new(Vec::new()),
            tracing: self.config.trace,
        };

        crossbeam_utils::thread::scope(|scope| {
            for node in graph.nodes_mut().iter_mut() {
                let ctx = contexts
                    .pop_front()
                    .expect("one worker context per node");
                let shared = &shared;
                scope.spawn(move |_| worker_main(node, ctx, shared));
            }
        })
        .map_err(|_| Error::fatal("a worker thread panicked"))?;

        drop(groups);

        if matches!(self.config.remote_mode, RemoteMode::Stream) {
            for remote in &self.remotes {
                if let Err(err) = remote.cleanup() {
                    warn!("cleanup of peer {} failed: {}", remote.addr(), err);
                }
            }
        }

        let elapsed = start.elapsed();
        info!("pipeline finished in {:.3}s", elapsed.as_secs_f64());
        if self.config.trace {
            self.report_traces(&shared);
        }

        let mut errors = shared.errors.lock().unwrap();
        let result = match errors.drain(..).next() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        result
    }

    fn report_traces(&self, shared: &SharedRun) {
        let traces = shared.traces.lock().unwrap();
        for trace in traces.iter() {
            let mut line = format!(
                "trace: {} process={} ({:.3}s) generate={} ({:.3}s)",
                trace.label,
                trace.n_process,
                trace.process_time.as_secs_f64(),
                trace.n_generate,
                trace.generate_time.as_secs_f64(),
            );
            if self.config.timestamps {
                if let (Some(started), Some(finished)) = (trace.started, trace.finished) {
                    line.push_str(&format!(
                        " start={} end={}",
                        started.format("%H:%M:%S%.3f"),
                        finished.format("%H:%M:%S%.3f"),
                    ));
                }
            }
            info!("{}", line);
        }
    }

    /// Insert one proxy task per peer, parallel to the processing chain, so
    /// the stream scatters across the local path and the remotes. Replicate
    /// mode ships the whole graph instead and lets every peer run it.
    fn expand_remote(&self, graph: &mut TaskGraph) -> Result<()> {
        if self.remotes.is_empty() {
            return Ok(());
        }

        match self.config.remote_mode {
            RemoteMode::Replicate => {
                let description = json::write_graph(graph)?;
                for remote in &self.remotes {
                    remote.send_graph(MessageType::ReplicateJson, &description)?;
                }
                Ok(())
            }
            RemoteMode::Stream => {
                let path = match graph.flatten() {
                    Some(path) if path.len() >= 3 => path,
                    _ => {
                        warn!("remote streaming requires a linear pipeline; running locally");
                        return Ok(());
                    }
                };

                let inner = &path[1..path.len() - 1];
                let description = json::write_subgraph(graph, inner)?;
                let producer = path[0];
                let consumer = *path.last().unwrap();
                let consumer_port = graph.in_edges(consumer)[0].port;

                for remote in &self.remotes {
                    let task = RemoteTask::new(MessageType::StreamJson, description.clone());
                    let mut node = TaskNode::new("remote", Box::new(task));
                    node.set_proc_node(ProcNode::Remote { node: Arc::clone(remote) });
                    let id = graph.add_node(node);
                    graph.splice_edge(Edge { src: producer, dst: id, port: 0 });
                    graph.splice_edge(Edge { src: id, dst: consumer, port: consumer_port });
                }

                graph.node_mut(producer).pattern_override = Some(SendPattern::Scatter);
                Ok(())
            }
        }
    }

    /// Replicate maximal GPU-capable chains across the available devices and
    /// bind each replica to its own device.
    fn expand_gpu(&self, graph: &mut TaskGraph) -> Result<()> {
        let n_gpus = self.resources.num_devices();
        if !self.config.expand || n_gpus < 2 {
            return Ok(());
        }

        for chain in gpu_chains(graph) {
            debug!("expanding GPU chain of {} task(s) across {} devices", chain.len(), n_gpus);
            let replicas = graph.expand(&chain, n_gpus)?;
            for (index, replica) in replicas.iter().enumerate() {
                let device = Arc::clone(self.resources.device(index).unwrap());
                for &id in replica {
                    graph.node_mut(id).set_proc_node(ProcNode::Gpu {
                        device: Arc::clone(&device),
                    });
                }
            }
        }
        Ok(())
    }

    /// Bind every still-unassigned task: GPU-capable tasks round-robin over
    /// the devices of this peer, everything else round-robins over CPU slots.
    fn map(&self, graph: &mut TaskGraph) {
        let n_gpus = self.resources.num_devices();
        let mut next_gpu = 0;
        let mut next_cpu = 0;

        for id in graph.node_ids().collect::<Vec<_>>() {
            let node = graph.node_mut(id);
            if !matches!(node.proc_node(), ProcNode::Unassigned) {
                continue;
            }
            let mode = node.task().mode();
            if mode.contains(TaskMode::GPU) && n_gpus > 0 {
                let device = Arc::clone(self.resources.device(next_gpu % n_gpus).unwrap());
                next_gpu += 1;
                node.set_proc_node(ProcNode::Gpu { device });
            } else {
                let cpu = next_cpu % *N_CPUS;
                next_cpu += 1;
                node.set_proc_node(ProcNode::Cpu { mask: vec![cpu] });
            }
        }
    }

    /// Create one output group per task, register every successor's input
    /// port, and pick the send pattern: scatter across replicas of one
    /// expansion, broadcast to structurally different successors.
    fn wire(
        &self,
        graph: &TaskGraph,
    ) -> Result<(Vec<Arc<Group>>, std::collections::VecDeque<WorkerCtx>)> {
        let mut groups = Vec::with_capacity(graph.num_nodes());

        for id in graph.node_ids() {
            let outs = graph.out_edges(id);
            let pattern = self.pick_pattern(graph, id, &outs);
            groups.push(Arc::new(Group::new(outs.len(), pattern, Arc::clone(&self.stop))));
        }

        let mut contexts = std::collections::VecDeque::with_capacity(graph.num_nodes());
        for id in graph.node_ids() {
            let node = graph.node(id);
            let n_inputs = node.task().num_inputs();
            let mut inputs = Vec::with_capacity(n_inputs);

            for port in 0..n_inputs as u32 {
                let mut entries = Vec::new();
                for src in graph.node_ids() {
                    for (slot, edge) in graph.out_edges(src).iter().enumerate() {
                        if edge.dst == id && edge.port == port {
                            entries.push((Arc::clone(&groups[src]), slot));
                        }
                    }
                }
                if entries.is_empty() {
                    return Err(Error::graph(format!(
                        "input port {} of `{}` is not connected",
                        port,
                        node.label()
                    )));
                }
                inputs.push(RotatingInput { entries, cursor: 0 });
            }

            contexts.push_back(WorkerCtx {
                label: node.label().to_string(),
                inputs,
                output: Arc::clone(&groups[id]),
                leaf: graph.out_edges(id).is_empty(),
                proc: node.proc_node().clone(),
                processed: 0,
                trace: TaskTrace { label: node.label().to_string(), ..Default::default() },
            });
        }

        Ok((groups, contexts))
    }

    fn pick_pattern(&self, graph: &TaskGraph, id: NodeId, outs: &[Edge]) -> SendPattern {
        if let Some(pattern) = graph.node(id).pattern_override {
            return pattern;
        }
        if outs.len() < 2 {
            return SendPattern::Scatter;
        }
        let tags: Vec<Option<usize>> =
            outs.iter().map(|e| graph.node(e.dst).replica_tag).collect();
        if tags[0].is_some() && tags.iter().all(|t| *t == tags[0]) {
            SendPattern::Scatter
        } else {
            SendPattern::Broadcast
        }
    }

    /// Set every task up on its process-node, in topological order. The
    /// first failure aborts the run; tasks already set up are torn down when
    /// the graph is dropped.
    fn setup(&self, graph: &mut TaskGraph) -> Result<()> {
        let order = graph.topological_order()?;
        for id in order {
            let node = graph.node_mut(id);
            let proc = node.proc_node().clone();
            let label = node.label().to_string();
            node.task_mut()
                .setup(&self.resources, &proc)
                .map_err(|err| match err {
                    Error::Setup { .. } => err,
                    other => Error::setup(label, other.to_string()),
                })?;
        }
        Ok(())
    }
}

/// Maximal chains of GPU-flagged tasks with linear connectivity, excluding
/// roots and leaves (replicating those would duplicate the stream itself).
fn gpu_chains(graph: &TaskGraph) -> Vec<Vec<NodeId>> {
    let order = match graph.topological_order() {
        Ok(order) => order,
        Err(_) => return Vec::new(),
    };
    let expandable = |id: NodeId| {
        graph.node(id).task().mode().contains(TaskMode::GPU)
            && !graph.in_edges(id).is_empty()
            && !graph.out_edges(id).is_empty()
    };

    let mut used = vec![false; graph.num_nodes()];
    let mut chains = Vec::new();

    for id in order {
        if used[id] || !expandable(id) {
            continue;
        }
        let mut chain = vec![id];
        used[id] = true;

        let mut current = id;
        loop {
            let outs = graph.out_edges(current);
            if outs.len() != 1 {
                break;
            }
            let next = outs[0].dst;
            if used[next] || !expandable(next) || graph.in_edges(next).len() != 1 {
                break;
            }
            chain.push(next);
            used[next] = true;
            current = next;
        }
        chains.push(chain);
    }

    chains
}

fn apply_affinity(proc: &ProcNode) {
    if let ProcNode::Cpu { mask } = proc {
        let mut set = CpuSet::new();
        for &cpu in mask {
            let _ = set.set(cpu % CpuSet::count());
        }
        // Pinning is best-effort; some platforms refuse it.
        if let Err(err) = sched_setaffinity(Pid::from_raw(0), &set) {
            debug!("could not pin worker: {}", err);
        }
    }
}

fn worker_main(node: &mut TaskNode, mut ctx: WorkerCtx, shared: &SharedRun) {
    apply_affinity(&ctx.proc);
    if shared.tracing {
        ctx.trace.started = Some(chrono::Local::now());
    }

    let result = drive(node.task_mut(), &mut ctx, shared);
    match result {
        Ok(()) | Err(Error::Canceled) => {}
        Err(err) => {
            log::error!("task `{}` failed: {}", ctx.label, err);
            shared.errors.lock().unwrap().push(err);
            shared.stop.store(true, Ordering::Relaxed);
        }
    }

    // Idempotent; makes sure downstream consumers unblock even on errors.
    ctx.output.finish();

    if shared.tracing {
        ctx.trace.finished = Some(chrono::Local::now());
        shared.traces.lock().unwrap().push(ctx.trace.clone());
    }
}

fn drive(task: &mut dyn Task, ctx: &mut WorkerCtx, shared: &SharedRun) -> Result<()> {
    let mode = task.mode();
    if mode.contains(TaskMode::GENERATOR) || task.num_inputs() == 0 {
        drive_generator(task, ctx, shared)
    } else if mode.contains(TaskMode::REDUCTOR) {
        drive_reductor(task, ctx, shared)
    } else {
        drive_processor(task, ctx, shared)
    }
}

fn note_progress(ctx: &mut WorkerCtx, shared: &SharedRun) {
    ctx.processed += 1;
    if ctx.leaf {
        if let Some(hook) = &shared.progress {
            hook(&ctx.label, ctx.processed);
        }
    }
}

/// Pull one buffer per port; `None` means some port hit end-of-stream, with
/// partially pulled buffers already returned to their pools.
fn pull_inputs(ctx: &mut WorkerCtx) -> Result<Option<Vec<Buffer>>> {
    let mut inputs = Vec::with_capacity(ctx.inputs.len());
    for rotation in ctx.inputs.iter_mut() {
        match rotation.pop()? {
            Some(buffer) => inputs.push(buffer),
            None => {
                for buffer in inputs.drain(..) {
                    buffer.release();
                }
                return Ok(None);
            }
        }
    }
    Ok(Some(inputs))
}

fn drive_processor(task: &mut dyn Task, ctx: &mut WorkerCtx, shared: &SharedRun) -> Result<()> {
    let share = task.mode().contains(TaskMode::SHARE_DATA);
    let single_input = task.num_inputs() == 1;

    loop {
        let mut inputs = match pull_inputs(ctx)? {
            Some(inputs) => inputs,
            None => {
                ctx.output.finish();
                return Ok(());
            }
        };

        let req = {
            let mut refs: Vec<&mut Buffer> = inputs.iter_mut().collect();
            task.get_requisition(&mut refs)?
        };

        let clock = shared.tracing.then(Instant::now);
        let proceed = if share && single_input && inputs[0].get_requisition() == req {
            // Zero-copy passthrough: the input buffer itself travels on and
            // finds its way back to its own pool when the last consumer
            // releases it.
            let mut buffer = inputs.pop().unwrap();
            let proceed = task.process_shared(&mut buffer, &req)?;
            ctx.output.push_output(buffer)?;
            proceed
        } else {
            let mut output = ctx.output.pop_output(&req)?;
            let proceed = {
                let mut refs: Vec<&mut Buffer> = inputs.iter_mut().collect();
                task.process(&mut refs, &mut output, &req)?
            };
            ctx.output.push_output(output)?;
            for buffer in inputs.drain(..) {
                buffer.release();
            }
            proceed
        };
        if let Some(clock) = clock {
            ctx.trace.process_time += clock.elapsed();
            ctx.trace.n_process += 1;
        }

        note_progress(ctx, shared);

        if !proceed {
            ctx.output.finish();
            return Ok(());
        }
    }
}

/// Reductors accumulate without emitting: process gets a scratch output
/// buffer that is recycled, and the generate phase produces the real
/// outputs. It starts when process returns `false` or the inputs end.
fn drive_reductor(task: &mut dyn Task, ctx: &mut WorkerCtx, shared: &SharedRun) -> Result<()> {
    let mut scratch: Option<Buffer> = None;
    let mut last_req: Option<Requisition> = None;

    loop {
        let mut inputs = match pull_inputs(ctx)? {
            Some(inputs) => inputs,
            None => break,
        };

        let req = {
            let mut refs: Vec<&mut Buffer> = inputs.iter_mut().collect();
            task.get_requisition(&mut refs)?
        };
        last_req = Some(req);

        let mut output = match scratch.take() {
            Some(mut buffer) => {
                buffer.resize(&req);
                buffer
            }
            None => ctx.output.pop_output(&req)?,
        };

        let clock = shared.tracing.then(Instant::now);
        let proceed = {
            let mut refs: Vec<&mut Buffer> = inputs.iter_mut().collect();
            task.process(&mut refs, &mut output, &req)?
        };
        if let Some(clock) = clock {
            ctx.trace.process_time += clock.elapsed();
            ctx.trace.n_process += 1;
        }

        scratch = Some(output);
        for buffer in inputs.drain(..) {
            buffer.release();
        }

        if !proceed {
            break;
        }
    }

    if let Some(buffer) = scratch.take() {
        buffer.release();
    }
    if let Some(req) = last_req {
        generate_all(task, ctx, shared, &req)?;
    }
    ctx.output.finish();
    Ok(())
}

fn drive_generator(task: &mut dyn Task, ctx: &mut WorkerCtx, shared: &SharedRun) -> Result<()> {
    loop {
        let req = task.get_requisition(&mut [])?;
        let mut output = ctx.output.pop_output(&req)?;

        let clock = shared.tracing.then(Instant::now);
        let more = task.generate(&mut output, &req)?;
        if let Some(clock) = clock {
            ctx.trace.generate_time += clock.elapsed();
            ctx.trace.n_generate += 1;
        }

        if !more {
            output.release();
            ctx.output.finish();
            return Ok(());
        }
        ctx.output.push_output(output)?;
        note_progress(ctx, shared);
    }
}

fn generate_all(
    task: &mut dyn Task,
    ctx: &mut WorkerCtx,
    shared: &SharedRun,
    req: &Requisition,
) -> Result<()> {
    loop {
        let mut output = ctx.output.pop_output(req)?;

        let clock = shared.tracing.then(Instant::now);
        let more = task.generate(&mut output, req)?;
        if let Some(clock) = clock {
            ctx.trace.generate_time += clock.elapsed();
            ctx.trace.n_generate += 1;
        }

        if !more {
            output.release();
            return Ok(());
        }
        ctx.output.push_output(output)?;
        note_progress(ctx, shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_kind_parsing() {
        assert_eq!("dynamic".parse::<SchedulerKind>().unwrap(), SchedulerKind::Dynamic);
        assert_eq!("fixed".parse::<SchedulerKind>().unwrap(), SchedulerKind::Fixed);
        assert!("group".parse::<SchedulerKind>().is_err());
    }
}
