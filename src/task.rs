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

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
};
use crate::{
    buffer::{Buffer, Requisition, Value},
    error::{Error, Result},
    group::SendPattern,
    remote::RemoteNode,
    resources::{ComputeDevice, Resources},
};

bitflags::bitflags! {
    /// Orthogonal dimensions of a task's behavior. PROCESSOR/REDUCTOR/
    /// GENERATOR select the drive loop, CPU/GPU is a locality hint, SINK
    /// marks consume-only tasks, SHARE_DATA allows zero-copy passthrough.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskMode: u32 {
        const PROCESSOR  = 1 << 0;
        const REDUCTOR   = 1 << 1;
        const GENERATOR  = 1 << 2;
        const SINK       = 1 << 3;
        const CPU        = 1 << 4;
        const GPU        = 1 << 5;
        const SHARE_DATA = 1 << 6;
    }
}

/// The compute resource a task is bound to. Assigned by the scheduler's map
/// phase; `Unassigned` only exists before mapping.
#[derive(Clone)]
pub enum ProcNode {
    Unassigned,
    /// A CPU slot; workers pin themselves to the mask where possible.
    Cpu { mask: Vec<usize> },
    /// A GPU slot owning one device and its command queue.
    Gpu { device: Arc<dyn ComputeDevice> },
    /// A peer engine reachable through the messenger.
    Remote { node: Arc<RemoteNode> },
}

impl fmt::Debug for ProcNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcNode::Unassigned => write!(f, "Unassigned"),
            ProcNode::Cpu { mask } => write!(f, "Cpu({:?})", mask),
            ProcNode::Gpu { device } => write!(f, "Gpu({})", device.name()),
            ProcNode::Remote { node } => write!(f, "Remote({})", node.addr()),
        }
    }
}

/// The contract every computational node implements.
///
/// The scheduler drives a task through `setup` once, then repeatedly through
/// `get_requisition`/`process` (and `generate` for reductors and generators)
/// until the stream ends. All calls on one task happen sequentially on one
/// worker thread.
pub trait Task: Send {
    fn num_inputs(&self) -> usize;

    /// Expected shape rank on input port `input`.
    fn num_dimensions(&self, input: usize) -> usize;

    fn mode(&self) -> TaskMode;

    /// Called once on the worker's process-node before any data flows. May
    /// compile kernels or allocate scratch space.
    fn setup(&mut self, _resources: &Arc<Resources>, _proc: &ProcNode) -> Result<()> {
        Ok(())
    }

    /// The shape of the next output, possibly derived from the inputs. A
    /// generator synthesizes it without inputs.
    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition>;

    /// Consume one tuple of inputs, produce one output. Returning `false`
    /// stops the process phase; for a reductor that starts the generate
    /// phase.
    fn process(
        &mut self,
        _inputs: &mut [&mut Buffer],
        _output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        Err(Error::fatal("task does not implement process"))
    }

    /// Mutate a single buffer in place; only called for SHARE_DATA tasks
    /// when the output shape equals the input shape. The buffer itself
    /// travels downstream afterwards.
    fn process_shared(&mut self, _buffer: &mut Buffer, _req: &Requisition) -> Result<bool> {
        Err(Error::fatal("task does not implement process_shared"))
    }

    /// Produce one output with no fresh inputs; `false` ends the stream.
    fn generate(&mut self, _output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        Err(Error::fatal("task does not implement generate"))
    }

    /// Apply one named parameter. Unknown names are graph errors so typos in
    /// pipeline descriptions fail early.
    fn set_parameter(&mut self, name: &str, _value: &Value) -> Result<()> {
        Err(Error::graph(format!("unknown parameter `{}`", name)))
    }

    /// A fresh instance with the same configuration but no runtime state.
    /// Used when subgraphs are replicated across devices or peers.
    fn copy_task(&self) -> Box<dyn Task>;
}

/// A task embedded in a graph: the trait object plus everything the
/// scheduler tracks per node. Wiring state (groups) is intentionally not
/// here; the scheduler owns it in an arena keyed by node id.
pub struct TaskNode {
    label: String,
    task: Box<dyn Task>,
    params: BTreeMap<String, Value>,
    pub(crate) proc: ProcNode,
    /// Forces the output send pattern, overriding structural detection.
    pub(crate) pattern_override: Option<SendPattern>,
    /// Nodes minted by the same expansion share a tag; the producer feeding
    /// them scatters instead of broadcasting.
    pub(crate) replica_tag: Option<usize>,
}

impl TaskNode {
    pub fn new<S: Into<String>>(label: S, task: Box<dyn Task>) -> Self {
        TaskNode {
            label: label.into(),
            task,
            params: BTreeMap::new(),
            proc: ProcNode::Unassigned,
            pattern_override: None,
            replica_tag: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn task(&self) -> &dyn Task {
        self.task.as_ref()
    }

    pub fn task_mut(&mut self) -> &mut dyn Task {
        self.task.as_mut()
    }

    pub fn proc_node(&self) -> &ProcNode {
        &self.proc
    }

    pub fn set_proc_node(&mut self, proc: ProcNode) {
        self.proc = proc;
    }

    /// Apply and record a parameter. The record is what the JSON writer
    /// serializes when a subgraph travels to a peer.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> Result<()> {
        self.task.set_parameter(name, &value)?;
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Clone the node for graph replication: same label, same configuration,
    /// fresh task state, no process-node binding.
    pub fn copy_node(&self) -> TaskNode {
        TaskNode {
            label: self.label.clone(),
            task: self.task.copy_task(),
            params: self.params.clone(),
            proc: ProcNode::Unassigned,
            pattern_override: self.pattern_override,
            replica_tag: self.replica_tag,
        }
    }
}

impl fmt::Debug for TaskNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskNode")
            .field("label", &self.label)
            .field("proc", &self.proc)
            .finish()
    }
}
