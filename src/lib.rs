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

//! A runtime for streaming image-processing pipelines expressed as directed
//! acyclic task graphs. Nodes are computational tasks, edges are typed
//! channels of multidimensional float32 buffers; a dynamic scheduler binds
//! every task to a thread and a compute resource and drives data through
//! the graph until all streams terminate.

// Unless we are in release mode, allow dead code, unused imports and variables,
// it makes development more enjoyable.
#![cfg_attr(debug_assertions, allow(dead_code, unused_imports, unused_variables))]

pub mod buffer;
pub mod daemon;
pub mod error;
pub mod graph;
pub mod group;
pub mod json;
pub mod messenger;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod resources;
pub mod sched;
pub mod task;
pub mod tasks;

pub use buffer::{Buffer, Depth, Location, Requisition, Value};
pub use error::{Error, Result};
pub use graph::{Edge, NodeId, TaskGraph};
pub use group::{Group, SendPattern};
pub use pool::BufferPool;
pub use registry::PluginRegistry;
pub use resources::Resources;
pub use sched::{RemoteMode, Scheduler, SchedulerConfig, SchedulerKind};
pub use task::{ProcNode, Task, TaskMode, TaskNode};
