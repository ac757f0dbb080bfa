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

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use crate::{
    buffer::{Buffer, Requisition, Value},
    error::{Error, Result},
    task::{Task, TaskMode},
};

/// The terminal sink: consumes buffers and counts them. With `download` set
/// it forces a device-to-host migration per buffer, which is how GPU
/// pipelines are benchmarked end to end.
pub struct NullTask {
    count: Arc<AtomicU64>,
    download: bool,
}

impl Default for NullTask {
    fn default() -> Self {
        Self::new()
    }
}

impl NullTask {
    pub fn new() -> Self {
        NullTask { count: Arc::new(AtomicU64::new(0)), download: false }
    }

    /// Shared counter of processed buffers; stays valid after the task moves
    /// into a graph.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }
}

impl Task for NullTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::SINK | TaskMode::CPU
    }

    fn get_requisition(&mut self, _inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(Requisition::none())
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        _output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        if self.download {
            inputs[0].get_host_array()?;
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "download" => {
                self.download = value
                    .as_bool()
                    .ok_or_else(|| Error::graph("bad value for parameter `download`"))?;
                Ok(())
            }
            other => Err(Error::graph(format!("unknown parameter `{}`", other))),
        }
    }

    fn copy_task(&self) -> Box<dyn Task> {
        // Replicated sinks keep feeding one shared counter.
        Box::new(NullTask { count: Arc::clone(&self.count), download: self.download })
    }
}
