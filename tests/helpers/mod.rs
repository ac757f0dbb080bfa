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

// Shared across the integration test binaries; not every binary uses every
// helper.
#![allow(dead_code)]

use std::sync::{
    atomic::AtomicBool,
    Arc,
};
use ufo_engine::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
    resources::Resources,
    task::{ProcNode, Task, TaskMode},
};

pub fn stop_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

/// A buffer of the given shape filled with one constant.
pub fn filled_buffer(dims: &[usize], value: f32) -> Buffer {
    let mut buffer = Buffer::new(&Requisition::new(dims));
    buffer
        .get_host_array()
        .unwrap()
        .iter_mut()
        .for_each(|sample| *sample = value);
    buffer
}

/// The first sample of a buffer; generators fill frames with a constant, so
/// this identifies the frame.
pub fn first_sample(buffer: &mut Buffer) -> f32 {
    buffer.get_host_array().unwrap()[0]
}

/// A GPU-flagged processor scaling every sample, used to exercise mapping
/// and expansion against fake devices. The arithmetic itself runs on the
/// host; what matters is the mode flag and the process-node binding.
pub struct GpuScaleTask {
    pub factor: f32,
}

impl Task for GpuScaleTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::GPU
    }

    fn setup(&mut self, _resources: &Arc<Resources>, proc: &ProcNode) -> Result<()> {
        match proc {
            ProcNode::Gpu { .. } => Ok(()),
            other => Err(Error::setup("scale", format!("expected a GPU node, got {:?}", other))),
        }
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(inputs[0].get_requisition())
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        output.discard_location();
        let factor = self.factor;
        let src = inputs[0].get_host_array()?.to_vec();
        for (out, sample) in output.get_host_array()?.iter_mut().zip(src) {
            *out = sample * factor;
        }
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(GpuScaleTask { factor: self.factor })
    }
}

/// Fails its setup; the scheduler must refuse the whole run.
pub struct BrokenSetupTask;

impl Task for BrokenSetupTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn setup(&mut self, _resources: &Arc<Resources>, _proc: &ProcNode) -> Result<()> {
        Err(Error::setup("broken", "kernel `does-not-exist.cl` missing"))
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(inputs[0].get_requisition())
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(BrokenSetupTask)
    }
}

/// Processes a few buffers, then reports a resource failure.
pub struct ExplodingTask {
    pub after: usize,
    seen: usize,
}

impl ExplodingTask {
    pub fn new(after: usize) -> Self {
        ExplodingTask { after, seen: 0 }
    }
}

impl Task for ExplodingTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(inputs[0].get_requisition())
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        self.seen += 1;
        if self.seen > self.after {
            return Err(Error::resource("simulated device loss"));
        }
        output.discard_location();
        Buffer::copy(inputs[0], output)?;
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(ExplodingTask::new(self.after))
    }
}
