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

use crate::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
    task::{Task, TaskMode},
};

/// Reduces the whole stream to one frame: the element-wise mean. Process
/// accumulates and keeps asking for more; the single result goes out in the
/// generate phase once the inputs end.
#[derive(Default)]
pub struct AverageTask {
    acc: Vec<f64>,
    shape: Requisition,
    count: u64,
    emitted: bool,
}

impl AverageTask {
    pub fn new() -> Self {
        AverageTask::default()
    }
}

impl Task for AverageTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::REDUCTOR | TaskMode::CPU
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(inputs[0].get_requisition())
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        _output: &mut Buffer,
        req: &Requisition,
    ) -> Result<bool> {
        if self.count == 0 {
            self.acc = vec![0.0; req.size()];
            self.shape = *req;
        } else if self.shape != *req {
            return Err(Error::graph(format!(
                "average cannot mix {} and {} frames",
                self.shape, req
            )));
        }

        for (acc, &sample) in self.acc.iter_mut().zip(inputs[0].get_host_array()?.iter()) {
            *acc += sample as f64;
        }
        self.count += 1;
        Ok(true)
    }

    fn generate(&mut self, output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        if self.emitted || self.count == 0 {
            return Ok(false);
        }

        output.resize(&self.shape);
        output.discard_location();
        let count = self.count as f64;
        for (sample, &acc) in output.get_host_array()?.iter_mut().zip(self.acc.iter()) {
            *sample = (acc / count) as f32;
        }

        self.emitted = true;
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(AverageTask::new())
    }
}
