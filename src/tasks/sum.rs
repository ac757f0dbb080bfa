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
    buffer::{Buffer, Requisition, Value},
    error::{Error, Result},
    task::{Task, TaskMode},
};

/// Element-wise sum across all input ports, one output per input tuple.
/// The port count is a parameter so fan-ins of any width can be wired.
pub struct SumTask {
    n_inputs: usize,
}

impl Default for SumTask {
    fn default() -> Self {
        SumTask { n_inputs: 2 }
    }
}

impl SumTask {
    pub fn new(n_inputs: usize) -> Self {
        SumTask { n_inputs }
    }
}

impl Task for SumTask {
    fn num_inputs(&self) -> usize {
        self.n_inputs
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        let req = inputs[0].get_requisition();
        for input in inputs.iter().skip(1) {
            if !input.cmp_dimensions(&req) {
                return Err(Error::graph(format!(
                    "sum inputs disagree on shape: {} vs {}",
                    req,
                    input.get_requisition()
                )));
            }
        }
        Ok(req)
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        output.discard_location();
        {
            let out = output.get_host_array()?;
            out.fill(0.0);
        }
        for input in inputs.iter_mut() {
            let src = input.get_host_array()?;
            let out = output.get_host_array()?;
            for (acc, &sample) in out.iter_mut().zip(src.iter()) {
                *acc += sample;
            }
        }
        Ok(true)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "num-inputs" => {
                let n = value
                    .as_usize()
                    .ok_or_else(|| Error::graph("bad value for parameter `num-inputs`"))?;
                if n == 0 {
                    return Err(Error::graph("sum needs at least one input"));
                }
                self.n_inputs = n;
                Ok(())
            }
            other => Err(Error::graph(format!("unknown parameter `{}`", other))),
        }
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(SumTask::new(self.n_inputs))
    }
}
