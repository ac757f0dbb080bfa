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

/// Element-wise difference of two streams: output = port0 - port1.
#[derive(Default)]
pub struct SubtractTask;

impl Task for SubtractTask {
    fn num_inputs(&self) -> usize {
        2
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        let req = inputs[0].get_requisition();
        if !inputs[1].cmp_dimensions(&req) {
            return Err(Error::graph(format!(
                "subtract inputs disagree on shape: {} vs {}",
                req,
                inputs[1].get_requisition()
            )));
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
        let minuend = inputs[0].get_host_array()?.to_vec();
        let subtrahend = inputs[1].get_host_array()?.to_vec();
        for ((out, a), b) in output
            .get_host_array()?
            .iter_mut()
            .zip(minuend)
            .zip(subtrahend)
        {
            *out = a - b;
        }
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(SubtractTask)
    }
}
