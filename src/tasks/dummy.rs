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
    error::Result,
    task::{Task, TaskMode},
};

/// A no-op placeholder. Buffers pass through untouched and uncopied.
#[derive(Default)]
pub struct DummyTask;

impl Task for DummyTask {
    fn num_inputs(&self) -> usize {
        1
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        2
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU | TaskMode::SHARE_DATA
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(inputs[0].get_requisition())
    }

    fn process_shared(&mut self, _buffer: &mut Buffer, _req: &Requisition) -> Result<bool> {
        Ok(true)
    }

    fn process(
        &mut self,
        inputs: &mut [&mut Buffer],
        output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        // Fallback when the passthrough shortcut does not apply.
        output.discard_location();
        Buffer::copy(inputs[0], output)?;
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(DummyTask)
    }
}
