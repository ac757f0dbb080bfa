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

/// Replays the whole input stream twice. The accumulate phase stores a copy
/// of every buffer; once the stream ends, generate emits the stored
/// sequence two times in order.
#[derive(Default)]
pub struct DuplicateTask {
    stored: Vec<Buffer>,
    cursor: usize,
    rounds: usize,
}

impl DuplicateTask {
    pub fn new() -> Self {
        DuplicateTask::default()
    }
}

impl Task for DuplicateTask {
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
        _req: &Requisition,
    ) -> Result<bool> {
        let mut copy = Buffer::dup(inputs[0]);
        Buffer::copy(inputs[0], &mut copy)?;
        Buffer::copy_metadata(inputs[0], &mut copy);
        self.stored.push(copy);
        Ok(true)
    }

    fn generate(&mut self, output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        if self.rounds == 2 || self.stored.is_empty() {
            return Ok(false);
        }

        let stored = self
            .stored
            .get_mut(self.cursor)
            .ok_or_else(|| Error::fatal("duplicate cursor out of range"))?;
        output.discard_location();
        Buffer::copy(stored, output)?;

        self.cursor += 1;
        if self.cursor == self.stored.len() {
            self.cursor = 0;
            self.rounds += 1;
        }
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(DuplicateTask::new())
    }
}
