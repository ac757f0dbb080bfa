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

/// Emits its input `number` times. Process stores a private copy and
/// returns `false` right away to enter the generate phase; a new upstream
/// buffer would otherwise arrive before the copies went out.
pub struct LoopTask {
    number: usize,
    current: usize,
    stored: Option<Buffer>,
}

impl Default for LoopTask {
    fn default() -> Self {
        LoopTask { number: 1, current: 0, stored: None }
    }
}

impl LoopTask {
    pub fn new(number: usize) -> Self {
        LoopTask { number, ..Default::default() }
    }
}

impl Task for LoopTask {
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
        let mut stored = match self.stored.take() {
            Some(buffer) => buffer,
            None => Buffer::dup(inputs[0]),
        };
        Buffer::copy(inputs[0], &mut stored)?;
        self.stored = Some(stored);
        self.current = 0;
        Ok(false)
    }

    fn generate(&mut self, output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        if self.current == self.number {
            return Ok(false);
        }
        let stored = self
            .stored
            .as_mut()
            .ok_or_else(|| Error::fatal("loop generate without a stored buffer"))?;
        output.discard_location();
        Buffer::copy(stored, output)?;
        self.current += 1;
        Ok(true)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "number" => {
                self.number = value
                    .as_usize()
                    .ok_or_else(|| Error::graph("bad value for parameter `number`"))?;
                Ok(())
            }
            other => Err(Error::graph(format!("unknown parameter `{}`", other))),
        }
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(LoopTask::new(self.number))
    }
}
