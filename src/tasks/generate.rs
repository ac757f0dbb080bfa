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

/// Generates `number` frames of the configured shape. Each frame is filled
/// with the constant `value`, or with its own frame index when no value is
/// set, which makes the output stream verifiable downstream.
pub struct DummyDataTask {
    width: usize,
    height: usize,
    number: usize,
    value: Option<f32>,
    current: usize,
}

impl Default for DummyDataTask {
    fn default() -> Self {
        DummyDataTask {
            width: 1,
            height: 1,
            number: 1,
            value: None,
            current: 0,
        }
    }
}

impl DummyDataTask {
    pub fn new(width: usize, height: usize, number: usize) -> Self {
        DummyDataTask { width, height, number, ..Default::default() }
    }
}

impl Task for DummyDataTask {
    fn num_inputs(&self) -> usize {
        0
    }

    fn num_dimensions(&self, _input: usize) -> usize {
        0
    }

    fn mode(&self) -> TaskMode {
        TaskMode::GENERATOR | TaskMode::CPU
    }

    fn get_requisition(&mut self, _inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        Ok(Requisition::d2(self.width, self.height))
    }

    fn generate(&mut self, output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        if self.current == self.number {
            return Ok(false);
        }

        let fill = self.value.unwrap_or(self.current as f32);
        output.discard_location();
        for sample in output.get_host_array()?.iter_mut() {
            *sample = fill;
        }

        self.current += 1;
        Ok(true)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        let bad = || Error::graph(format!("bad value for parameter `{}`", name));
        match name {
            "width" => self.width = value.as_usize().ok_or_else(bad)?,
            "height" => self.height = value.as_usize().ok_or_else(bad)?,
            "number" => self.number = value.as_usize().ok_or_else(bad)?,
            "value" => self.value = Some(value.as_f32().ok_or_else(bad)?),
            other => return Err(Error::graph(format!("unknown parameter `{}`", other))),
        }
        Ok(())
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(DummyDataTask {
            width: self.width,
            height: self.height,
            number: self.number,
            value: self.value,
            current: 0,
        })
    }
}
