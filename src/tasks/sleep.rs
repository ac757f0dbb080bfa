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

use std::{thread, time::Duration};
use crate::{
    buffer::{Buffer, Requisition, Value},
    error::{Error, Result},
    task::{Task, TaskMode},
};

/// Delays every buffer by `time` seconds, then forwards it. Useful for
/// simulating slow stages and for watching back-pressure behave.
pub struct SleepTask {
    time: f64,
}

impl Default for SleepTask {
    fn default() -> Self {
        SleepTask { time: 1.0 }
    }
}

impl SleepTask {
    pub fn new(time: f64) -> Self {
        SleepTask { time }
    }
}

impl Task for SleepTask {
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
        thread::sleep(Duration::from_secs_f64(self.time.max(0.0)));
        output.discard_location();
        Buffer::copy(inputs[0], output)?;
        Ok(true)
    }

    fn set_parameter(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "time" => {
                let time = match *value {
                    Value::Float(f) => f,
                    Value::Int(i) => i as f64,
                    _ => return Err(Error::graph("bad value for parameter `time`")),
                };
                self.time = time;
                Ok(())
            }
            other => Err(Error::graph(format!("unknown parameter `{}`", other))),
        }
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(SleepTask::new(self.time))
    }
}
