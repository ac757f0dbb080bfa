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

use std::time::Duration;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crate::{
    buffer::{Buffer, Requisition},
    error::Result,
    task::{Task, TaskMode},
};

/// The external consumer's handle to an `OutputTask`. Buffers popped here
/// must be returned with `put_back` so the task can reuse them; the copy
/// pool grows only when the consumer falls behind.
pub struct OutputReceiver {
    outgoing: Receiver<Buffer>,
    returned: Sender<Buffer>,
}

impl OutputReceiver {
    /// The next result, or `None` when nothing arrives within `timeout`
    /// or the pipeline is gone.
    pub fn pop(&self, timeout: Duration) -> Option<Buffer> {
        match self.outgoing.recv_timeout(timeout) {
            Ok(buffer) => Some(buffer),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<Buffer> {
        self.outgoing.try_recv().ok()
    }

    pub fn put_back(&self, buffer: Buffer) {
        let _ = self.returned.send(buffer);
    }
}

/// A sink that clones every input into a queue an external consumer pops.
pub struct OutputTask {
    outgoing: Sender<Buffer>,
    returned: (Sender<Buffer>, Receiver<Buffer>),
}

impl OutputTask {
    /// The task and the receiver its consumer holds on to.
    pub fn create() -> (Self, OutputReceiver) {
        let (outgoing_tx, outgoing_rx) = unbounded();
        let returned = unbounded();
        let receiver = OutputReceiver {
            outgoing: outgoing_rx,
            returned: returned.0.clone(),
        };
        (OutputTask { outgoing: outgoing_tx, returned }, receiver)
    }
}

impl Task for OutputTask {
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
        let mut copy = match self.returned.1.try_recv() {
            Ok(buffer) => buffer,
            Err(_) => Buffer::dup(inputs[0]),
        };
        Buffer::copy(inputs[0], &mut copy)?;
        Buffer::copy_metadata(inputs[0], &mut copy);
        let _ = self.outgoing.send(copy);
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        // A copied output node gets its own fresh queue pair; the receiver
        // side is only reachable for the original.
        let (task, _receiver) = OutputTask::create();
        Box::new(task)
    }
}
