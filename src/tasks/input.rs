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

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crate::{
    buffer::{Buffer, Requisition},
    error::Result,
    pool::QUEUE_TIMEOUT,
    task::{Task, TaskMode},
};

struct InputShared {
    incoming: (Sender<Buffer>, Receiver<Buffer>),
    recycled: (Sender<Buffer>, Receiver<Buffer>),
    active: AtomicBool,
}

/// The external caller's handle to an `InputTask`: push buffers into the
/// pipeline, recycle the ones the task is done with, and signal the end of
/// the stream. The daemon feeds remote data through this.
#[derive(Clone)]
pub struct InputController {
    shared: Arc<InputShared>,
}

impl InputController {
    /// Feed one buffer into the pipeline.
    pub fn push(&self, buffer: Buffer) {
        let _ = self.shared.incoming.0.send(buffer);
    }

    /// A buffer the task has consumed and handed back for reuse, if any.
    pub fn recycle(&self) -> Option<Buffer> {
        self.shared.recycled.1.try_recv().ok()
    }

    /// End the stream: the task drains what was pushed, then terminates.
    pub fn stop(&self) {
        self.shared.active.store(false, Ordering::Release);
    }
}

/// A generator whose data comes from outside the graph. `get_requisition`
/// blocks until the controller pushes a buffer (popped here, released after
/// `generate` copied it out) or the stream is stopped.
pub struct InputTask {
    shared: Arc<InputShared>,
    pending: Option<Buffer>,
    last_req: Requisition,
}

impl Default for InputTask {
    fn default() -> Self {
        Self::new()
    }
}

impl InputTask {
    pub fn new() -> Self {
        InputTask {
            shared: Arc::new(InputShared {
                incoming: unbounded(),
                recycled: unbounded(),
                active: AtomicBool::new(true),
            }),
            pending: None,
            last_req: Requisition::d1(1),
        }
    }

    pub fn controller(&self) -> InputController {
        InputController { shared: Arc::clone(&self.shared) }
    }
}

impl Task for InputTask {
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
        if self.pending.is_none() {
            loop {
                match self.shared.incoming.1.recv_timeout(QUEUE_TIMEOUT) {
                    Ok(buffer) => {
                        self.last_req = buffer.get_requisition();
                        self.pending = Some(buffer);
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        if !self.shared.active.load(Ordering::Acquire) {
                            // Drain what was pushed before the stop.
                            if let Ok(buffer) = self.shared.incoming.1.try_recv() {
                                self.last_req = buffer.get_requisition();
                                self.pending = Some(buffer);
                            }
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }
        Ok(self.last_req)
    }

    fn generate(&mut self, output: &mut Buffer, _req: &Requisition) -> Result<bool> {
        match self.pending.take() {
            Some(mut buffer) => {
                output.discard_location();
                Buffer::copy(&mut buffer, output)?;
                Buffer::copy_metadata(&buffer, output);
                let _ = self.shared.recycled.0.send(buffer);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(InputTask::new())
    }
}
