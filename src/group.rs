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
    Arc, Mutex,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use crate::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
    pool::{BufferPool, QUEUE_TIMEOUT},
};

/// How a group routes filled buffers to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPattern {
    /// Every consumer receives every buffer.
    Broadcast,
    /// Consecutive buffers round-robin across consumers.
    Scatter,
    /// Consumers receive whole sub-streams in turn; the group advances to
    /// the next consumer after its expected count is reached.
    Sequential,
}

enum Item {
    Data(Buffer),
    Eos,
}

struct Target {
    sender: Sender<Item>,
    receiver: Receiver<Item>,
    /// Sticky end-of-stream marker so pops after the stream keep reporting it.
    eos: AtomicBool,
}

struct RouteState {
    counter: usize,
    current: usize,
    sent_to_current: u64,
    expected: Vec<i64>,
    finished: bool,
}

/// The connector between one producer's output port and its consumer tasks.
///
/// Empty buffers come out of a bounded pool sized at two per consumer; the
/// bound is the engine's only flow control. Filled buffers route to the
/// per-consumer queues according to the send pattern. An `EOS` marker pushed
/// by a terminating producer drains through every queue.
pub struct Group {
    pattern: SendPattern,
    pool: BufferPool,
    targets: Vec<Target>,
    state: Mutex<RouteState>,
    stop: Arc<AtomicBool>,
}

impl Group {
    pub fn new(num_targets: usize, pattern: SendPattern, stop: Arc<AtomicBool>) -> Self {
        let capacity = 2 * num_targets.max(1);
        Group::with_capacity(num_targets, pattern, capacity, stop)
    }

    pub fn with_capacity(
        num_targets: usize,
        pattern: SendPattern,
        capacity: usize,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let targets = (0..num_targets)
            .map(|_| {
                let (sender, receiver) = unbounded();
                Target { sender, receiver, eos: AtomicBool::new(false) }
            })
            .collect();

        Group {
            pattern,
            pool: BufferPool::new(capacity, Arc::clone(&stop)),
            targets,
            state: Mutex::new(RouteState {
                counter: 0,
                current: 0,
                sent_to_current: 0,
                expected: vec![-1; num_targets],
                finished: false,
            }),
            stop,
        }
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn pattern(&self) -> SendPattern {
        self.pattern
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// How many buffers the given consumer receives before a SEQUENTIAL
    /// group moves on to the next one.
    pub fn set_num_expected(&self, target: usize, count: i64) {
        let mut state = self.state.lock().unwrap();
        state.expected[target] = count;
    }

    /// An empty buffer of shape `req`, resized if a recycled one differs.
    /// Blocks when all pooled buffers are downstream.
    pub fn pop_output(&self, req: &Requisition) -> Result<Buffer> {
        self.pool.acquire(req)
    }

    /// Route a filled buffer to the consumers. A group without consumers
    /// recycles the buffer immediately (the producer is a sink).
    pub fn push_output(&self, mut buffer: Buffer) -> Result<()> {
        if self.targets.is_empty() {
            buffer.release();
            return Ok(());
        }

        let mut state = self.state.lock().unwrap();
        if state.finished {
            return Err(Error::fatal("push on a finished group"));
        }

        match self.pattern {
            SendPattern::Scatter => {
                let index = state.counter % self.targets.len();
                state.counter += 1;
                drop(state);
                self.send(index, Item::Data(buffer));
            }
            SendPattern::Broadcast => {
                drop(state);
                // Consumers own their buffers, so every extra consumer gets a
                // pool-backed duplicate. The pool bound still applies.
                for index in 1..self.targets.len() {
                    let mut dup = self.pool.acquire(&buffer.get_requisition())?;
                    Buffer::copy(&mut buffer, &mut dup)?;
                    Buffer::copy_metadata(&buffer, &mut dup);
                    self.send(index, Item::Data(dup));
                }
                self.send(0, Item::Data(buffer));
            }
            SendPattern::Sequential => {
                let index = state.current.min(self.targets.len() - 1);
                state.sent_to_current += 1;
                let expected = state.expected[index];
                if expected >= 0 && state.sent_to_current >= expected as u64 {
                    state.current += 1;
                    state.sent_to_current = 0;
                }
                drop(state);
                self.send(index, Item::Data(buffer));
            }
        }

        Ok(())
    }

    fn send(&self, target: usize, item: Item) {
        // Filled queues are unbounded; the pool bound provides back-pressure.
        let _ = self.targets[target].sender.send(item);
    }

    /// One buffer from the consumer's filled queue, or `None` once the
    /// producer has finished (or the engine is stopping).
    pub fn pop_input(&self, target: usize) -> Result<Option<Buffer>> {
        let slot = &self.targets[target];
        if slot.eos.load(Ordering::Acquire) {
            return Ok(None);
        }

        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match slot.receiver.recv_timeout(QUEUE_TIMEOUT) {
                Ok(Item::Data(buffer)) => return Ok(Some(buffer)),
                Ok(Item::Eos) => {
                    slot.eos.store(true, Ordering::Release);
                    return Ok(None);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
    }

    /// Terminate the stream: every consumer sees end-of-stream after the
    /// buffers already queued for it.
    pub fn finish(&self) {
        let mut state = self.state.lock().unwrap();
        if state.finished {
            return;
        }
        state.finished = true;
        drop(state);
        for index in 0..self.targets.len() {
            self.send(index, Item::Eos);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }
}
