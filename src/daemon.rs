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

//! The server side of remoting. A daemon accepts a peer, receives a
//! pipeline description, splices input/output shims around it and drives
//! its own scheduler, so peers are recursively the same engine. Clients are
//! served one at a time, strictly request/reply.

use std::{
    net::TcpListener,
    sync::atomic::{AtomicBool, Ordering},
    sync::Arc,
    thread,
    time::Duration,
};
use bytes::{Buf, BufMut, BytesMut};
use log::{debug, info, warn};
use crate::{
    buffer::Buffer,
    error::{Error, Result},
    json,
    messenger::{self, Message, MessageType, Messenger, TcpMessenger},
    pool::QUEUE_TIMEOUT,
    registry::PluginRegistry,
    resources::Resources,
    sched::{Scheduler, SchedulerConfig},
    task::TaskNode,
    tasks::{InputController, InputTask, OutputReceiver, OutputTask},
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);

struct Job {
    input: Option<InputController>,
    output: Option<OutputReceiver>,
    n_inputs: u16,
    in_dims: Vec<u16>,
    pending: Option<Buffer>,
    scheduler: Arc<Scheduler>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Job {
    fn finish(&mut self) {
        if let Some(input) = &self.input {
            input.stop();
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                // Give the stream a moment to drain before forcing the stop.
                thread::sleep(QUEUE_TIMEOUT);
            }
            if !handle.is_finished() {
                self.scheduler.stop();
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A daemon serving remote subgraphs on a listening address.
pub struct Daemon {
    addr: String,
    registry: Arc<PluginRegistry>,
    resources: Arc<Resources>,
    stop: Arc<AtomicBool>,
    bound: Option<String>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Daemon {
    pub fn new(addr: &str, registry: Arc<PluginRegistry>, resources: Arc<Resources>) -> Self {
        Daemon {
            addr: addr.to_string(),
            registry,
            resources,
            stop: Arc::new(AtomicBool::new(false)),
            bound: None,
            handle: None,
        }
    }

    /// Bind the listener and serve clients on a background thread. Returns
    /// the bound `host:port`, which differs from the configured address when
    /// port 0 was requested.
    pub fn start(&mut self) -> Result<String> {
        let hostport = messenger::parse_addr(&self.addr)?;
        let listener = TcpListener::bind(&hostport)?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?.to_string();
        info!("daemon listening on {}", bound);

        let stop = Arc::clone(&self.stop);
        let registry = Arc::clone(&self.registry);
        let resources = Arc::clone(&self.resources);

        self.handle = Some(thread::spawn(move || {
            accept_loop(listener, stop, registry, resources);
        }));
        self.bound = Some(bound.clone());
        Ok(bound)
    }

    pub fn bound_addr(&self) -> Option<&str> {
        self.bound.as_deref()
    }

    /// Stop accepting and wait for the serving thread. A client currently
    /// mid-session is allowed to finish its exchange.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(
    listener: TcpListener,
    stop: Arc<AtomicBool>,
    registry: Arc<PluginRegistry>,
    resources: Arc<Resources>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("peer {} connected", peer);
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let msgr = match TcpMessenger::new(stream) {
                    Ok(msgr) => msgr,
                    Err(err) => {
                        warn!("rejecting peer: {}", err);
                        continue;
                    }
                };
                if let Err(err) = serve_client(msgr, &registry, &resources) {
                    warn!("client session ended with error: {}", err);
                }
                debug!("peer {} disconnected", peer);
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                warn!("accept failed: {}", err);
                return;
            }
        }
    }
}

fn serve_client(
    mut msgr: TcpMessenger,
    registry: &Arc<PluginRegistry>,
    resources: &Arc<Resources>,
) -> Result<()> {
    let mut job: Option<Job> = None;

    loop {
        let request = match msgr.recv_blocking()? {
            Some(request) => request,
            None => return Ok(()),
        };

        let terminate = request.ty == MessageType::Terminate;
        let reply = handle_request(request, &mut job, registry, resources)?;
        msgr.send_reply(&reply)?;

        if terminate {
            msgr.disconnect();
            return Ok(());
        }
    }
}

fn handle_request(
    request: Message,
    job: &mut Option<Job>,
    registry: &Arc<PluginRegistry>,
    resources: &Arc<Resources>,
) -> Result<Message> {
    match request.ty {
        MessageType::GetNumDevices => Ok(Message::ack_u16(resources.num_devices() as u16)),
        MessageType::GetNumCpus => Ok(Message::ack_u16(num_cpus::get() as u16)),

        MessageType::StreamJson | MessageType::ReplicateJson => {
            let document = String::from_utf8(request.payload)
                .map_err(|_| Error::protocol("pipeline description is not UTF-8"))?;
            *job = Some(start_job(&document, request.ty, registry, resources)?);
            Ok(Message::new(MessageType::Ack))
        }

        MessageType::GetStructure => {
            let job = active_job(job)?;
            let mut payload = BytesMut::new();
            payload.put_u16_le(job.n_inputs);
            for &dims in &job.in_dims {
                payload.put_u16_le(dims);
            }
            Ok(Message::with_payload(MessageType::Structure, payload.to_vec()))
        }

        MessageType::SendInputs => {
            let job = active_job(job)?;
            let input = job
                .input
                .as_ref()
                .ok_or_else(|| Error::protocol("replicated pipelines take no inputs"))?;

            let mut payload = &request.payload[..];
            if payload.remaining() < 2 {
                return Err(Error::protocol("truncated SEND_INPUTS payload"));
            }
            let count = payload.get_u16_le();
            for _ in 0..count {
                let mut buffer = input.recycle().unwrap_or_else(|| {
                    Buffer::new(&crate::buffer::Requisition::d1(1))
                });
                messenger::get_buffer_into(&mut payload, &mut buffer)?;
                input.push(buffer);
            }
            Ok(Message::new(MessageType::Ack))
        }

        MessageType::GetRequisition => {
            let job = active_job(job)?;
            if job.pending.is_none() {
                let buffer = pop_result(job)?;
                job.pending = Some(buffer);
            }
            let req = job.pending.as_ref().unwrap().get_requisition();
            let mut payload = BytesMut::new();
            messenger::put_requisition(&mut payload, &req);
            Ok(Message::with_payload(MessageType::Requisition, payload.to_vec()))
        }

        MessageType::GetResult => {
            let job = active_job(job)?;
            let mut buffer = match job.pending.take() {
                Some(buffer) => buffer,
                None => pop_result(job)?,
            };
            let mut payload = BytesMut::new();
            messenger::put_buffer(&mut payload, &mut buffer)?;
            if let Some(output) = &job.output {
                output.put_back(buffer);
            }
            Ok(Message::with_payload(MessageType::Result, payload.to_vec()))
        }

        MessageType::Cleanup | MessageType::Terminate => {
            if let Some(mut active) = job.take() {
                active.finish();
            }
            Ok(Message::new(MessageType::Ack))
        }

        other => Err(Error::protocol(format!(
            "request {:?} is not valid on the server side",
            other
        ))),
    }
}

fn active_job(job: &mut Option<Job>) -> Result<&mut Job> {
    job.as_mut()
        .ok_or_else(|| Error::protocol("no pipeline has been uploaded yet"))
}

fn pop_result(job: &mut Job) -> Result<Buffer> {
    let output = job
        .output
        .as_ref()
        .ok_or_else(|| Error::protocol("replicated pipelines return no results"))?;

    loop {
        if let Some(buffer) = output.pop(QUEUE_TIMEOUT) {
            return Ok(buffer);
        }
        let finished = job
            .handle
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true);
        if finished {
            // One last look: the run may have pushed right before exiting.
            if let Some(buffer) = output.try_pop() {
                return Ok(buffer);
            }
            return Err(Error::protocol("pipeline ended before producing a result"));
        }
    }
}

/// Instantiate the received pipeline. Streamed pipelines get an input shim
/// in front of their root and an output shim after their leaf; replicated
/// ones are complete and run as-is.
fn start_job(
    document: &str,
    kind: MessageType,
    registry: &Arc<PluginRegistry>,
    resources: &Arc<Resources>,
) -> Result<Job> {
    let mut graph = json::read_graph(document, registry)?;

    let (input, output, n_inputs, in_dims) = match kind {
        MessageType::StreamJson => {
            let roots = graph.roots();
            let leaves = graph.leaves();
            if roots.len() != 1 || leaves.len() != 1 {
                return Err(Error::graph(
                    "a streamed pipeline needs exactly one root and one leaf",
                ));
            }
            let (root, leaf) = (roots[0], leaves[0]);

            let root_task = graph.node(root).task();
            let n_inputs = root_task.num_inputs() as u16;
            let in_dims: Vec<u16> = (0..root_task.num_inputs())
                .map(|port| root_task.num_dimensions(port) as u16)
                .collect();

            let input_task = InputTask::new();
            let controller = input_task.controller();
            let input_id = graph.add_node(TaskNode::new("input-task", Box::new(input_task)));
            graph.connect(input_id, root, 0)?;

            let (output_task, receiver) = OutputTask::create();
            let output_id = graph.add_node(TaskNode::new("output-task", Box::new(output_task)));
            graph.connect(leaf, output_id, 0)?;

            (Some(controller), Some(receiver), n_inputs, in_dims)
        }
        MessageType::ReplicateJson => (None, None, 0, Vec::new()),
        _ => return Err(Error::fatal("start_job called with a non-pipeline message")),
    };

    let scheduler = Arc::new(Scheduler::new(
        SchedulerConfig::default(),
        Arc::clone(resources),
    ));

    let worker = Arc::clone(&scheduler);
    let handle = thread::spawn(move || {
        if let Err(err) = worker.run(&mut graph) {
            warn!("remote pipeline failed: {}", err);
        }
    });

    Ok(Job {
        input,
        output,
        n_inputs,
        in_dims,
        pending: None,
        scheduler,
        handle: Some(handle),
    })
}
