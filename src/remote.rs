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

use std::sync::{Arc, Mutex};
use bytes::{Buf, BufMut, BytesMut};
use log::debug;
use crate::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
    messenger::{self, Message, MessageType, Messenger, Role},
    resources::Resources,
    task::{ProcNode, Task, TaskMode},
};

/// The client endpoint of one peer engine. Drives the upload/requisition/
/// result request cycle over a single messenger; one request is in flight
/// at a time.
pub struct RemoteNode {
    addr: String,
    msgr: Mutex<Box<dyn Messenger>>,
}

impl RemoteNode {
    pub fn connect(addr: &str) -> Result<Self> {
        let msgr = messenger::connect(addr, Role::Client)?;
        Ok(RemoteNode { addr: addr.to_string(), msgr: Mutex::new(msgr) })
    }

    pub fn with_messenger(addr: &str, msgr: Box<dyn Messenger>) -> Self {
        RemoteNode { addr: addr.to_string(), msgr: Mutex::new(msgr) }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    fn request(&self, request: &Message) -> Result<Message> {
        self.msgr.lock().unwrap().send_blocking(request)
    }

    pub fn num_devices(&self) -> Result<u16> {
        let reply = self
            .request(&Message::new(MessageType::GetNumDevices))?
            .expect(MessageType::Ack)?;
        decode_u16(&reply.payload)
    }

    pub fn num_cpus(&self) -> Result<u16> {
        let reply = self
            .request(&Message::new(MessageType::GetNumCpus))?
            .expect(MessageType::Ack)?;
        decode_u16(&reply.payload)
    }

    /// Upload a pipeline description; `kind` selects streaming a share of
    /// the data or replicating the whole graph.
    pub fn send_graph(&self, kind: MessageType, description: &str) -> Result<()> {
        let request = Message::with_payload(kind, description.as_bytes().to_vec());
        self.request(&request)?.expect(MessageType::Ack)?;
        Ok(())
    }

    /// Arity of the remote sub-pipeline: input count and per-port rank.
    pub fn structure(&self) -> Result<(u16, Vec<u16>)> {
        let reply = self
            .request(&Message::new(MessageType::GetStructure))?
            .expect(MessageType::Structure)?;

        let mut payload = &reply.payload[..];
        if payload.remaining() < 2 {
            return Err(Error::protocol("truncated STRUCTURE reply"));
        }
        let n_inputs = payload.get_u16_le();
        let mut dims = Vec::with_capacity(n_inputs as usize);
        for _ in 0..n_inputs {
            if payload.remaining() < 2 {
                return Err(Error::protocol("truncated STRUCTURE reply"));
            }
            dims.push(payload.get_u16_le());
        }
        Ok((n_inputs, dims))
    }

    pub fn send_inputs(&self, inputs: &mut [&mut Buffer]) -> Result<()> {
        let mut payload = BytesMut::new();
        payload.put_u16_le(inputs.len() as u16);
        for buffer in inputs.iter_mut() {
            messenger::put_buffer(&mut payload, buffer)?;
        }
        let request = Message::with_payload(MessageType::SendInputs, payload.to_vec());
        self.request(&request)?.expect(MessageType::Ack)?;
        Ok(())
    }

    pub fn requisition(&self) -> Result<Requisition> {
        let reply = self
            .request(&Message::new(MessageType::GetRequisition))?
            .expect(MessageType::Requisition)?;
        messenger::get_requisition(&mut &reply.payload[..])
    }

    pub fn result_into(&self, output: &mut Buffer) -> Result<()> {
        let reply = self
            .request(&Message::new(MessageType::GetResult))?
            .expect(MessageType::Result)?;
        messenger::get_buffer_into(&mut &reply.payload[..], output)
    }

    pub fn cleanup(&self) -> Result<()> {
        self.request(&Message::new(MessageType::Cleanup))?
            .expect(MessageType::Ack)?;
        Ok(())
    }

    pub fn terminate(&self) -> Result<()> {
        self.request(&Message::new(MessageType::Terminate))?
            .expect(MessageType::Ack)?;
        self.msgr.lock().unwrap().disconnect();
        Ok(())
    }
}

fn decode_u16(payload: &[u8]) -> Result<u16> {
    if payload.len() < 2 {
        return Err(Error::protocol("ACK payload too short"));
    }
    Ok(u16::from_le_bytes([payload[0], payload[1]]))
}

/// A task that forwards the pull/push contract to a peer engine. Setup
/// ships the sub-pipeline description; every requisition uploads the input
/// tuple, and every process call downloads one result.
pub struct RemoteTask {
    kind: MessageType,
    description: String,
    remote: Option<Arc<RemoteNode>>,
    n_inputs: usize,
    in_dims: Vec<u16>,
}

impl RemoteTask {
    pub fn new(kind: MessageType, description: String) -> Self {
        RemoteTask {
            kind,
            description,
            remote: None,
            n_inputs: 1,
            in_dims: vec![2],
        }
    }

    fn remote(&self) -> Result<&Arc<RemoteNode>> {
        self.remote
            .as_ref()
            .ok_or_else(|| Error::fatal("remote task used before setup"))
    }
}

impl Task for RemoteTask {
    fn num_inputs(&self) -> usize {
        self.n_inputs
    }

    fn num_dimensions(&self, input: usize) -> usize {
        self.in_dims.get(input).copied().unwrap_or(2) as usize
    }

    fn mode(&self) -> TaskMode {
        TaskMode::PROCESSOR | TaskMode::CPU
    }

    fn setup(&mut self, _resources: &Arc<Resources>, proc: &ProcNode) -> Result<()> {
        let node = match proc {
            ProcNode::Remote { node } => Arc::clone(node),
            _ => return Err(Error::setup("remote", "not bound to a remote process-node")),
        };

        let devices = node.num_devices()?;
        debug!("peer {} exposes {} device(s)", node.addr(), devices);

        node.send_graph(self.kind, &self.description)?;
        let (n_inputs, in_dims) = node.structure()?;
        self.n_inputs = n_inputs as usize;
        self.in_dims = in_dims;
        self.remote = Some(node);
        Ok(())
    }

    fn get_requisition(&mut self, inputs: &mut [&mut Buffer]) -> Result<Requisition> {
        let remote = self.remote()?;
        remote.send_inputs(inputs)?;
        remote.requisition()
    }

    fn process(
        &mut self,
        _inputs: &mut [&mut Buffer],
        output: &mut Buffer,
        _req: &Requisition,
    ) -> Result<bool> {
        self.remote()?.result_into(output)?;
        Ok(true)
    }

    fn copy_task(&self) -> Box<dyn Task> {
        Box::new(RemoteTask::new(self.kind, self.description.clone()))
    }
}
