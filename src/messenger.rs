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

//! The request/reply transport between engines. Each frame is a fixed
//! little-endian header `{type: u16, size: u64}` followed by `size` payload
//! bytes. The client strictly alternates send/receive; the server answers
//! every request with exactly one reply.

use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
};
use bytes::{Buf, BufMut, BytesMut};
use crate::{
    buffer::{Buffer, Requisition, MAX_DIMS},
    error::{Error, Result},
};

/// Frames larger than this are treated as protocol corruption.
const MAX_PAYLOAD: u64 = 1 << 30;

const HEADER_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    StreamJson = 0,
    ReplicateJson,
    GetNumDevices,
    GetNumCpus,
    GetStructure,
    Structure,
    GetRequisition,
    Requisition,
    SendInputs,
    GetResult,
    Result,
    Cleanup,
    Terminate,
    Ack,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Result<Self> {
        Ok(match value {
            0 => MessageType::StreamJson,
            1 => MessageType::ReplicateJson,
            2 => MessageType::GetNumDevices,
            3 => MessageType::GetNumCpus,
            4 => MessageType::GetStructure,
            5 => MessageType::Structure,
            6 => MessageType::GetRequisition,
            7 => MessageType::Requisition,
            8 => MessageType::SendInputs,
            9 => MessageType::GetResult,
            10 => MessageType::Result,
            11 => MessageType::Cleanup,
            12 => MessageType::Terminate,
            13 => MessageType::Ack,
            other => return Err(Error::protocol(format!("unknown message type {}", other))),
        })
    }
}

#[derive(Debug)]
pub struct Message {
    pub ty: MessageType,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(ty: MessageType) -> Self {
        Message { ty, payload: Vec::new() }
    }

    pub fn with_payload(ty: MessageType, payload: Vec<u8>) -> Self {
        Message { ty, payload }
    }

    /// The conventional tiny-status reply: an ACK carrying one u16.
    pub fn ack_u16(value: u16) -> Self {
        Message { ty: MessageType::Ack, payload: value.to_le_bytes().to_vec() }
    }

    pub fn expect(self, ty: MessageType) -> Result<Message> {
        if self.ty != ty {
            return Err(Error::protocol(format!(
                "expected {:?}, peer sent {:?}",
                ty, self.ty
            )));
        }
        Ok(self)
    }
}

/// Read exactly `len` bytes, or `None` when the stream is already at EOF.
/// A partial read is a protocol error (disconnect mid-frame).
fn read_bytes_next<S: Read>(src: &mut S, len: usize) -> Result<Option<BytesMut>> {
    let mut buf = Vec::with_capacity(len);
    src.take(len as u64).read_to_end(&mut buf)?;
    match buf.len() {
        0 if len > 0 => Ok(None),
        l if l == len => Ok(Some(buf[..].into())),
        _ => Err(Error::protocol("connection closed mid-frame")),
    }
}

pub fn read_frame<S: Read>(src: &mut S) -> Result<Option<Message>> {
    let mut header = match read_bytes_next(src, HEADER_SIZE)? {
        None => return Ok(None),
        Some(header) => header,
    };

    let ty = MessageType::from_u16(header.get_u16_le())?;
    let size = header.get_u64_le();
    if size > MAX_PAYLOAD {
        return Err(Error::protocol(format!("frame of {} bytes exceeds the cap", size)));
    }

    let payload = match size {
        0 => Vec::new(),
        size => read_bytes_next(src, size as usize)?
            .ok_or_else(|| Error::protocol("connection closed mid-frame"))?
            .to_vec(),
    };

    Ok(Some(Message { ty, payload }))
}

pub fn write_frame<S: Write>(dst: &mut S, msg: &Message) -> Result<()> {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + msg.payload.len());
    buf.put_u16_le(msg.ty as u16);
    buf.put_u64_le(msg.payload.len() as u64);
    buf.put_slice(&msg.payload);
    dst.write_all(&buf)?;
    dst.flush()?;
    Ok(())
}

/// Shape header on the wire: `n_dims: u16`, then `n_dims` u64 dimensions.
pub fn put_requisition(buf: &mut BytesMut, req: &Requisition) {
    buf.put_u16_le(req.n_dims as u16);
    for &dim in req.as_slice() {
        buf.put_u64_le(dim as u64);
    }
}

pub fn get_requisition(buf: &mut impl Buf) -> Result<Requisition> {
    if buf.remaining() < 2 {
        return Err(Error::protocol("truncated shape header"));
    }
    let n_dims = buf.get_u16_le() as usize;
    if n_dims > MAX_DIMS {
        return Err(Error::protocol(format!("{}-dimensional shape on the wire", n_dims)));
    }
    if buf.remaining() < n_dims * 8 {
        return Err(Error::protocol("truncated shape header"));
    }
    let mut dims = [0usize; MAX_DIMS];
    for dim in dims.iter_mut().take(n_dims) {
        *dim = buf.get_u64_le() as usize;
    }
    Ok(Requisition { n_dims, dims })
}

/// Shape header followed by the raw float32 payload, little-endian.
pub fn put_buffer(buf: &mut BytesMut, buffer: &mut Buffer) -> Result<()> {
    let req = buffer.get_requisition();
    put_requisition(buf, &req);
    buf.reserve(req.n_bytes());
    for &sample in buffer.get_host_array()?.iter() {
        buf.put_f32_le(sample);
    }
    Ok(())
}

pub fn get_buffer_into(buf: &mut impl Buf, buffer: &mut Buffer) -> Result<()> {
    let req = get_requisition(buf)?;
    if buf.remaining() < req.n_bytes() {
        return Err(Error::protocol("buffer payload shorter than its shape"));
    }
    buffer.resize(&req);
    buffer.discard_location();
    let host = buffer.get_host_array()?;
    for sample in host.iter_mut() {
        *sample = buf.get_f32_le();
    }
    Ok(())
}

pub fn get_buffer(buf: &mut impl Buf) -> Result<Buffer> {
    let mut peeked = buf.chunk();
    let req = get_requisition(&mut peeked)?;
    let mut buffer = Buffer::new(&req);
    get_buffer_into(buf, &mut buffer)?;
    Ok(buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The blocking request/reply endpoint the engine talks through. One
/// in-flight request per connection.
pub trait Messenger: Send {
    /// Send a request and block for the peer's reply.
    fn send_blocking(&mut self, request: &Message) -> Result<Message>;

    /// Block for the next request; `None` on clean disconnect.
    fn recv_blocking(&mut self) -> Result<Option<Message>>;

    /// Answer the request obtained from `recv_blocking`.
    fn send_reply(&mut self, reply: &Message) -> Result<()>;

    fn disconnect(&mut self);
}

/// Split `tcp://host:port` into `host:port`; other schemes are recognized
/// but not compiled into this build.
pub fn parse_addr(addr: &str) -> Result<String> {
    if let Some(rest) = addr.strip_prefix("tcp://") {
        return Ok(rest.to_string());
    }
    for scheme in ["mpi://", "kiro://"] {
        if addr.starts_with(scheme) {
            return Err(Error::protocol(format!(
                "scheme `{}` is not compiled into this build",
                scheme.trim_end_matches("//")
            )));
        }
    }
    Err(Error::protocol(format!("address `{}` has no known scheme", addr)))
}

/// Open a messenger endpoint. Clients connect out; the server role binds the
/// address and accepts a single peer.
pub fn connect(addr: &str, role: Role) -> Result<Box<dyn Messenger>> {
    let hostport = parse_addr(addr)?;
    let stream = match role {
        Role::Client => TcpStream::connect(&hostport)?,
        Role::Server => {
            let listener = TcpListener::bind(&hostport)?;
            listener.accept()?.0
        }
    };
    Ok(Box::new(TcpMessenger::new(stream)?))
}

pub struct TcpMessenger {
    stream: TcpStream,
}

impl TcpMessenger {
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(TcpMessenger { stream })
    }
}

impl Messenger for TcpMessenger {
    fn send_blocking(&mut self, request: &Message) -> Result<Message> {
        write_frame(&mut self.stream, request)?;
        read_frame(&mut self.stream)?
            .ok_or_else(|| Error::protocol("peer closed the connection before replying"))
    }

    fn recv_blocking(&mut self) -> Result<Option<Message>> {
        read_frame(&mut self.stream)
    }

    fn send_reply(&mut self, reply: &Message) -> Result<()> {
        write_frame(&mut self.stream, reply)
    }

    fn disconnect(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_frame_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let msg = Message::with_payload(MessageType::StreamJson, b"{\"nodes\":[]}".to_vec());
            write_frame(&mut stream, &msg).unwrap();
        });

        let (mut stream, _) = listener.accept().unwrap();
        let msg = read_frame(&mut stream).unwrap().unwrap();
        assert_eq!(msg.ty, MessageType::StreamJson);
        assert_eq!(msg.payload, b"{\"nodes\":[]}");

        // Clean disconnect reads as None, not as an error.
        client.join().unwrap();
        assert!(read_frame(&mut stream).unwrap().is_none());
    }

    #[test]
    fn test_requisition_codec() {
        let req = Requisition::new(&[640, 480]);
        let mut buf = BytesMut::new();
        put_requisition(&mut buf, &req);

        let mut bytes = &buf[..];
        assert_eq!(get_requisition(&mut bytes).unwrap(), req);
    }

    #[test]
    fn test_buffer_codec() {
        let req = Requisition::d1(4);
        let mut src = Buffer::new(&req);
        src.get_host_array().unwrap().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);

        let mut buf = BytesMut::new();
        put_buffer(&mut buf, &mut src).unwrap();

        let mut bytes = &buf[..];
        let mut dst = get_buffer(&mut bytes).unwrap();
        assert_eq!(dst.get_host_array().unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_scheme_parsing() {
        assert_eq!(parse_addr("tcp://127.0.0.1:5555").unwrap(), "127.0.0.1:5555");
        assert!(parse_addr("mpi://0").is_err());
        assert!(parse_addr("nothing").is_err());
    }
}
