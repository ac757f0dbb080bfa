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

use std::{
    collections::HashMap,
    fmt,
    sync::Weak,
};
use crate::{
    error::{Error, Result},
    pool::PoolInner,
    resources::{ComputeDevice, DeviceArray},
};

pub const MAX_DIMS: usize = 3;

/// A shape request: the dimensions of the next buffer a task wants to write.
/// Buffers acquired from a pool are resized to match before the task sees
/// them. Sinks report an empty requisition (`n_dims == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Requisition {
    pub n_dims: usize,
    pub dims: [usize; MAX_DIMS],
}

impl Requisition {
    pub fn new(dims: &[usize]) -> Self {
        assert!(dims.len() <= MAX_DIMS, "at most {} dimensions", MAX_DIMS);
        let mut req = Requisition { n_dims: dims.len(), dims: [0; MAX_DIMS] };
        req.dims[..dims.len()].copy_from_slice(dims);
        req
    }

    pub fn d1(n: usize) -> Self {
        Self::new(&[n])
    }

    pub fn d2(width: usize, height: usize) -> Self {
        Self::new(&[width, height])
    }

    pub fn none() -> Self {
        Requisition::default()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.dims[..self.n_dims]
    }

    /// Number of float32 elements this shape holds.
    pub fn size(&self) -> usize {
        if self.n_dims == 0 {
            return 0;
        }
        self.as_slice().iter().product()
    }

    pub fn n_bytes(&self) -> usize {
        self.size() * std::mem::size_of::<f32>()
    }
}

impl fmt::Display for Requisition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dims: Vec<String> = self.as_slice().iter().map(|d| d.to_string()).collect();
        write!(f, "({})", dims.join("x"))
    }
}

/// Which copy of the data is authoritative. At most one location is valid at
/// a time; all other representations are stale until the next migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// No authoritative copy exists yet.
    Invalid,
    /// The float32 array on the CPU heap is authoritative.
    Host,
    /// The memory object on the given device is authoritative.
    Device(usize),
    /// The 2D image object on the given device is authoritative.
    DeviceImage(usize),
}

/// Integer depth of foreign data that can be reinterpreted into float32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    U8,
    U16,
}

/// A typed scalar attached to buffers as metadata and to tasks as parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    pub fn as_usize(&self) -> Option<usize> {
        match *self {
            Value::Int(i) if i >= 0 => Some(i as usize),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match *self {
            Value::Int(i) => Some(i as f32),
            Value::Float(f) => Some(f as f32),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Per-device cached memory objects. Created lazily on first access and
/// reused; stale copies are tolerated because `location` decides which
/// representation is authoritative.
#[derive(Default)]
struct Residency {
    array: Option<Box<dyn DeviceArray>>,
    image: Option<Box<dyn DeviceArray>>,
}

/// A dense float32 array of up to three dimensions that migrates lazily
/// between host memory and device memory. Data moves only on the edges of a
/// location change: asking for the host array while the data lives on a
/// device triggers exactly one download, and vice versa.
pub struct Buffer {
    req: Requisition,
    host: Vec<f32>,
    location: Location,
    residency: Vec<Residency>,
    metadata: HashMap<String, Value>,
    pool: Option<Weak<PoolInner>>,
}

impl Buffer {
    pub fn new(req: &Requisition) -> Self {
        Buffer {
            req: *req,
            host: vec![0.0; req.size()],
            location: Location::Invalid,
            residency: Vec::new(),
            metadata: HashMap::new(),
            pool: None,
        }
    }

    pub(crate) fn with_pool(req: &Requisition, pool: Weak<PoolInner>) -> Self {
        let mut buffer = Buffer::new(req);
        buffer.pool = Some(pool);
        buffer
    }

    /// A new buffer with the same shape, sharing no storage or content.
    pub fn dup(src: &Buffer) -> Buffer {
        Buffer::new(&src.req)
    }

    pub fn get_requisition(&self) -> Requisition {
        self.req
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn size(&self) -> usize {
        self.req.size()
    }

    /// Whether this buffer's shape matches `req` exactly.
    pub fn cmp_dimensions(&self, req: &Requisition) -> bool {
        self.req == *req
    }

    /// Change the shape. The backing storage is kept when the new byte size
    /// fits into the old allocation and reallocated otherwise. Device copies
    /// are dropped; a host-resident buffer stays host-resident.
    pub fn resize(&mut self, req: &Requisition) {
        if *req == self.req {
            return;
        }
        self.req = *req;
        self.host.resize(req.size(), 0.0);
        self.residency.clear();
        if !matches!(self.location, Location::Host) {
            self.location = Location::Invalid;
        }
    }

    /// Re-mark the buffer as holding no authoritative data, skipping any
    /// migration. Producers that overwrite the whole buffer call this first.
    pub fn discard_location(&mut self) {
        self.location = Location::Invalid;
    }

    fn ensure_host(&mut self) -> Result<()> {
        match self.location {
            Location::Host | Location::Invalid => {}
            Location::Device(d) => {
                let entry = self
                    .residency
                    .get(d)
                    .and_then(|r| r.array.as_ref())
                    .ok_or_else(|| Error::fatal("device location without device array"))?;
                entry.read(&mut self.host)?;
            }
            Location::DeviceImage(d) => {
                let entry = self
                    .residency
                    .get(d)
                    .and_then(|r| r.image.as_ref())
                    .ok_or_else(|| Error::fatal("image location without device image"))?;
                entry.read(&mut self.host)?;
            }
        }
        self.location = Location::Host;
        Ok(())
    }

    /// Migrate to `HOST` if needed and hand out the float32 array. The caller
    /// may read and write it until a device accessor is called.
    pub fn get_host_array(&mut self) -> Result<&mut [f32]> {
        self.ensure_host()?;
        Ok(&mut self.host)
    }

    fn residency_mut(&mut self, index: usize) -> &mut Residency {
        if self.residency.len() <= index {
            self.residency.resize_with(index + 1, Residency::default);
        }
        &mut self.residency[index]
    }

    /// Migrate to `DEVICE(d)` and return the memory object bound to the
    /// device behind `dev`. A buffer that currently lives on another device
    /// takes the path device -> host -> device.
    pub fn get_device_array(&mut self, dev: &dyn ComputeDevice) -> Result<&mut dyn DeviceArray> {
        let index = dev.index();

        if self.location != Location::Device(index) {
            // Migrating from a foreign device or an image goes through the host.
            let upload = match self.location {
                Location::Invalid => false,
                _ => {
                    self.ensure_host()?;
                    true
                }
            };

            let size = self.req.size();
            let entry = self.residency_mut(index);
            if entry.array.as_ref().map(|a| a.len()) != Some(size) {
                entry.array = Some(dev.alloc_array(size)?);
            }
            if upload {
                let host = &self.host;
                let array = self.residency[index].array.as_mut().unwrap();
                array.write(host)?;
            }
            self.location = Location::Device(index);
        }

        Ok(self.residency[index].array.as_mut().unwrap().as_mut())
    }

    /// Migrate to `DEVICE_IMAGE(d)`. Only defined for two-dimensional shapes.
    pub fn get_device_image(&mut self, dev: &dyn ComputeDevice) -> Result<&mut dyn DeviceArray> {
        if self.req.n_dims != 2 {
            return Err(Error::resource(format!(
                "cannot create a 2D image for a {}-dimensional buffer",
                self.req.n_dims
            )));
        }
        let index = dev.index();

        if self.location != Location::DeviceImage(index) {
            let upload = match self.location {
                Location::Invalid => false,
                _ => {
                    self.ensure_host()?;
                    true
                }
            };

            let (width, height) = (self.req.dims[0], self.req.dims[1]);
            let entry = self.residency_mut(index);
            if entry.image.as_ref().map(|i| i.len()) != Some(width * height) {
                entry.image = Some(dev.alloc_image(width, height)?);
            }
            if upload {
                let host = &self.host;
                let image = self.residency[index].image.as_mut().unwrap();
                image.write(host)?;
            }
            self.location = Location::DeviceImage(index);
        }

        Ok(self.residency[index].image.as_mut().unwrap().as_mut())
    }

    /// Make `dst` bit-equal to `src`, preferring the cheapest path: a
    /// device-side copy when both already live on the same device, otherwise
    /// host-to-host with migration on both ends.
    pub fn copy(src: &mut Buffer, dst: &mut Buffer) -> Result<()> {
        dst.resize(&src.req);

        if let (Location::Device(a), Location::Device(b)) = (src.location, dst.location) {
            if a == b {
                let src_array = src
                    .residency
                    .get(a)
                    .and_then(|r| r.array.as_ref())
                    .ok_or_else(|| Error::fatal("device location without device array"))?;
                let dst_array = dst
                    .residency
                    .get_mut(b)
                    .and_then(|r| r.array.as_mut())
                    .ok_or_else(|| Error::fatal("device location without device array"))?;
                if dst_array.len() == src_array.len() {
                    src_array.copy_into(dst_array.as_mut())?;
                    return Ok(());
                }
            }
        }

        src.ensure_host()?;
        dst.host.copy_from_slice(&src.host);
        dst.location = Location::Host;
        Ok(())
    }

    /// Reinterpret the first `size()` samples of the host storage, stored as
    /// unsigned integers of the given depth, into float32 in place. The
    /// expansion iterates from the end so it never overwrites unread source
    /// samples.
    pub fn convert(&mut self, depth: Depth) -> Result<()> {
        self.ensure_host()?;
        let n = self.req.size();

        match depth {
            Depth::U8 => {
                for i in (0..n).rev() {
                    let word = self.host[i / 4].to_bits();
                    let sample = ((word >> ((i % 4) * 8)) & 0xff) as u8;
                    self.host[i] = sample as f32;
                }
            }
            Depth::U16 => {
                for i in (0..n).rev() {
                    let word = self.host[i / 2].to_bits();
                    let sample = ((word >> ((i % 2) * 16)) & 0xffff) as u16;
                    self.host[i] = sample as f32;
                }
            }
        }

        Ok(())
    }

    /// Fill the buffer from a foreign byte payload of the given depth.
    /// 16-bit samples are little-endian.
    pub fn convert_from_data(&mut self, data: &[u8], depth: Depth) -> Result<()> {
        let n = self.req.size();
        let needed = match depth {
            Depth::U8 => n,
            Depth::U16 => n * 2,
        };
        if data.len() < needed {
            return Err(Error::resource(format!(
                "conversion source holds {} bytes, buffer needs {}",
                data.len(),
                needed
            )));
        }

        match depth {
            Depth::U8 => {
                for i in 0..n {
                    self.host[i] = data[i] as f32;
                }
            }
            Depth::U16 => {
                for i in 0..n {
                    let sample = u16::from_le_bytes([data[2 * i], data[2 * i + 1]]);
                    self.host[i] = sample as f32;
                }
            }
        }

        self.location = Location::Host;
        Ok(())
    }

    pub fn set_metadata<K: Into<String>>(&mut self, key: K, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn copy_metadata(src: &Buffer, dst: &mut Buffer) {
        for (key, value) in &src.metadata {
            dst.metadata.insert(key.clone(), value.clone());
        }
    }

    pub fn metadata_keys(&self) -> impl Iterator<Item = &str> {
        self.metadata.keys().map(|k| k.as_str())
    }

    /// Hand the buffer back to the pool that minted it, or drop it if it was
    /// created standalone or the pool is already gone.
    pub fn release(self) {
        if let Some(weak) = self.pool.clone() {
            if let Some(pool) = weak.upgrade() {
                PoolInner::put_back(&pool, self);
            }
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("req", &self.req)
            .field("location", &self.location)
            .finish()
    }
}
