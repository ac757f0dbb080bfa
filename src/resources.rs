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

//! The boundary between the engine and whatever computes. The engine never
//! names a concrete backend: buffers migrate through `DeviceArray`, tasks
//! compile kernels through `ComputeDevice`, and the scheduler only counts
//! devices and binds tasks to them. The real OpenCL backend lives in
//! `opencl.rs` behind the `opencl` cargo feature; `FakeDevice` keeps the
//! whole migration and expansion machinery testable without a GPU.

use std::{
    any::Any,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use crate::error::{Error, Result};

/// A memory object resident on one compute device. Implementations carry
/// their own command queue, so transfers need no extra handle.
pub trait DeviceArray: Send {
    /// Number of float32 elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocking upload of host data into this object.
    fn write(&mut self, data: &[f32]) -> Result<()>;

    /// Blocking download into `out`. `out.len()` must equal `len()`.
    fn read(&self, out: &mut [f32]) -> Result<()>;

    /// Device-side copy into another object on the same device.
    fn copy_into(&self, dst: &mut dyn DeviceArray) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A compiled kernel. Argument binding is positional; launches are enqueued
/// on the owning device's queue.
pub trait Kernel: Send {
    fn launch(&mut self, global_size: &[usize], args: &mut [KernelArg]) -> Result<()>;
}

pub enum KernelArg<'a> {
    Array(&'a mut dyn DeviceArray),
    Float(f32),
    Int(i32),
}

/// One compute device together with its command queue. Owned exclusively by
/// the GPU process-node a task is bound to.
pub trait ComputeDevice: Send + Sync {
    /// Position of this device in the `Resources` device list. Buffers key
    /// their per-device residency by this index.
    fn index(&self) -> usize;

    fn name(&self) -> String;

    fn alloc_array(&self, len: usize) -> Result<Box<dyn DeviceArray>>;

    fn alloc_image(&self, width: usize, height: usize) -> Result<Box<dyn DeviceArray>>;

    fn build_kernel(&self, source: &str, entry: &str, options: &str) -> Result<Box<dyn Kernel>>;

    /// Block until all enqueued work on this device's queue has finished.
    fn finish(&self) -> Result<()>;
}

#[derive(Hash, PartialEq, Eq)]
struct KernelKey {
    device: usize,
    source: String,
    entry: String,
    options: String,
}

/// The explicit value holding everything tasks share: the device list, the
/// kernel cache, and the search paths for kernel sources. Passed into the
/// scheduler so tests can substitute fakes and engines can coexist.
pub struct Resources {
    devices: Vec<Arc<dyn ComputeDevice>>,
    kernel_paths: Vec<PathBuf>,
    cache: Mutex<HashMap<KernelKey, Arc<Mutex<Box<dyn Kernel>>>>>,
}

impl Resources {
    /// Resources without any compute device. Every task runs on CPU nodes
    /// and buffers never leave host memory.
    pub fn host_only() -> Self {
        Resources::with_devices(Vec::new())
    }

    pub fn with_devices(devices: Vec<Arc<dyn ComputeDevice>>) -> Self {
        Resources {
            devices,
            kernel_paths: Vec::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// `count` host-memory fake devices, for tests and benchmarks.
    pub fn with_fake_devices(count: usize) -> Self {
        let devices = (0..count)
            .map(|index| Arc::new(FakeDevice::new(index)) as Arc<dyn ComputeDevice>)
            .collect();
        Resources::with_devices(devices)
    }

    pub fn add_kernel_path<P: Into<PathBuf>>(&mut self, path: P) {
        self.kernel_paths.push(path.into());
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn device(&self, index: usize) -> Option<&Arc<dyn ComputeDevice>> {
        self.devices.get(index)
    }

    pub fn devices(&self) -> &[Arc<dyn ComputeDevice>] {
        &self.devices
    }

    /// Locate a kernel source file in the registered search paths.
    pub fn load_kernel_source(&self, filename: &str) -> Result<String> {
        for dir in &self.kernel_paths {
            let candidate = dir.join(filename);
            if candidate.exists() {
                return fs::read_to_string(&candidate).map_err(Error::from);
            }
        }
        if Path::new(filename).exists() {
            return fs::read_to_string(filename).map_err(Error::from);
        }
        Err(Error::resource(format!("kernel source `{}` not found", filename)))
    }

    /// A kernel compiled for `dev`, cached by (source, entry point, build
    /// options). Cached kernels are retained until the resources are dropped.
    pub fn cached_kernel(
        &self,
        dev: &Arc<dyn ComputeDevice>,
        source: &str,
        entry: &str,
        options: &str,
    ) -> Result<Arc<Mutex<Box<dyn Kernel>>>> {
        let key = KernelKey {
            device: dev.index(),
            source: source.to_string(),
            entry: entry.to_string(),
            options: options.to_string(),
        };

        let mut cache = self.cache.lock().unwrap();
        if let Some(kernel) = cache.get(&key) {
            return Ok(Arc::clone(kernel));
        }

        let kernel = Arc::new(Mutex::new(dev.build_kernel(source, entry, options)?));
        cache.insert(key, Arc::clone(&kernel));
        Ok(kernel)
    }
}

/// A device whose "memory" is a host vector. Transfers are plain copies;
/// kernels are not supported. Lets the location discipline, the scheduler's
/// GPU mapping and the expansion logic run on machines without OpenCL.
pub struct FakeDevice {
    index: usize,
}

impl FakeDevice {
    pub fn new(index: usize) -> Self {
        FakeDevice { index }
    }
}

impl ComputeDevice for FakeDevice {
    fn index(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        format!("fake-{}", self.index)
    }

    fn alloc_array(&self, len: usize) -> Result<Box<dyn DeviceArray>> {
        Ok(Box::new(FakeArray { data: vec![0.0; len] }))
    }

    fn alloc_image(&self, width: usize, height: usize) -> Result<Box<dyn DeviceArray>> {
        Ok(Box::new(FakeArray { data: vec![0.0; width * height] }))
    }

    fn build_kernel(&self, _source: &str, entry: &str, _options: &str) -> Result<Box<dyn Kernel>> {
        Err(Error::resource(format!(
            "fake device cannot compile kernel `{}`",
            entry
        )))
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

pub struct FakeArray {
    data: Vec<f32>,
}

impl DeviceArray for FakeArray {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn write(&mut self, data: &[f32]) -> Result<()> {
        if data.len() != self.data.len() {
            return Err(Error::resource("upload size mismatch"));
        }
        self.data.copy_from_slice(data);
        Ok(())
    }

    fn read(&self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.data.len() {
            return Err(Error::resource("download size mismatch"));
        }
        out.copy_from_slice(&self.data);
        Ok(())
    }

    fn copy_into(&self, dst: &mut dyn DeviceArray) -> Result<()> {
        match dst.as_any_mut().downcast_mut::<FakeArray>() {
            Some(other) => {
                other.data.copy_from_slice(&self.data);
                Ok(())
            }
            None => Err(Error::resource("device copy between different backends")),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
