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

//! The OpenCL backend: one shared context, one command queue per device.
//! All transfers are enqueued blocking, so device-to-host ordering holds by
//! the time any accessor returns.

use std::{any::Any, sync::Arc};
use ocl::{
    builders::ImageDescriptor,
    enums::{ImageChannelDataType, ImageChannelOrder, MemObjectType},
    Buffer as ClBuffer, Context, Device, Image, Kernel as ClKernel, Platform, Program, Queue,
};
use crate::{
    error::{Error, Result},
    resources::{ComputeDevice, DeviceArray, Kernel, KernelArg, Resources},
};

fn cl_err(err: ocl::Error) -> Error {
    Error::resource(err.to_string())
}

/// Resources backed by every device of the default OpenCL platform.
pub fn opencl_resources() -> Result<Resources> {
    let platform = Platform::default();
    let devices = Device::list_all(platform).map_err(cl_err)?;
    if devices.is_empty() {
        return Err(Error::resource("no OpenCL devices available"));
    }

    let context = Context::builder()
        .platform(platform)
        .devices(&devices[..])
        .build()
        .map_err(cl_err)?;

    let mut list: Vec<Arc<dyn ComputeDevice>> = Vec::with_capacity(devices.len());
    for (index, device) in devices.into_iter().enumerate() {
        let queue = Queue::new(&context, device, None).map_err(cl_err)?;
        list.push(Arc::new(OclDevice {
            index,
            device,
            context: context.clone(),
            queue,
        }));
    }
    Ok(Resources::with_devices(list))
}

pub struct OclDevice {
    index: usize,
    device: Device,
    context: Context,
    queue: Queue,
}

impl ComputeDevice for OclDevice {
    fn index(&self) -> usize {
        self.index
    }

    fn name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| format!("opencl-{}", self.index))
    }

    fn alloc_array(&self, len: usize) -> Result<Box<dyn DeviceArray>> {
        let buffer = ClBuffer::<f32>::builder()
            .queue(self.queue.clone())
            .len(len)
            .build()
            .map_err(cl_err)?;
        Ok(Box::new(OclArray { buffer }))
    }

    fn alloc_image(&self, width: usize, height: usize) -> Result<Box<dyn DeviceArray>> {
        let descriptor = ImageDescriptor::new(
            MemObjectType::Image2d,
            width,
            height,
            1,
            1,
            0,
            0,
            None,
        );
        let image = Image::<f32>::builder()
            .channel_order(ImageChannelOrder::R)
            .channel_data_type(ImageChannelDataType::Float)
            .image_desc(descriptor)
            .queue(self.queue.clone())
            .build(&self.context)
            .map_err(cl_err)?;
        Ok(Box::new(OclImage { image, len: width * height }))
    }

    fn build_kernel(&self, source: &str, entry: &str, options: &str) -> Result<Box<dyn Kernel>> {
        let mut builder = Program::builder();
        builder.src(source).devices(self.device);
        if !options.is_empty() {
            builder.cmplr_opt(options);
        }
        let program = builder.build(&self.context).map_err(cl_err)?;

        Ok(Box::new(OclKernel {
            program,
            entry: entry.to_string(),
            queue: self.queue.clone(),
        }))
    }

    fn finish(&self) -> Result<()> {
        self.queue.finish().map_err(cl_err)
    }
}

pub struct OclArray {
    buffer: ClBuffer<f32>,
}

impl DeviceArray for OclArray {
    fn len(&self) -> usize {
        self.buffer.len()
    }

    fn write(&mut self, data: &[f32]) -> Result<()> {
        self.buffer.write(data).enq().map_err(cl_err)
    }

    fn read(&self, out: &mut [f32]) -> Result<()> {
        self.buffer.read(out).enq().map_err(cl_err)
    }

    fn copy_into(&self, dst: &mut dyn DeviceArray) -> Result<()> {
        match dst.as_any_mut().downcast_mut::<OclArray>() {
            Some(other) => self
                .buffer
                .copy(&other.buffer, None, None)
                .enq()
                .map_err(cl_err),
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

pub struct OclImage {
    image: Image<f32>,
    len: usize,
}

impl DeviceArray for OclImage {
    fn len(&self) -> usize {
        self.len
    }

    fn write(&mut self, data: &[f32]) -> Result<()> {
        self.image.write(data).enq().map_err(cl_err)
    }

    fn read(&self, out: &mut [f32]) -> Result<()> {
        self.image.read(out).enq().map_err(cl_err)
    }

    fn copy_into(&self, _dst: &mut dyn DeviceArray) -> Result<()> {
        // Image-to-image copies take the host path in Buffer::copy.
        Err(Error::resource("image objects do not support device copies"))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub struct OclKernel {
    program: Program,
    entry: String,
    queue: Queue,
}

impl Kernel for OclKernel {
    fn launch(&mut self, global_size: &[usize], args: &mut [KernelArg]) -> Result<()> {
        let mut builder = ClKernel::builder();
        builder
            .program(&self.program)
            .name(&self.entry)
            .queue(self.queue.clone())
            .global_work_size(global_size);

        for arg in args.iter_mut() {
            match arg {
                KernelArg::Array(array) => {
                    let array = array
                        .as_any()
                        .downcast_ref::<OclArray>()
                        .ok_or_else(|| Error::resource("kernel argument from another backend"))?;
                    builder.arg(&array.buffer);
                }
                KernelArg::Float(value) => {
                    builder.arg(*value);
                }
                KernelArg::Int(value) => {
                    builder.arg(*value);
                }
            }
        }

        let kernel = builder.build().map_err(cl_err)?;
        unsafe { kernel.enq().map_err(cl_err) }
    }
}
