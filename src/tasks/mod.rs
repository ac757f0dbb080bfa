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

//! The engine's own task types: the shims bridging external producers and
//! consumers into the in-graph protocol (input, output, copy, dummy) and a
//! small set of built-in streaming tasks used by pipelines and tests.

pub mod average;
pub mod copy;
pub mod dummy;
pub mod duplicate;
pub mod generate;
pub mod input;
pub mod loop_task;
pub mod null;
pub mod output;
pub mod sleep;
pub mod subtract;
pub mod sum;

pub use average::AverageTask;
pub use copy::CopyTask;
pub use dummy::DummyTask;
pub use duplicate::DuplicateTask;
pub use generate::DummyDataTask;
pub use input::{InputController, InputTask};
pub use loop_task::LoopTask;
pub use null::NullTask;
pub use output::{OutputReceiver, OutputTask};
pub use sleep::SleepTask;
pub use subtract::SubtractTask;
pub use sum::SumTask;
