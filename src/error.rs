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

use std::io;
use thiserror::Error;

/// Errors surfaced by the engine. The kinds are orthogonal to where they
/// occur: `Graph` during construction, `Setup` during the setup phase,
/// `Resource` from the compute backend, `Io`/`Protocol` from the messenger,
/// `Fatal` for broken internal invariants.
#[derive(Error, Debug)]
pub enum Error {
    /// Graph construction failed: unknown node name, bad edge port, cycle.
    #[error("graph error: {0}")]
    Graph(String),

    /// A task failed to set itself up. Aborts scheduling.
    #[error("setup of task `{task}` failed: {reason}")]
    Setup { task: String, reason: String },

    /// The compute backend rejected an operation.
    #[error("resource error: {0}")]
    Resource(String),

    /// Messenger or file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Unexpected message type, size mismatch, or mid-frame disconnect.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The run was stopped cooperatively. Workers treat this as end-of-stream.
    #[error("canceled")]
    Canceled,

    /// Internal invariant violation. Should never occur in a correct build.
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn graph<S: Into<String>>(msg: S) -> Self {
        Error::Graph(msg.into())
    }

    pub fn setup<S: Into<String>, R: Into<String>>(task: S, reason: R) -> Self {
        Error::Setup { task: task.into(), reason: reason.into() }
    }

    pub fn resource<S: Into<String>>(msg: S) -> Self {
        Error::Resource(msg.into())
    }

    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn fatal<S: Into<String>>(msg: S) -> Self {
        Error::Fatal(msg.into())
    }
}
