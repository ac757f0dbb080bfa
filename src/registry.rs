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

use std::collections::HashMap;
use crate::{
    error::{Error, Result},
    task::{Task, TaskNode},
    tasks,
};

pub type TaskConstructor = fn() -> Box<dyn Task>;

/// Maps plugin names to fresh task instances. Populated once, then
/// read-only; the JSON loader resolves every node name through it.
/// Discovery of out-of-tree plugins happens elsewhere and registers here.
pub struct PluginRegistry {
    constructors: HashMap<String, TaskConstructor>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_basics()
    }
}

impl PluginRegistry {
    pub fn empty() -> Self {
        PluginRegistry { constructors: HashMap::new() }
    }

    /// A registry holding the engine's built-in tasks.
    pub fn with_basics() -> Self {
        let mut registry = PluginRegistry::empty();
        registry.register("dummy-data", || Box::<tasks::DummyDataTask>::default());
        registry.register("null", || Box::new(tasks::NullTask::new()));
        registry.register("copy", || Box::<tasks::CopyTask>::default());
        registry.register("dummy", || Box::<tasks::DummyTask>::default());
        registry.register("loop", || Box::<tasks::LoopTask>::default());
        registry.register("average", || Box::new(tasks::AverageTask::new()));
        registry.register("sum", || Box::<tasks::SumTask>::default());
        registry.register("subtract", || Box::<tasks::SubtractTask>::default());
        registry.register("duplicate", || Box::new(tasks::DuplicateTask::new()));
        registry.register("sleep", || Box::<tasks::SleepTask>::default());
        registry
    }

    pub fn register<S: Into<String>>(&mut self, name: S, constructor: TaskConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(|name| name.as_str())
    }

    pub fn new_task(&self, name: &str) -> Result<Box<dyn Task>> {
        match self.constructors.get(name) {
            Some(constructor) => Ok(constructor()),
            None => Err(Error::graph(format!("no task registered as `{}`", name))),
        }
    }

    /// A graph node wrapping a fresh instance, labeled with the plugin name.
    pub fn new_node(&self, name: &str) -> Result<TaskNode> {
        Ok(TaskNode::new(name, self.new_task(name)?))
    }
}
