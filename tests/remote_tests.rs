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

mod helpers;

use std::{sync::Arc, time::Duration};
use ufo_engine::{
    buffer::{Buffer, Requisition},
    daemon::Daemon,
    graph::TaskGraph,
    registry::PluginRegistry,
    remote::RemoteNode,
    sched::{RemoteMode, Scheduler, SchedulerConfig},
    task::TaskNode,
    tasks::{DummyDataTask, OutputTask},
    Resources,
};
use crate::helpers::first_sample;

const POP_TIMEOUT: Duration = Duration::from_secs(5);

fn spawn_daemon() -> (Daemon, String) {
    let mut daemon = Daemon::new(
        "tcp://127.0.0.1:0",
        Arc::new(PluginRegistry::with_basics()),
        Arc::new(Resources::host_only()),
    );
    let bound = daemon.start().expect("daemon failed to start");
    (daemon, format!("tcp://{}", bound))
}

/// dummy-data -> copy -> output, collected as sorted first-samples.
fn run_pipeline(remote: Option<Arc<RemoteNode>>, frames: usize) -> Vec<f32> {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(TaskNode::new(
        "dummy-data",
        Box::new(DummyDataTask::new(8, 8, frames)),
    ));
    let copy = graph.add_node(registry.new_node("copy").unwrap());
    graph.connect(gen, copy, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(copy, sink, 0).unwrap();

    let config = SchedulerConfig { remote_mode: RemoteMode::Stream, ..Default::default() };
    let mut scheduler = Scheduler::new(config, Arc::new(Resources::host_only()));
    if let Some(node) = remote {
        scheduler.add_remote(node);
    }
    scheduler.run(&mut graph).unwrap();

    let mut samples: Vec<f32> = (0..frames)
        .map(|_| {
            let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
            let sample = first_sample(&mut buffer);
            receiver.put_back(buffer);
            sample
        })
        .collect();
    assert!(receiver.try_pop().is_none());
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    samples
}

#[test]
fn test_remote_node_protocol_cycle() {
    let (mut daemon, addr) = spawn_daemon();
    let remote = RemoteNode::connect(&addr).unwrap();

    assert_eq!(remote.num_devices().unwrap(), 0);
    assert!(remote.num_cpus().unwrap() > 0);

    let description = r#"{ "nodes": [ {"name": "copy"} ], "edges": [] }"#;
    remote
        .send_graph(ufo_engine::messenger::MessageType::StreamJson, description)
        .unwrap();

    let (n_inputs, in_dims) = remote.structure().unwrap();
    assert_eq!(n_inputs, 1);
    assert_eq!(in_dims, vec![2]);

    let req = Requisition::d2(4, 4);
    let mut input = Buffer::new(&req);
    input
        .get_host_array()
        .unwrap()
        .iter_mut()
        .enumerate()
        .for_each(|(i, s)| *s = i as f32);

    remote.send_inputs(&mut [&mut input]).unwrap();
    assert_eq!(remote.requisition().unwrap(), req);

    let mut result = Buffer::new(&req);
    remote.result_into(&mut result).unwrap();
    assert_eq!(result.get_host_array().unwrap(), input.get_host_array().unwrap());

    remote.cleanup().unwrap();
    remote.terminate().unwrap();
    daemon.stop();
}

#[test]
fn test_remote_transparency() {
    let frames = 20;
    let local = run_pipeline(None, frames);

    let (mut daemon, addr) = spawn_daemon();
    let remote = Arc::new(RemoteNode::connect(&addr).unwrap());
    let remoted = run_pipeline(Some(remote), frames);
    daemon.stop();

    // Same multiset of frames, whether or not a peer took a share.
    assert_eq!(local, remoted);
    assert_eq!(local, (0..frames).map(|k| k as f32).collect::<Vec<_>>());
}

#[test]
fn test_replicate_ships_whole_graph() {
    let (mut daemon, addr) = spawn_daemon();

    {
        let registry = PluginRegistry::with_basics();
        let mut graph = TaskGraph::new();

        let mut gen_node = registry.new_node("dummy-data").unwrap();
        gen_node.set_parameter("width", ufo_engine::Value::Int(4)).unwrap();
        gen_node.set_parameter("height", ufo_engine::Value::Int(4)).unwrap();
        gen_node.set_parameter("number", ufo_engine::Value::Int(3)).unwrap();
        let gen = graph.add_node(gen_node);
        let null = graph.add_node(registry.new_node("null").unwrap());
        graph.connect(gen, null, 0).unwrap();

        let config = SchedulerConfig { remote_mode: RemoteMode::Replicate, ..Default::default() };
        let mut scheduler = Scheduler::new(config, Arc::new(Resources::host_only()));
        scheduler.add_remote(Arc::new(RemoteNode::connect(&addr).unwrap()));

        // The peer acknowledged the replicated graph and runs its own copy;
        // the local run is unaffected.
        scheduler.run(&mut graph).unwrap();
    }

    daemon.stop();
}

#[test]
fn test_second_client_after_terminate() {
    let (mut daemon, addr) = spawn_daemon();

    for _ in 0..2 {
        let remote = RemoteNode::connect(&addr).unwrap();
        assert_eq!(remote.num_devices().unwrap(), 0);
        remote.terminate().unwrap();
    }

    daemon.stop();
}
