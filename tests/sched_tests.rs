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

use std::{
    sync::Arc,
    thread,
    time::Duration,
};
use ufo_engine::{
    buffer::Value,
    error::Error,
    graph::TaskGraph,
    registry::PluginRegistry,
    sched::{Scheduler, SchedulerConfig},
    task::TaskNode,
    tasks::{DummyDataTask, LoopTask, NullTask, OutputTask, SumTask},
    Resources,
};
use crate::helpers::{first_sample, BrokenSetupTask, ExplodingTask, GpuScaleTask};

const POP_TIMEOUT: Duration = Duration::from_secs(5);

fn host_scheduler() -> Scheduler {
    Scheduler::new(SchedulerConfig::default(), Arc::new(Resources::host_only()))
}

fn generator(width: usize, height: usize, number: usize) -> TaskNode {
    TaskNode::new("dummy-data", Box::new(DummyDataTask::new(width, height, number)))
}

#[test]
fn test_single_branch_sanity() {
    let mut graph = TaskGraph::new();
    let gen = graph.add_node(generator(256, 256, 100));

    let null = NullTask::new();
    let counter = null.counter();
    let sink = graph.add_node(TaskNode::new("null", Box::new(null)));
    graph.connect(gen, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 100);
}

#[test]
fn test_output_stream_is_ordered() {
    let mut graph = TaskGraph::new();
    let gen = graph.add_node(generator(4, 4, 3));

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(gen, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    for expected in 0..3 {
        let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
        assert_eq!(first_sample(&mut buffer), expected as f32);
        assert_eq!(buffer.size(), 16);
        receiver.put_back(buffer);
    }
    assert!(receiver.try_pop().is_none());
}

#[test]
fn test_fan_in_sums_every_port() {
    for n in 1..=4usize {
        let mut graph = TaskGraph::new();

        let sum = graph.add_node(TaskNode::new("sum", Box::new(SumTask::new(n))));
        for port in 0..n {
            let gen = graph.add_node(generator(16, 16, 5));
            graph.connect(gen, sum, port as u32).unwrap();
        }

        let (output, receiver) = OutputTask::create();
        let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
        graph.connect(sum, sink, 0).unwrap();

        host_scheduler().run(&mut graph).unwrap();

        // Frame k of every generator is filled with k, so the sum is n * k.
        for k in 0..5 {
            let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
            let host = buffer.get_host_array().unwrap();
            assert!(host.iter().all(|&s| s == (n * k) as f32));
            receiver.put_back(buffer);
        }
    }
}

#[test]
fn test_loop_reductor_emits_copies() {
    let mut graph = TaskGraph::new();

    let mut gen_node = generator(8, 8, 1);
    gen_node.set_parameter("value", Value::Float(5.0)).unwrap();
    let gen = graph.add_node(gen_node);

    let looped = graph.add_node(TaskNode::new("loop", Box::new(LoopTask::new(4))));
    graph.connect(gen, looped, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(looped, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    for _ in 0..4 {
        let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing loop output");
        assert!(buffer.get_host_array().unwrap().iter().all(|&s| s == 5.0));
        receiver.put_back(buffer);
    }
    assert!(receiver.try_pop().is_none());
}

#[test]
fn test_average_reduces_at_end_of_stream() {
    let mut graph = TaskGraph::new();
    let gen = graph.add_node(generator(4, 4, 4));

    let average = graph.add_node(
        PluginRegistry::with_basics().new_node("average").unwrap(),
    );
    graph.connect(gen, average, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(average, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    // Frames 0..4 average to 1.5 everywhere, in exactly one output.
    let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing average output");
    assert!(buffer.get_host_array().unwrap().iter().all(|&s| s == 1.5));
    receiver.put_back(buffer);
    assert!(receiver.try_pop().is_none());
}

#[test]
fn test_subtract_pairs_streams() {
    let mut graph = TaskGraph::new();

    let mut minuend = generator(4, 4, 6);
    minuend.set_parameter("value", Value::Float(9.0)).unwrap();
    let minuend = graph.add_node(minuend);
    let subtrahend = graph.add_node(generator(4, 4, 6));

    let subtract = graph.add_node(
        PluginRegistry::with_basics().new_node("subtract").unwrap(),
    );
    graph.connect(minuend, subtract, 0).unwrap();
    graph.connect(subtrahend, subtract, 1).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(subtract, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    for k in 0..6 {
        let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
        assert!(buffer.get_host_array().unwrap().iter().all(|&s| s == 9.0 - k as f32));
        receiver.put_back(buffer);
    }
}

#[test]
fn test_duplicate_replays_stream_twice() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(generator(4, 4, 3));
    let duplicate = graph.add_node(registry.new_node("duplicate").unwrap());
    graph.connect(gen, duplicate, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(duplicate, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    for expected in [0.0, 1.0, 2.0, 0.0, 1.0, 2.0] {
        let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
        assert_eq!(first_sample(&mut buffer), expected);
        receiver.put_back(buffer);
    }
    assert!(receiver.try_pop().is_none());
}

#[test]
fn test_eos_propagates_exactly() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(generator(2, 2, 7));
    let copy = graph.add_node(registry.new_node("copy").unwrap());
    graph.connect(gen, copy, 0).unwrap();

    let null = NullTask::new();
    let counter = null.counter();
    let sink = graph.add_node(TaskNode::new("null", Box::new(null)));
    graph.connect(copy, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 7);
}

#[test]
fn test_share_data_passthrough() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(generator(4, 4, 9));
    let dummy = graph.add_node(registry.new_node("dummy").unwrap());
    graph.connect(gen, dummy, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(dummy, sink, 0).unwrap();

    host_scheduler().run(&mut graph).unwrap();

    for expected in 0..9 {
        let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
        assert_eq!(first_sample(&mut buffer), expected as f32);
        receiver.put_back(buffer);
    }
}

#[test]
fn test_expansion_scatters_across_devices() {
    let mut graph = TaskGraph::new();
    let gen = graph.add_node(generator(8, 8, 10));
    let scale = graph.add_node(TaskNode::new("scale", Box::new(GpuScaleTask { factor: 2.0 })));
    graph.connect(gen, scale, 0).unwrap();

    let (output, receiver) = OutputTask::create();
    let sink = graph.add_node(TaskNode::new("output-task", Box::new(output)));
    graph.connect(scale, sink, 0).unwrap();

    let scheduler = Scheduler::new(
        SchedulerConfig { expand: true, ..Default::default() },
        Arc::new(Resources::with_fake_devices(2)),
    );
    scheduler.run(&mut graph).unwrap();

    // The scale task was replicated once per device.
    assert_eq!(graph.num_nodes(), 4);

    // No duplicates, no drops: each frame k comes out exactly once as 2k.
    let mut seen: Vec<f32> = (0..10)
        .map(|_| {
            let mut buffer = receiver.pop(POP_TIMEOUT).expect("missing output buffer");
            let sample = first_sample(&mut buffer);
            receiver.put_back(buffer);
            sample
        })
        .collect();
    seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let expected: Vec<f32> = (0..10).map(|k| (2 * k) as f32).collect();
    assert_eq!(seen, expected);
    assert!(receiver.try_pop().is_none());
}

#[test]
fn test_setup_failure_aborts_run() {
    let mut graph = TaskGraph::new();
    let gen = graph.add_node(generator(4, 4, 3));
    let broken = graph.add_node(TaskNode::new("broken", Box::new(BrokenSetupTask)));
    graph.connect(gen, broken, 0).unwrap();

    let null = NullTask::new();
    let sink = graph.add_node(TaskNode::new("null", Box::new(null)));
    graph.connect(broken, sink, 0).unwrap();

    match host_scheduler().run(&mut graph) {
        Err(Error::Setup { task, .. }) => assert_eq!(task, "broken"),
        other => panic!("expected a setup error, got {:?}", other.err()),
    }
}

#[test]
fn test_runtime_error_cancels_run() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(generator(8, 8, 1000));
    let exploding = graph.add_node(TaskNode::new("exploding", Box::new(ExplodingTask::new(3))));
    graph.connect(gen, exploding, 0).unwrap();

    let null = graph.add_node(registry.new_node("null").unwrap());
    graph.connect(exploding, null, 0).unwrap();

    match host_scheduler().run(&mut graph) {
        Err(Error::Resource(reason)) => assert!(reason.contains("simulated")),
        other => panic!("expected a resource error, got {:?}", other.err()),
    }
}

#[test]
fn test_external_stop_unwinds_workers() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();

    // A stream far too long to finish on its own.
    let gen = graph.add_node(generator(64, 64, 1_000_000_000));
    let null = graph.add_node(registry.new_node("null").unwrap());
    graph.connect(gen, null, 0).unwrap();

    let scheduler = Arc::new(host_scheduler());
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || scheduler.run(&mut graph))
    };

    thread::sleep(Duration::from_millis(300));
    scheduler.stop();

    // Cancellation reads as a clean end-of-stream, not as a failure.
    runner.join().unwrap().unwrap();
}

#[test]
fn test_empty_graph_is_rejected() {
    let mut graph = TaskGraph::new();
    assert!(matches!(host_scheduler().run(&mut graph), Err(Error::Graph(_))));
}

#[test]
fn test_unconnected_input_is_rejected() {
    let registry = PluginRegistry::with_basics();
    let mut graph = TaskGraph::new();
    graph.add_node(registry.new_node("copy").unwrap());

    assert!(matches!(host_scheduler().run(&mut graph), Err(Error::Graph(_))));
}
