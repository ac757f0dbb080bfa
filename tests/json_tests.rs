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

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use ufo_engine::{
    buffer::Value,
    json,
    registry::PluginRegistry,
    sched::{Scheduler, SchedulerConfig},
    Resources,
};

fn registry() -> PluginRegistry {
    PluginRegistry::with_basics()
}

#[test]
fn test_read_simple_pipeline() {
    let document = r#"
    {
        "nodes": [
            { "name": "dummy-data",
              "properties": { "width": 32, "height": 16, "number": 12 } },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data", "output": 0 },
              "to":   { "name": "null", "input": 0 } }
        ]
    }"#;

    let graph = json::read_graph(document, &registry()).unwrap();

    assert_eq!(graph.num_nodes(), 2);
    assert_eq!(graph.edges().len(), 1);
    assert_eq!(graph.node(0).label(), "dummy-data");
    assert_eq!(graph.node(0).parameters()["width"], Value::Int(32));
    assert_eq!(graph.node(0).parameters()["number"], Value::Int(12));
}

#[test]
fn test_loaded_pipeline_runs() {
    let document = r#"
    {
        "nodes": [
            { "name": "dummy-data",
              "properties": { "width": 8, "height": 8, "number": 5 } },
            { "name": "copy" },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data" }, "to": { "name": "copy" } },
            { "from": { "name": "copy" }, "to": { "name": "null" } }
        ]
    }"#;

    let mut graph = json::read_graph(document, &registry()).unwrap();

    let observed = Arc::new(AtomicU64::new(0));
    let hook = Arc::clone(&observed);
    let mut scheduler =
        Scheduler::new(SchedulerConfig::default(), Arc::new(Resources::host_only()));
    scheduler.set_progress_hook(move |_label, _count| {
        hook.fetch_add(1, Ordering::Relaxed);
    });

    scheduler.run(&mut graph).unwrap();
    assert_eq!(observed.load(Ordering::Relaxed), 5);
}

#[test]
fn test_prop_sets_apply_before_own_properties() {
    let document = r#"
    {
        "prop-sets": {
            "small-frames": { "width": 4, "height": 4, "number": 2 }
        },
        "nodes": [
            { "name": "dummy-data",
              "prop-refs": ["small-frames"],
              "properties": { "number": 9 } },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data" }, "to": { "name": "null" } }
        ]
    }"#;

    let graph = json::read_graph(document, &registry()).unwrap();

    let params = graph.node(0).parameters();
    assert_eq!(params["width"], Value::Int(4));
    // The node's own properties win over the referenced bundle.
    assert_eq!(params["number"], Value::Int(9));
}

#[test]
fn test_duplicate_names_need_ids() {
    let ambiguous = r#"
    {
        "nodes": [
            { "name": "dummy-data" },
            { "name": "copy" },
            { "name": "copy" },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data" }, "to": { "name": "copy" } }
        ]
    }"#;
    assert!(json::read_graph(ambiguous, &registry()).is_err());

    let explicit = r#"
    {
        "nodes": [
            { "name": "dummy-data" },
            { "name": "copy", "id": "first" },
            { "name": "copy", "id": "second" },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data" }, "to": { "name": "first" } },
            { "from": { "name": "first" }, "to": { "name": "second" } },
            { "from": { "name": "second" }, "to": { "name": "null" } }
        ]
    }"#;
    let graph = json::read_graph(explicit, &registry()).unwrap();
    assert_eq!(graph.num_nodes(), 4);
    assert_eq!(graph.edges().len(), 3);
}

#[test]
fn test_unknown_plugin_is_a_graph_error() {
    let document = r#"{ "nodes": [ { "name": "does-not-exist" } ] }"#;
    let err = json::read_graph(document, &registry()).unwrap_err();
    assert!(err.to_string().contains("does-not-exist"));
}

#[test]
fn test_unknown_parameter_is_a_graph_error() {
    let document = r#"
    {
        "nodes": [ { "name": "dummy-data", "properties": { "wdith": 8 } } ]
    }"#;
    let err = json::read_graph(document, &registry()).unwrap_err();
    assert!(err.to_string().contains("wdith"));
}

#[test]
fn test_empty_document_is_rejected() {
    assert!(json::read_graph("{}", &registry()).is_err());
    assert!(json::read_graph("not json at all", &registry()).is_err());
}

#[test]
fn test_write_then_read_round_trip() {
    let document = r#"
    {
        "nodes": [
            { "name": "dummy-data",
              "properties": { "width": 8, "height": 8, "number": 3 } },
            { "name": "loop", "properties": { "number": 2 } },
            { "name": "null" }
        ],
        "edges": [
            { "from": { "name": "dummy-data" }, "to": { "name": "loop" } },
            { "from": { "name": "loop" }, "to": { "name": "null" } }
        ]
    }"#;

    let graph = json::read_graph(document, &registry()).unwrap();
    let serialized = json::write_graph(&graph).unwrap();
    let reread = json::read_graph(&serialized, &registry()).unwrap();

    assert_eq!(reread.num_nodes(), graph.num_nodes());
    assert_eq!(reread.edges().len(), graph.edges().len());
    for id in graph.node_ids() {
        assert_eq!(reread.node(id).label(), graph.node(id).label());
        assert_eq!(reread.node(id).parameters(), graph.node(id).parameters());
    }
}
