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

use ufo_engine::{
    buffer::Value,
    graph::TaskGraph,
    registry::PluginRegistry,
};

fn registry() -> PluginRegistry {
    PluginRegistry::with_basics()
}

/// dummy-data -> copy -> null
fn simple_chain() -> (TaskGraph, [usize; 3]) {
    let registry = registry();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(registry.new_node("dummy-data").unwrap());
    let copy = graph.add_node(registry.new_node("copy").unwrap());
    let null = graph.add_node(registry.new_node("null").unwrap());

    graph.connect(gen, copy, 0).unwrap();
    graph.connect(copy, null, 0).unwrap();
    (graph, [gen, copy, null])
}

#[test]
fn test_roots_and_leaves() {
    let (graph, [gen, copy, null]) = simple_chain();

    assert_eq!(graph.roots(), vec![gen]);
    assert_eq!(graph.leaves(), vec![null]);
    assert!(graph.predecessors(gen).is_empty());
    assert_eq!(graph.predecessors(copy), vec![gen]);
    assert_eq!(graph.successors(copy), vec![null]);
    assert!(graph.successors(null).is_empty());
}

#[test]
fn test_roots_and_leaves_disjoint() {
    let (graph, _) = simple_chain();
    for root in graph.roots() {
        assert!(!graph.leaves().contains(&root));
    }
}

#[test]
fn test_ports_order_predecessors() {
    let registry = registry();
    let mut graph = TaskGraph::new();

    let a = graph.add_node(registry.new_node("dummy-data").unwrap());
    let b = graph.add_node(registry.new_node("dummy-data").unwrap());
    let mut sum = registry.new_node("sum").unwrap();
    sum.set_parameter("num-inputs", Value::Int(2)).unwrap();
    let sum = graph.add_node(sum);

    // Wire the ports in reverse to check the query is port-ordered.
    graph.connect(b, sum, 1).unwrap();
    graph.connect(a, sum, 0).unwrap();

    assert_eq!(graph.predecessors(sum), vec![a, b]);
}

#[test]
fn test_connect_rejects_bad_port() {
    let registry = registry();
    let mut graph = TaskGraph::new();

    let gen = graph.add_node(registry.new_node("dummy-data").unwrap());
    let copy = graph.add_node(registry.new_node("copy").unwrap());

    assert!(graph.connect(gen, copy, 7).is_err());
}

#[test]
fn test_connect_rejects_busy_port() {
    let (mut graph, [gen, copy, _]) = simple_chain();
    let other = graph.add_node(registry().new_node("dummy-data").unwrap());

    assert!(graph.connect(other, copy, 0).is_err());
    let _ = gen;
}

#[test]
fn test_connect_rejects_cycle() {
    let registry = registry();
    let mut graph = TaskGraph::new();

    let a = graph.add_node(registry.new_node("copy").unwrap());
    let b = graph.add_node(registry.new_node("copy").unwrap());

    graph.connect(a, b, 0).unwrap();
    assert!(graph.connect(b, a, 0).is_err());
}

#[test]
fn test_disconnect_removes_edge() {
    let (mut graph, [gen, copy, null]) = simple_chain();

    graph.disconnect(copy, null, 0).unwrap();
    assert!(graph.successors(copy).is_empty());
    assert_eq!(graph.leaves(), vec![copy, null]);

    // Removing it twice is an error.
    assert!(graph.disconnect(copy, null, 0).is_err());
    let _ = gen;
}

#[test]
fn test_topological_order() {
    let (graph, [gen, copy, null]) = simple_chain();
    let order = graph.topological_order().unwrap();

    let pos = |id| order.iter().position(|&n| n == id).unwrap();
    assert!(pos(gen) < pos(copy));
    assert!(pos(copy) < pos(null));
}

#[test]
fn test_copy_is_isomorphic_with_fresh_nodes() {
    let (mut graph, [gen, ..]) = simple_chain();
    graph.node_mut(gen).set_parameter("number", Value::Int(42)).unwrap();

    let copy = graph.copy();

    assert_eq!(copy.num_nodes(), graph.num_nodes());
    assert_eq!(copy.edges(), graph.edges());
    for id in graph.node_ids() {
        assert_eq!(copy.node(id).label(), graph.node(id).label());
        assert_eq!(copy.node(id).parameters(), graph.node(id).parameters());
    }

    // Distinct identities: mutating the copy leaves the original alone.
    let mut copy = copy;
    copy.node_mut(gen).set_parameter("number", Value::Int(7)).unwrap();
    assert_eq!(graph.node(gen).parameters()["number"], Value::Int(42));
}

#[test]
fn test_flatten_chain() {
    let (graph, [gen, copy, null]) = simple_chain();
    assert_eq!(graph.flatten(), Some(vec![gen, copy, null]));
}

#[test]
fn test_flatten_rejects_fan_out() {
    let (mut graph, [_, copy, _]) = simple_chain();
    let extra = graph.add_node(registry().new_node("null").unwrap());
    graph.connect(copy, extra, 0).unwrap();

    assert_eq!(graph.flatten(), None);
}

#[test]
fn test_expand_multiplies_path() {
    let (mut graph, [gen, copy, null]) = simple_chain();

    let replicas = graph.expand(&[copy], 3).unwrap();

    assert_eq!(replicas.len(), 3);
    assert_eq!(graph.num_nodes(), 5);
    assert_eq!(graph.successors(gen).len(), 3);
    for replica in &replicas {
        assert_eq!(graph.successors(replica[0]), vec![null]);
        assert_eq!(graph.node(replica[0]).label(), "copy");
    }

    // Reachability is preserved: still one root, one leaf.
    assert_eq!(graph.roots(), vec![gen]);
    assert_eq!(graph.leaves(), vec![null]);
}

#[test]
fn test_expand_rejects_non_chain() {
    let (mut graph, [gen, _, null]) = simple_chain();
    assert!(graph.expand(&[gen, null], 2).is_err());
}
