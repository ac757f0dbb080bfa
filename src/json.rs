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

//! The JSON pipeline description. `read_graph` turns a document into a
//! wired task graph via the plugin registry; `write_graph` serializes a
//! graph (or subgraph) so it can travel to a peer engine and come back out
//! of this same reader.

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::{
    buffer::Value,
    error::{Error, Result},
    graph::{NodeId, TaskGraph},
    registry::PluginRegistry,
};

#[derive(Serialize, Deserialize, Debug, Default)]
struct Description {
    #[serde(default)]
    nodes: Vec<NodeDesc>,
    #[serde(default)]
    edges: Vec<EdgeDesc>,
    /// Named property bundles nodes can pull in via `prop-refs`.
    #[serde(rename = "prop-sets", default, skip_serializing_if = "HashMap::is_empty")]
    prop_sets: HashMap<String, HashMap<String, serde_json::Value>>,
}

#[derive(Serialize, Deserialize, Debug)]
struct NodeDesc {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    properties: HashMap<String, serde_json::Value>,
    #[serde(rename = "prop-refs", default, skip_serializing_if = "Vec::is_empty")]
    prop_refs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct EdgeDesc {
    from: Endpoint,
    to: Endpoint,
}

#[derive(Serialize, Deserialize, Debug)]
struct Endpoint {
    name: String,
    #[serde(default)]
    output: u32,
    #[serde(default)]
    input: u32,
}

fn value_from_json(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(Error::graph(format!("number `{}` is out of range", n)))
            }
        }
        other => Err(Error::graph(format!(
            "property value `{}` is not a scalar",
            other
        ))),
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Str(s) => serde_json::Value::from(s.as_str()),
    }
}

/// Build a task graph from a JSON document. Nodes resolve through the
/// registry by `name`; edges reference nodes by `id` when given, else by
/// unique name. Properties apply before any setup runs.
pub fn read_graph(document: &str, registry: &PluginRegistry) -> Result<TaskGraph> {
    let description: Description = serde_json::from_str(document)
        .map_err(|err| Error::graph(format!("malformed pipeline description: {}", err)))?;

    if description.nodes.is_empty() {
        return Err(Error::graph("pipeline description has no nodes"));
    }

    let mut graph = TaskGraph::new();
    let mut by_key: HashMap<String, NodeId> = HashMap::new();
    let mut ambiguous: Vec<String> = Vec::new();

    for desc in &description.nodes {
        let mut node = registry.new_node(&desc.name)?;

        // Referenced bundles first, the node's own properties override.
        for reference in &desc.prop_refs {
            let bundle = description.prop_sets.get(reference).ok_or_else(|| {
                Error::graph(format!("no prop-set named `{}`", reference))
            })?;
            for (name, value) in bundle {
                node.set_parameter(name, value_from_json(value)?)?;
            }
        }
        for (name, value) in &desc.properties {
            node.set_parameter(name, value_from_json(value)?)?;
        }

        let id = graph.add_node(node);

        if let Some(explicit) = &desc.id {
            if by_key.insert(explicit.clone(), id).is_some() {
                return Err(Error::graph(format!("duplicate node id `{}`", explicit)));
            }
        }
        if by_key.insert(desc.name.clone(), id).is_some() {
            // Two nodes share a plugin name; edges must use explicit ids.
            ambiguous.push(desc.name.clone());
        }
    }

    for name in &ambiguous {
        by_key.remove(name);
    }

    let resolve = |key: &str| -> Result<NodeId> {
        by_key.get(key).copied().ok_or_else(|| {
            Error::graph(format!(
                "edge references `{}`, which is not a unique node name or id",
                key
            ))
        })
    };

    for edge in &description.edges {
        let src = resolve(&edge.from.name)?;
        let dst = resolve(&edge.to.name)?;
        graph.connect(src, dst, edge.to.input)?;
    }

    Ok(graph)
}

/// Serialize the whole graph.
pub fn write_graph(graph: &TaskGraph) -> Result<String> {
    let ids: Vec<NodeId> = graph.node_ids().collect();
    write_subgraph(graph, &ids)
}

/// Serialize the subgraph induced by `ids`: the named nodes, their recorded
/// parameters, and the edges among them. Every node gets an explicit id so
/// duplicate plugin names survive the round trip.
pub fn write_subgraph(graph: &TaskGraph, ids: &[NodeId]) -> Result<String> {
    let mut description = Description::default();
    let mut key_of: HashMap<NodeId, String> = HashMap::new();

    for (position, &id) in ids.iter().enumerate() {
        let node = graph.node(id);
        let key = format!("{}-{}", node.label(), position);
        key_of.insert(id, key.clone());

        let properties = node
            .parameters()
            .iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect();

        description.nodes.push(NodeDesc {
            name: node.label().to_string(),
            id: Some(key),
            properties,
            prop_refs: Vec::new(),
        });
    }

    for edge in graph.edges() {
        let (src, dst) = match (key_of.get(&edge.src), key_of.get(&edge.dst)) {
            (Some(src), Some(dst)) => (src.clone(), dst.clone()),
            _ => continue,
        };
        description.edges.push(EdgeDesc {
            from: Endpoint { name: src, output: 0, input: 0 },
            to: Endpoint { name: dst, output: 0, input: edge.port },
        });
    }

    serde_json::to_string_pretty(&description)
        .map_err(|err| Error::graph(format!("cannot serialize pipeline: {}", err)))
}
