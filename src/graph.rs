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

use std::sync::atomic::{AtomicUsize, Ordering};
use crate::{
    error::{Error, Result},
    task::TaskNode,
};

pub type NodeId = usize;

/// A directed labeled edge. The port encodes which input slot of the
/// consumer this connection feeds; several edges may share endpoints with
/// different ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub port: u32,
}

static REPLICA_TAGS: AtomicUsize = AtomicUsize::new(1);

/// The pipeline: task nodes and labeled edges forming a DAG. Node ids are
/// stable indices; nodes are never removed, only added (expansion splices
/// copies in place).
#[derive(Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    edges: Vec<Edge>,
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("num_nodes", &self.nodes.len())
            .field("edges", &self.edges)
            .finish()
    }
}

impl TaskGraph {
    pub fn new() -> Self {
        TaskGraph::default()
    }

    pub fn add_node(&mut self, node: TaskNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &TaskNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TaskNode {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [TaskNode] {
        &mut self.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        0..self.nodes.len()
    }

    fn check_id(&self, id: NodeId) -> Result<()> {
        if id >= self.nodes.len() {
            return Err(Error::graph(format!("node {} does not exist", id)));
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` along directed edges.
    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.nodes.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if seen[id] {
                continue;
            }
            seen[id] = true;
            stack.extend(self.edges.iter().filter(|e| e.src == id).map(|e| e.dst));
        }
        false
    }

    /// Add an edge feeding `dst`'s input `port` from `src`'s output.
    pub fn connect(&mut self, src: NodeId, dst: NodeId, port: u32) -> Result<()> {
        self.check_id(src)?;
        self.check_id(dst)?;

        let n_inputs = self.nodes[dst].task().num_inputs();
        if (port as usize) >= n_inputs {
            return Err(Error::graph(format!(
                "`{}` has {} input port(s), cannot connect port {}",
                self.nodes[dst].label(),
                n_inputs,
                port
            )));
        }
        if self.edges.iter().any(|e| e.dst == dst && e.port == port) {
            return Err(Error::graph(format!(
                "input port {} of `{}` is already connected",
                port,
                self.nodes[dst].label()
            )));
        }
        if self.reaches(dst, src) {
            return Err(Error::graph(format!(
                "connecting `{}` to `{}` would create a cycle",
                self.nodes[src].label(),
                self.nodes[dst].label()
            )));
        }

        self.edges.push(Edge { src, dst, port });
        Ok(())
    }

    pub fn disconnect(&mut self, src: NodeId, dst: NodeId, port: u32) -> Result<()> {
        let before = self.edges.len();
        self.edges.retain(|e| !(e.src == src && e.dst == dst && e.port == port));
        if self.edges.len() == before {
            return Err(Error::graph(format!(
                "no edge {} -> {} on port {}",
                src, dst, port
            )));
        }
        Ok(())
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Add an edge without the single-edge-per-port check. Expansion uses
    /// this to give a join port one feed per replica.
    pub(crate) fn splice_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Incoming edges of `id`, sorted by port.
    pub fn in_edges(&self, id: NodeId) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self.edges.iter().filter(|e| e.dst == id).copied().collect();
        edges.sort_by_key(|e| e.port);
        edges
    }

    /// Outgoing edges of `id`, in insertion order.
    pub fn out_edges(&self, id: NodeId) -> Vec<Edge> {
        self.edges.iter().filter(|e| e.src == id).copied().collect()
    }

    pub fn predecessors(&self, id: NodeId) -> Vec<NodeId> {
        self.in_edges(id).iter().map(|e| e.src).collect()
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.out_edges(id).iter().map(|e| e.dst).collect();
        out.dedup();
        out
    }

    /// Nodes without incoming edges.
    pub fn roots(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| !self.edges.iter().any(|e| e.dst == id))
            .collect()
    }

    /// Nodes without outgoing edges.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.node_ids()
            .filter(|&id| !self.edges.iter().any(|e| e.src == id))
            .collect()
    }

    /// Kahn's topological enumeration. Connect-time checks keep the graph
    /// acyclic, so a cycle here means ids were manipulated out of band.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            in_degree[edge.dst] += 1;
        }

        let mut ready: Vec<NodeId> =
            self.node_ids().filter(|&id| in_degree[id] == 0).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop() {
            order.push(id);
            for edge in self.edges.iter().filter(|e| e.src == id) {
                in_degree[edge.dst] -= 1;
                if in_degree[edge.dst] == 0 {
                    ready.push(edge.dst);
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::graph("cycle detected"));
        }
        Ok(order)
    }

    /// A structurally identical graph whose nodes are fresh copies (same
    /// configuration, distinct identity, no runtime state).
    pub fn copy(&self) -> TaskGraph {
        TaskGraph {
            nodes: self.nodes.iter().map(|n| n.copy_node()).collect(),
            edges: self.edges.clone(),
        }
    }

    /// The linear node sequence when this graph is a single chain, `None`
    /// otherwise.
    pub fn flatten(&self) -> Option<Vec<NodeId>> {
        let roots = self.roots();
        if roots.len() != 1 {
            return None;
        }

        let mut path = Vec::with_capacity(self.nodes.len());
        let mut current = roots[0];
        loop {
            path.push(current);
            let next = self.out_edges(current);
            match next.len() {
                0 => break,
                1 => {
                    if self.in_edges(next[0].dst).len() != 1 {
                        return None;
                    }
                    current = next[0].dst;
                }
                _ => return None,
            }
        }

        if path.len() == self.nodes.len() {
            Some(path)
        } else {
            None
        }
    }

    fn is_chain(&self, path: &[NodeId]) -> bool {
        path.windows(2).all(|pair| {
            self.edges.iter().any(|e| e.src == pair[0] && e.dst == pair[1])
        })
    }

    /// Replace a linear `path` in place by `count` parallel copies. Each new
    /// copy is spliced between the path's original predecessors and
    /// successors with the same ports; all replicas (the originals included)
    /// share a tag so the upstream group can scatter across them.
    ///
    /// Returns one node-id vector per replica, the original path first.
    pub fn expand(&mut self, path: &[NodeId], count: usize) -> Result<Vec<Vec<NodeId>>> {
        if path.is_empty() {
            return Err(Error::graph("cannot expand an empty path"));
        }
        for &id in path {
            self.check_id(id)?;
        }
        if !self.is_chain(path) {
            return Err(Error::graph("expansion path is not a connected chain"));
        }

        let head_in = self.in_edges(path[0]);
        let tail_out = self.out_edges(*path.last().unwrap());
        let inner: Vec<Edge> = path
            .windows(2)
            .map(|pair| {
                *self
                    .edges
                    .iter()
                    .find(|e| e.src == pair[0] && e.dst == pair[1])
                    .unwrap()
            })
            .collect();

        let tag = REPLICA_TAGS.fetch_add(1, Ordering::Relaxed);
        for &id in path {
            self.nodes[id].replica_tag = Some(tag);
        }

        let mut replicas = vec![path.to_vec()];
        for _ in 1..count {
            let copies: Vec<NodeId> = path
                .iter()
                .map(|&id| {
                    let mut copy = self.nodes[id].copy_node();
                    copy.replica_tag = Some(tag);
                    self.add_node(copy)
                })
                .collect();

            for edge in &head_in {
                self.edges.push(Edge { src: edge.src, dst: copies[0], port: edge.port });
            }
            for (offset, edge) in inner.iter().enumerate() {
                self.edges.push(Edge {
                    src: copies[offset],
                    dst: copies[offset + 1],
                    port: edge.port,
                });
            }
            for edge in &tail_out {
                self.edges.push(Edge {
                    src: *copies.last().unwrap(),
                    dst: edge.dst,
                    port: edge.port,
                });
            }

            replicas.push(copies);
        }

        Ok(replicas)
    }
}
