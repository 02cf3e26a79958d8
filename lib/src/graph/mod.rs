//! Dataflow graph: named operations joined by data and control edges, with
//! two distinguished nodes, the source and the sink.
//!
//! [Note: graph representation]
//!   Nodes carry an operation name and typed attributes. Inputs are not stored on the node; a
//!   data edge records the producer's output slot and the consumer's input slot. Control edges
//!   carry no value and only order execution.
//!
//!   A well-formed graph has every op node reachable from the source and every op node able to
//!   reach the sink. [`fixup_source_and_sink_edges`] repairs a graph built without those edges.

pub mod algorithm;
pub mod builder;
pub mod def;
pub mod node;

use itertools::Itertools;
use petgraph::{
  stable_graph::{NodeIndex, StableDiGraph},
  visit::EdgeRef,
  Direction::{Incoming, Outgoing},
};

pub use algorithm::{
  cannot_reach_sink, fixup_source_and_sink_edges, stable_topological_order, unreachable_from_source,
};
pub use builder::{GraphBuilder, NodeBuilder, Output};
pub use def::{GraphDef, NodeDef};
pub use node::{AttrMap, AttrValue, Edge, Node};

use crate::error::{Error, Result};

pub const SOURCE_OP: &str = "_SOURCE";
pub const SINK_OP: &str = "_SINK";

#[derive(Debug, Clone)]
pub struct Graph {
  inner: StableDiGraph<Node, Edge>,
  source: NodeIndex,
  sink: NodeIndex,
}

impl Default for Graph {
  fn default() -> Self {
    Self::new()
  }
}

impl Graph {
  pub fn new() -> Self {
    let mut inner = StableDiGraph::new();
    let source = inner.add_node(Node::new(SOURCE_OP, "NoOp"));
    let sink = inner.add_node(Node::new(SINK_OP, "NoOp"));
    Graph {
      inner,
      source,
      sink,
    }
  }

  pub fn source(&self) -> NodeIndex {
    self.source
  }

  pub fn sink(&self) -> NodeIndex {
    self.sink
  }

  pub fn is_source_or_sink(&self, idx: NodeIndex) -> bool {
    idx == self.source || idx == self.sink
  }

  pub fn inner(&self) -> &StableDiGraph<Node, Edge> {
    &self.inner
  }

  pub fn add_node(&mut self, node: Node) -> NodeIndex {
    self.inner.add_node(node)
  }

  pub fn add_edge(&mut self, src: NodeIndex, src_output: usize, dst: NodeIndex, dst_input: usize) {
    self.inner.add_edge(
      src,
      dst,
      Edge::Data {
        src_output,
        dst_input,
      },
    );
  }

  /// Adds a control edge unless an identical one already exists.
  pub fn add_control_edge(&mut self, src: NodeIndex, dst: NodeIndex) {
    let exists = self
      .inner
      .edges_connecting(src, dst)
      .any(|e| e.weight().is_control());
    if !exists {
      self.inner.add_edge(src, dst, Edge::Control);
    }
  }

  /// Removes an op node and every edge touching it. Other indices stay valid.
  pub fn remove_node(&mut self, idx: NodeIndex) -> Option<Node> {
    if self.is_source_or_sink(idx) {
      return None;
    }
    self.inner.remove_node(idx)
  }

  pub fn node(&self, idx: NodeIndex) -> &Node {
    &self.inner[idx]
  }

  pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
    &mut self.inner[idx]
  }

  pub fn contains(&self, idx: NodeIndex) -> bool {
    self.inner.contains_node(idx)
  }

  /// All nodes including source and sink, in index order.
  pub fn node_indices(&self) -> Vec<NodeIndex> {
    self.inner.node_indices().sorted().collect()
  }

  /// Op nodes only, in index order.
  pub fn op_nodes(&self) -> Vec<NodeIndex> {
    self
      .node_indices()
      .into_iter()
      .filter(|n| !self.is_source_or_sink(*n))
      .collect()
  }

  pub fn num_op_nodes(&self) -> usize {
    self.inner.node_count() - 2
  }

  pub fn find_node(&self, name: &str) -> Option<NodeIndex> {
    self
      .inner
      .node_indices()
      .find(|n| self.inner[*n].name == name)
  }

  pub fn nodes_with_op<'a>(&'a self, op: &'a str) -> impl Iterator<Item = NodeIndex> + 'a {
    self
      .node_indices()
      .into_iter()
      .filter(move |n| self.inner[*n].op == op)
  }

  /// Data inputs as `(dst_input, src, src_output)`, sorted by input slot.
  pub fn data_inputs(&self, idx: NodeIndex) -> Vec<(usize, NodeIndex, usize)> {
    self
      .inner
      .edges_directed(idx, Incoming)
      .filter_map(|e| {
        e.weight()
          .as_data()
          .map(|(src_output, dst_input)| (dst_input, e.source(), src_output))
      })
      .sorted()
      .collect()
  }

  /// Data inputs checked to occupy slots `0..n` exactly once each.
  pub fn dense_data_inputs(&self, idx: NodeIndex) -> Result<Vec<(NodeIndex, usize)>> {
    let inputs = self.data_inputs(idx);
    for (expected, (slot, _, _)) in inputs.iter().enumerate() {
      if *slot != expected {
        return Err(Error::InvalidGraph(format!(
          "node {} has no input at slot {} (or a duplicate edge into it)",
          self.inner[idx].name, expected
        )));
      }
    }
    Ok(inputs.into_iter().map(|(_, src, out)| (src, out)).collect())
  }

  pub fn control_inputs(&self, idx: NodeIndex) -> Vec<NodeIndex> {
    self
      .inner
      .edges_directed(idx, Incoming)
      .filter(|e| e.weight().is_control())
      .map(|e| e.source())
      .sorted()
      .collect()
  }

  /// Outgoing edges as `(dst, edge)`, sorted by destination.
  pub fn out_edges(&self, idx: NodeIndex) -> Vec<(NodeIndex, Edge)> {
    self
      .inner
      .edges_directed(idx, Outgoing)
      .map(|e| (e.target(), *e.weight()))
      .sorted_by_key(|(dst, e)| (*dst, e.as_data()))
      .collect()
  }

  /// Incoming edges as `(src, edge)`, sorted by source.
  pub fn in_edges(&self, idx: NodeIndex) -> Vec<(NodeIndex, Edge)> {
    self
      .inner
      .edges_directed(idx, Incoming)
      .map(|e| (e.source(), *e.weight()))
      .sorted_by_key(|(src, e)| (*src, e.as_data()))
      .collect()
  }

  pub fn has_in_edges(&self, idx: NodeIndex) -> bool {
    self.inner.edges_directed(idx, Incoming).next().is_some()
  }

  pub fn has_out_edges(&self, idx: NodeIndex) -> bool {
    self.inner.edges_directed(idx, Outgoing).next().is_some()
  }

  /// Renders `NAME = OP[k=v, ...](in0, in1, ^ctrl)`.
  pub fn node_string(&self, idx: NodeIndex) -> String {
    let node = &self.inner[idx];
    let data = self.data_inputs(idx).into_iter().map(|(_, src, out)| {
      let name = &self.inner[src].name;
      if out == 0 {
        name.clone()
      } else {
        format!("{}:{}", name, out)
      }
    });
    let control = self
      .control_inputs(idx)
      .into_iter()
      .filter(|c| *c != self.source)
      .map(|c| format!("^{}", self.inner[c].name));
    let attrs = node.attrs_string();
    let attrs = if attrs.is_empty() {
      String::new()
    } else {
      format!("[{}]", attrs)
    };
    format!(
      "{} = {}{}({})",
      node.name,
      node.op,
      attrs,
      data.chain(control).join(", ")
    )
  }

  /// Error context attached to failures raised while handling a node.
  pub fn node_context(&self, idx: NodeIndex) -> String {
    format!("[[Node: {}]]", self.node_string(idx))
  }
}
