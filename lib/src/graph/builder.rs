use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;

use super::{fixup_source_and_sink_edges, AttrValue, Graph, Node};
use crate::literal::Literal;
use crate::types::DataType;

/// One output slot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Output {
  pub node: NodeIndex,
  pub index: usize,
}

impl From<NodeIndex> for Output {
  fn from(node: NodeIndex) -> Self {
    Output { node, index: 0 }
  }
}

/// Incremental graph construction. [`GraphBuilder::finish`] connects dangling
/// nodes to source and sink, [`GraphBuilder::finish_raw`] leaves the graph as built.
#[derive(Debug, Default)]
pub struct GraphBuilder {
  graph: Graph,
  name_counts: HashMap<String, usize>,
}

impl GraphBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// `prefix` the first time, then `prefix_1`, `prefix_2`, ...
  pub fn unique_name(&mut self, prefix: &str) -> String {
    let count = self.name_counts.entry(prefix.to_string()).or_insert(0);
    let name = if *count == 0 {
      prefix.to_string()
    } else {
      format!("{}_{}", prefix, count)
    };
    *count += 1;
    name
  }

  pub fn op(&mut self, name: &str, op: &str) -> NodeBuilder<'_> {
    self.name_counts.entry(name.to_string()).or_insert(1);
    NodeBuilder {
      node: Node::new(name, op),
      inputs: vec![],
      control_inputs: vec![],
      builder: self,
    }
  }

  pub fn graph(&self) -> &Graph {
    &self.graph
  }

  pub fn graph_mut(&mut self) -> &mut Graph {
    &mut self.graph
  }

  pub fn finish(mut self) -> Graph {
    fixup_source_and_sink_edges(&mut self.graph);
    self.graph
  }

  pub fn finish_raw(self) -> Graph {
    self.graph
  }

  pub fn arg(&mut self, name: &str, dtype: DataType, index: usize) -> Output {
    self
      .op(name, "_Arg")
      .attr("T", AttrValue::Type(dtype))
      .attr("index", AttrValue::Int(index as i64))
      .finish()
      .into()
  }

  pub fn retval(&mut self, name: &str, input: Output, index: usize) -> NodeIndex {
    self
      .op(name, "_Retval")
      .input(input)
      .attr("index", AttrValue::Int(index as i64))
      .finish()
  }

  pub fn constant(&mut self, name: &str, value: Literal) -> Output {
    let mut op = self.op(name, "Const");
    if let Ok(dtype) = value.dtype() {
      op = op.attr("dtype", AttrValue::Type(dtype));
    }
    op.attr("value", AttrValue::Tensor(value)).finish().into()
  }

  pub fn unary(&mut self, name: &str, op: &str, x: Output) -> Output {
    self.op(name, op).input(x).finish().into()
  }

  pub fn binary(&mut self, name: &str, op: &str, a: Output, b: Output) -> Output {
    self.op(name, op).input(a).input(b).finish().into()
  }
}

pub struct NodeBuilder<'a> {
  builder: &'a mut GraphBuilder,
  node: Node,
  inputs: Vec<Output>,
  control_inputs: Vec<NodeIndex>,
}

impl<'a> NodeBuilder<'a> {
  pub fn input(mut self, input: impl Into<Output>) -> Self {
    self.inputs.push(input.into());
    self
  }

  pub fn inputs(mut self, inputs: impl IntoIterator<Item = Output>) -> Self {
    self.inputs.extend(inputs);
    self
  }

  pub fn control_input(mut self, node: NodeIndex) -> Self {
    self.control_inputs.push(node);
    self
  }

  pub fn attr(mut self, key: &str, value: AttrValue) -> Self {
    self.node.attrs.insert(key.to_string(), value);
    self
  }

  pub fn finish(self) -> NodeIndex {
    let graph = &mut self.builder.graph;
    let idx = graph.add_node(self.node);
    for (slot, input) in self.inputs.into_iter().enumerate() {
      graph.add_edge(input.node, input.index, idx, slot);
    }
    for ctrl in self.control_inputs {
      graph.add_control_edge(ctrl, idx);
    }
    idx
  }
}
