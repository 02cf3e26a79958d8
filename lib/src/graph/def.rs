use std::collections::HashMap;

use petgraph::stable_graph::NodeIndex;
use serde::{Deserialize, Serialize};

use super::{AttrMap, Edge, Graph, Node};
use crate::error::{Error, Result};
use crate::function::FunctionDef;

/// Serialized node. Inputs are `"name"` (output 0), `"name:k"` or `"^name"` (control).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
  pub name: String,
  pub op: String,
  #[serde(default)]
  pub inputs: Vec<String>,
  #[serde(default)]
  pub attrs: AttrMap,
}

/// Serialized graph plus the functions it may call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
  pub nodes: Vec<NodeDef>,
  #[serde(default)]
  pub library: Vec<FunctionDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef<'a> {
  Data { node: &'a str, output: usize },
  Control { node: &'a str },
}

pub fn parse_input(input: &str) -> Result<InputRef<'_>> {
  if let Some(node) = input.strip_prefix('^') {
    return Ok(InputRef::Control { node });
  }
  match input.rsplit_once(':') {
    Some((node, output)) => {
      let output = output
        .parse::<usize>()
        .map_err(|_| Error::InvalidGraph(format!("malformed input reference '{}'", input)))?;
      Ok(InputRef::Data { node, output })
    }
    None => Ok(InputRef::Data {
      node: input,
      output: 0,
    }),
  }
}

impl Graph {
  /// Builds a graph from its serialized form. Source and sink edges are not
  /// added; see [`super::fixup_source_and_sink_edges`].
  pub fn from_graph_def(def: &GraphDef) -> Result<Graph> {
    let mut graph = Graph::new();
    let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();
    for nd in def.nodes.iter() {
      if by_name.contains_key(nd.name.as_str()) {
        return Err(Error::InvalidGraph(format!("duplicate node name '{}'", nd.name)));
      }
      let mut node = Node::new(nd.name.clone(), nd.op.clone());
      node.attrs = nd.attrs.clone();
      by_name.insert(nd.name.as_str(), graph.add_node(node));
    }
    for nd in def.nodes.iter() {
      let dst = by_name[nd.name.as_str()];
      let mut slot = 0;
      for input in nd.inputs.iter() {
        let lookup = |name: &str| {
          by_name.get(name).copied().ok_or_else(|| {
            Error::InvalidGraph(format!(
              "node '{}' has input '{}' referring to an unknown node",
              nd.name, input
            ))
          })
        };
        match parse_input(input)? {
          InputRef::Data { node, output } => {
            graph.add_edge(lookup(node)?, output, dst, slot);
            slot += 1;
          }
          InputRef::Control { node } => graph.add_control_edge(lookup(node)?, dst),
        }
      }
    }
    Ok(graph)
  }

  /// Inverse of [`Graph::from_graph_def`]. Source and sink edges are dropped.
  pub fn to_graph_def(&self) -> GraphDef {
    let nodes = self
      .op_nodes()
      .into_iter()
      .map(|n| {
        let node = self.node(n);
        let mut inputs: Vec<String> = self
          .data_inputs(n)
          .into_iter()
          .map(|(_, src, out)| match out {
            0 => self.node(src).name.clone(),
            k => format!("{}:{}", self.node(src).name, k),
          })
          .collect();
        inputs.extend(
          self
            .in_edges(n)
            .into_iter()
            .filter(|(src, e)| *e == Edge::Control && !self.is_source_or_sink(*src))
            .map(|(src, _)| format!("^{}", self.node(src).name)),
        );
        NodeDef {
          name: node.name.clone(),
          op: node.op.clone(),
          inputs,
          attrs: node.attrs.clone(),
        }
      })
      .collect();
    GraphDef {
      nodes,
      library: vec![],
    }
  }
}
