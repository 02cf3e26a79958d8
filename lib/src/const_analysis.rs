//! Backward analysis finding the nodes whose outputs must be known at compile time.
//!
//! [Note: constant requirements]
//!   An op declares which of its inputs must be compile-time constants (the shape operand of
//!   Reshape, the dims of Fill). The producer of such an input must then be constant, and so must
//!   everything it reads, except through metadata-only ops such as Shape, whose output depends on
//!   the input's shape alone. Calls are analysed by instantiating the callee: when the body needs
//!   argument `i` to be constant, the caller's input `i` inherits the requirement.

use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::function::FunctionResolver;
use crate::graph::{stable_topological_order, AttrValue, Graph};
use crate::inline::MAX_INLINE_DEPTH;
use crate::ops::context::constant_expected;
use crate::ops::OpRegistry;

/// The consumer input that made a node constant-required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstRequirement {
  pub consumer: String,
  pub op: String,
  pub input: usize,
  /// `[[Node: ...]]` rendering of the consumer.
  pub context: String,
}

impl ConstRequirement {
  pub fn to_error(&self) -> Error {
    constant_expected(self.input, &self.consumer, &self.op).with_context(&self.context)
  }
}

/// Nodes whose outputs must be compile-time constants, each with the first requirement found.
#[instrument(level = "debug", skip_all)]
pub fn compile_time_constant_inputs(
  graph: &Graph,
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
) -> Result<BTreeMap<NodeIndex, ConstRequirement>> {
  analyze(graph, resolver, registry, backend, 0)
}

fn analyze(
  graph: &Graph,
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
  depth: usize,
) -> Result<BTreeMap<NodeIndex, ConstRequirement>> {
  if depth > MAX_INLINE_DEPTH {
    return Err(Error::InvalidGraph(format!(
      "function calls nest deeper than {} levels; recursive functions cannot be inlined",
      MAX_INLINE_DEPTH
    )));
  }
  let mut required: BTreeMap<NodeIndex, ConstRequirement> = BTreeMap::new();
  let mut order = stable_topological_order(graph)?;
  order.reverse();

  for n in order {
    if graph.is_source_or_sink(n) {
      continue;
    }
    let node = graph.node(n);
    let inputs = graph.data_inputs(n);
    let require = |required: &mut BTreeMap<NodeIndex, ConstRequirement>, slot: usize| {
      if let Some((_, src, _)) = inputs.iter().find(|(i, _, _)| *i == slot) {
        required.entry(*src).or_insert_with(|| ConstRequirement {
          consumer: node.name.clone(),
          op: node.op.clone(),
          input: slot,
          context: graph.node_context(n),
        });
      }
    };

    let mut metadata_only = false;
    if resolver.is_function(&node.op) {
      let body = resolver
        .instantiate(&node.op, &node.attrs)
        .map_err(|e| e.with_context(&graph.node_context(n)))?;
      let inner = analyze(&body.graph, resolver, registry, backend, depth + 1)?;
      for idx in inner.keys() {
        let arg = body.graph.node(*idx);
        if arg.op != "_Arg" {
          continue;
        }
        if let Some(AttrValue::Int(i)) = arg.attr("index") {
          require(&mut required, *i as usize);
        }
      }
    } else if let Some(registration) = registry.lookup(&node.op, backend) {
      metadata_only = registration.def.metadata_only;
      for slot in registration.def.compile_time_constant_inputs.iter() {
        require(&mut required, *slot);
      }
    }

    if required.contains_key(&n) && !metadata_only {
      for (slot, _, _) in inputs.iter() {
        require(&mut required, *slot);
      }
    }
  }
  debug!("{} nodes must be compile-time constants", required.len());
  Ok(required)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::function::{FunctionDef, FunctionLibrary};
  use crate::graph::GraphBuilder;
  use crate::literal::Literal;
  use crate::ops::DEVICE_CPU_JIT;
  use crate::types::DataType;

  fn names(graph: &Graph, required: &BTreeMap<NodeIndex, ConstRequirement>) -> Vec<String> {
    let mut names: Vec<String> = required.keys().map(|n| graph.node(*n).name.clone()).collect();
    names.sort();
    names
  }

  #[test]
  fn requirement_flows_back_through_producers() {
    let mut b = GraphBuilder::new();
    let a = b.arg("a", DataType::Int32, 0);
    let dims = b.constant("dims", Literal::r1(&[2i32, 2]));
    let one = b.constant("one", Literal::r0(0i32));
    let shape = b.binary("shape", "Add", dims, one);
    let c = b.op("c", "Reshape").inputs([a, shape]).finish();
    b.retval("out", c.into(), 0);
    let graph = b.finish();

    let empty = FunctionLibrary::new();
    let resolver = FunctionResolver::new(&empty, &empty);
    let registry = OpRegistry::with_builtin_kernels();
    let required = compile_time_constant_inputs(&graph, &resolver, &registry, DEVICE_CPU_JIT).unwrap();
    assert_eq!(names(&graph, &required), vec!["dims", "one", "shape"]);
    let shape_idx = graph.find_node("shape").unwrap();
    assert_eq!(required[&shape_idx].consumer, "c");
    assert_eq!(required[&shape_idx].input, 1);
  }

  #[test]
  fn metadata_only_ops_stop_the_requirement() {
    let mut b = GraphBuilder::new();
    let a = b.arg("a", DataType::Int32, 0);
    let shape = b.unary("shape", "Shape", a);
    let c = b.op("c", "Reshape").inputs([a, shape]).finish();
    b.retval("out", c.into(), 0);
    let graph = b.finish();

    let empty = FunctionLibrary::new();
    let resolver = FunctionResolver::new(&empty, &empty);
    let registry = OpRegistry::with_builtin_kernels();
    let required = compile_time_constant_inputs(&graph, &resolver, &registry, DEVICE_CPU_JIT).unwrap();
    assert_eq!(names(&graph, &required), vec!["shape"]);
  }

  #[test]
  fn requirement_is_threaded_through_calls() {
    let fill: FunctionDef = serde_json::from_str(
      r#"{
        "name": "FillFn",
        "args": [{"name": "x", "type": "T"}, {"name": "dims", "type": "int32"}],
        "rets": [{"name": "y", "type": "T", "source": "y"}],
        "attrs": [{"name": "T"}],
        "nodes": [{"name": "y", "op": "Fill", "inputs": ["dims", "x"], "attrs": {"T": {"placeholder": "T"}}}]
      }"#,
    )
    .unwrap();
    let local = FunctionLibrary::from_defs([fill]).unwrap();
    let global = FunctionLibrary::new();
    let resolver = FunctionResolver::new(&local, &global);

    let mut b = GraphBuilder::new();
    let value = b.arg("value", DataType::Int32, 0);
    let dims = b.arg("dims", DataType::Int32, 1);
    let call = b
      .op("fill", "FillFn")
      .inputs([value, dims])
      .attr("T", AttrValue::Type(DataType::Int32))
      .finish();
    b.retval("out", call.into(), 0);
    let graph = b.finish();

    let registry = OpRegistry::with_builtin_kernels();
    let required = compile_time_constant_inputs(&graph, &resolver, &registry, DEVICE_CPU_JIT).unwrap();
    assert_eq!(names(&graph, &required), vec!["dims"]);
  }
}
