use std::collections::BTreeSet;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, instrument, warn};

use crate::argument::{Argument, ArgumentKind};
use crate::const_analysis::compile_time_constant_inputs;
use crate::error::{Error, Result};
use crate::function::FunctionResolver;
use crate::graph::{
  algorithm::validate_reachability, fixup_source_and_sink_edges, stable_topological_order, AttrValue,
  Graph,
};
use crate::inline::inline_function_calls;
use crate::ops::OpRegistry;
use crate::types::DataType;

/// A graph ready for lowering: calls inlined, arguments checked, nodes ordered.
#[derive(Debug, Clone)]
pub struct PreparedGraph {
  pub graph: Graph,
  /// Deterministic topological order, source and sink included.
  pub order: Vec<NodeIndex>,
  pub num_retvals: usize,
}

fn index_attr(graph: &Graph, n: NodeIndex) -> Result<usize> {
  let node = graph.node(n);
  match node.attr("index") {
    Some(AttrValue::Int(i)) if *i >= 0 => Ok(*i as usize),
    _ => Err(
      Error::InvalidAttribute(format!("{} node {} needs a non-negative int attr 'index'", node.op, node.name))
        .with_context(&graph.node_context(n)),
    ),
  }
}

/// Checks every `_Arg` against the argument it refers to and records the logical shape on it.
fn bind_arguments(graph: &mut Graph, args: &[Argument]) -> Result<()> {
  let arg_nodes: Vec<NodeIndex> = graph.nodes_with_op("_Arg").collect();
  for n in arg_nodes {
    let index = index_attr(graph, n)?;
    let Some(arg) = args.get(index) else {
      return Err(
        Error::InvalidArgument(format!(
          "_Arg node {} refers to argument {}, but only {} arguments were supplied",
          graph.node(n).name,
          index,
          args.len()
        ))
        .with_context(&graph.node_context(n)),
      );
    };
    let expected = if arg.is_resource() {
      DataType::Resource
    } else {
      arg.dtype
    };
    match graph.node(n).attr("T") {
      Some(AttrValue::Type(t)) if *t != expected => {
        return Err(
          Error::InvalidArgument(format!(
            "argument {} is a {:?} of type {}, but _Arg node {} has type {}",
            index,
            arg.kind,
            expected,
            graph.node(n).name,
            t
          ))
          .with_context(&graph.node_context(n)),
        )
      }
      _ => {}
    }
    graph
      .node_mut(n)
      .attrs
      .insert("_shape".to_string(), AttrValue::Shape(arg.shape.clone()));
  }
  Ok(())
}

/// Return value indices must cover `0..n` exactly once.
fn count_retvals(graph: &Graph) -> Result<usize> {
  let mut seen = BTreeSet::new();
  for n in graph.nodes_with_op("_Retval") {
    let index = index_attr(graph, n)?;
    if !seen.insert(index) {
      return Err(
        Error::InvalidGraph(format!("return value {} is produced by more than one _Retval", index))
          .with_context(&graph.node_context(n)),
      );
    }
  }
  if let Some((expected, found)) = seen.iter().enumerate().find(|(i, r)| *i != **r) {
    return Err(Error::InvalidGraph(format!(
      "return values are not numbered densely: missing {} (next is {})",
      expected, found
    )));
  }
  Ok(seen.len())
}

/// Repairs (when asked), validates, analyses, inlines and orders `graph`.
#[instrument(level = "debug", skip_all, fields(name = %name))]
#[allow(clippy::too_many_arguments)]
pub fn prepare_graph(
  name: &str,
  mut graph: Graph,
  args: &[Argument],
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
  fixup: bool,
) -> Result<PreparedGraph> {
  if fixup && fixup_source_and_sink_edges(&mut graph) {
    warn!("graph {} was missing source/sink edges; repaired", name);
  }
  validate_reachability(&graph)?;

  let required = compile_time_constant_inputs(&graph, resolver, registry, backend)?;
  for (n, requirement) in required.iter() {
    if graph.node(*n).op != "_Arg" {
      continue;
    }
    let index = index_attr(&graph, *n)?;
    if args.get(index).map(|a| a.kind) == Some(ArgumentKind::Parameter) {
      return Err(requirement.to_error());
    }
  }

  let inlined = inline_function_calls(&mut graph, resolver, registry, backend)?;
  bind_arguments(&mut graph, args)?;
  let num_retvals = count_retvals(&graph)?;
  let order = stable_topological_order(&graph)?;
  debug!(
    "prepared {}: {} nodes, {} calls inlined, {} return values",
    name,
    graph.num_op_nodes(),
    inlined,
    num_retvals
  );
  Ok(PreparedGraph {
    graph,
    order,
    num_retvals,
  })
}
