//! Splices function bodies into the calling graph.
//!
//! [Note: inlining]
//!   A call node is any node whose op names a function known to the resolver. The callee is
//!   instantiated with the call's attributes and copied into the caller under the call's name
//!   (`call/node`). The body's source becomes a `call/input_control` NoOp that inherits the call's
//!   control inputs, and the body's sink becomes `call/output_control`, which feeds the call's
//!   control outputs. `_Arg` nodes turn into Identity nodes fed by the call's data inputs and
//!   `_Retval` nodes into Identity nodes feeding the call's data outputs. The call node is then
//!   removed. Bodies may contain further calls, so inlining repeats until none remain.

use std::collections::{BTreeSet, HashMap};

use itertools::Itertools;
use petgraph::stable_graph::NodeIndex;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::function::{FunctionBody, FunctionResolver};
use crate::graph::{fixup_source_and_sink_edges, AttrValue, Edge, Graph, Node};
use crate::ops::{is_control_flow_op, OpRegistry};

/// Calls nested deeper than this are treated as recursion.
pub const MAX_INLINE_DEPTH: usize = 32;

/// Fails with `UnimplementedOp` listing every body operation the backend cannot lower.
pub fn check_function_body(
  function: &str,
  body: &FunctionBody,
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
) -> Result<()> {
  let mut unsupported = BTreeSet::new();
  let mut control_flow = BTreeSet::new();
  for n in body.graph.op_nodes() {
    let op = body.graph.node(n).op.as_str();
    if is_control_flow_op(op) {
      control_flow.insert(op);
    } else if !resolver.is_function(op) && registry.lookup(op, backend).is_none() {
      unsupported.insert(op);
    }
  }
  if unsupported.is_empty() && control_flow.is_empty() {
    return Ok(());
  }
  let mut msg = format!(
    "Detected unsupported operations when trying to compile function {} for {}:",
    function, backend
  );
  if !unsupported.is_empty() {
    msg.push_str(&format!(" {}:{{{}}}", function, unsupported.iter().join(", ")));
  }
  if !control_flow.is_empty() {
    msg.push_str(&format!(
      " (control flow is not supported: {}:{{{}}})",
      function,
      control_flow.iter().join(", ")
    ));
  }
  Err(Error::UnimplementedOp(msg))
}

fn inline_call(
  graph: &mut Graph,
  call: NodeIndex,
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
) -> Result<()> {
  let context = graph.node_context(call);
  let node = graph.node(call).clone();
  let body = resolver
    .instantiate(&node.op, &node.attrs)
    .map_err(|e| e.with_context(&context))?;
  check_function_body(&node.op, &body, resolver, registry, backend).map_err(|e| e.with_context(&context))?;

  let inputs = graph.dense_data_inputs(call)?;
  if inputs.len() != body.arg_types.len() {
    return Err(
      Error::InvalidArgument(format!(
        "call to {} passes {} inputs, the function takes {}",
        node.op,
        inputs.len(),
        body.arg_types.len()
      ))
      .with_context(&context),
    );
  }

  let input_control = graph.add_node(Node::new(format!("{}/input_control", node.name), "NoOp"));
  let output_control = graph.add_node(Node::new(format!("{}/output_control", node.name), "NoOp"));
  let mut mapped: HashMap<NodeIndex, NodeIndex> = HashMap::new();
  mapped.insert(body.graph.source(), input_control);
  mapped.insert(body.graph.sink(), output_control);
  let mut rets: HashMap<usize, NodeIndex> = HashMap::new();

  for n in body.graph.op_nodes() {
    let inner = body.graph.node(n);
    let mut copy = Node::new(format!("{}/{}", node.name, inner.name), inner.op.clone());
    copy.attrs = inner.attrs.clone();
    let index = match inner.attr("index") {
      Some(AttrValue::Int(i)) => Some(*i as usize),
      _ => None,
    };
    match (inner.op.as_str(), index) {
      ("_Arg", Some(i)) => {
        copy.op = "Identity".to_string();
        copy.attrs.remove("index");
        let (src, out) = inputs.get(i).copied().ok_or_else(|| {
          Error::InvalidGraph(format!(
            "{} reads argument {} of {}, which takes {} inputs",
            inner.name,
            i,
            node.op,
            inputs.len()
          ))
          .with_context(&context)
        })?;
        let idx = graph.add_node(copy);
        graph.add_edge(src, out, idx, 0);
        mapped.insert(n, idx);
      }
      ("_Retval", Some(j)) => {
        copy.op = "Identity".to_string();
        copy.attrs.remove("index");
        let idx = graph.add_node(copy);
        rets.insert(j, idx);
        mapped.insert(n, idx);
      }
      _ => {
        mapped.insert(n, graph.add_node(copy));
      }
    }
  }

  for n in body.graph.node_indices() {
    for (dst, edge) in body.graph.out_edges(n) {
      let (src, dst) = (mapped[&n], mapped[&dst]);
      match edge {
        Edge::Data {
          src_output,
          dst_input,
        } => graph.add_edge(src, src_output, dst, dst_input),
        // source -> sink shortcuts in an empty body are kept as ordering
        Edge::Control => graph.add_control_edge(src, dst),
      }
    }
  }

  for src in graph.control_inputs(call) {
    graph.add_control_edge(src, input_control);
  }
  for (dst, edge) in graph.out_edges(call) {
    match edge {
      Edge::Data {
        src_output,
        dst_input,
      } => {
        let ret = rets.get(&src_output).copied().ok_or_else(|| {
          Error::InvalidGraph(format!(
            "{} consumes output {} of a call to {}, which returns {} values",
            graph.node(dst).name,
            src_output,
            node.op,
            body.ret_types.len()
          ))
        })?;
        graph.add_edge(ret, 0, dst, dst_input);
      }
      Edge::Control => graph.add_control_edge(output_control, dst),
    }
  }
  graph.remove_node(call);
  debug!("inlined {} into {} ({} nodes)", node.op, node.name, mapped.len());
  Ok(())
}

/// Inlines every function call, including calls introduced by inlined bodies.
/// Returns the number of calls inlined.
#[instrument(level = "debug", skip_all)]
pub fn inline_function_calls(
  graph: &mut Graph,
  resolver: &FunctionResolver<'_>,
  registry: &OpRegistry,
  backend: &str,
) -> Result<usize> {
  let mut inlined = 0;
  for depth in 0..=MAX_INLINE_DEPTH {
    let calls = graph
      .op_nodes()
      .into_iter()
      .filter(|n| resolver.is_function(&graph.node(*n).op))
      .collect_vec();
    if calls.is_empty() {
      if inlined > 0 {
        fixup_source_and_sink_edges(graph);
      }
      return Ok(inlined);
    }
    if depth == MAX_INLINE_DEPTH {
      break;
    }
    for call in calls {
      inline_call(graph, call, resolver, registry, backend)?;
      inlined += 1;
    }
  }
  let remaining = graph
    .op_nodes()
    .into_iter()
    .map(|n| graph.node(n).op.clone())
    .filter(|op| resolver.is_function(op))
    .unique()
    .join(", ");
  Err(Error::InvalidGraph(format!(
    "function calls nest deeper than {} levels; recursive functions cannot be inlined: {}",
    MAX_INLINE_DEPTH, remaining
  )))
}
