use std::collections::{BTreeMap, HashMap};

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::ir::IrBuilder;
use crate::ops::{LoweringContext, OpRegistry, Value};
use crate::prepare::PreparedGraph;
use crate::resource::ResourceTracker;
use crate::resource_store::ResourceStore;

/// State shared by every node of one lowering pass.
pub struct LoweringState<'a> {
  pub builder: &'a mut IrBuilder,
  pub resources: &'a mut ResourceTracker,
  pub store: &'a ResourceStore,
  /// One value per argument: a tensor for parameters and constants, a handle for resources.
  pub arguments: &'a [Value],
}

fn gather_inputs(
  prepared: &PreparedGraph,
  n: NodeIndex,
  values: &HashMap<NodeIndex, Vec<Value>>,
) -> Result<Vec<Value>> {
  let graph = &prepared.graph;
  graph
    .dense_data_inputs(n)?
    .into_iter()
    .map(|(src, out)| {
      values
        .get(&src)
        .and_then(|outputs| outputs.get(out))
        .cloned()
        .ok_or_else(|| {
          Error::InvalidGraph(format!(
            "{} reads output {} of {}, which has no such output",
            graph.node(n).name,
            out,
            graph.node(src).name
          ))
        })
    })
    .collect()
}

/// Visits every op node once in the prepared order and returns the values handed to `_Retval`s.
#[instrument(level = "debug", skip_all)]
pub fn lower_graph(
  prepared: &PreparedGraph,
  registry: &OpRegistry,
  backend: &str,
  state: LoweringState<'_>,
) -> Result<BTreeMap<usize, Value>> {
  let graph = &prepared.graph;
  let mut values: HashMap<NodeIndex, Vec<Value>> = HashMap::new();
  let mut retvals = BTreeMap::new();

  for &n in prepared.order.iter() {
    if graph.is_source_or_sink(n) {
      continue;
    }
    let node = graph.node(n);
    let registration = registry.lookup(&node.op, backend).ok_or_else(|| {
      Error::UnimplementedOp(format!(
        "No registered '{}' OpKernel for {} devices compatible with node {}",
        node.op,
        backend,
        graph.node_context(n)
      ))
    })?;
    let context = || graph.node_context(n);
    registration
      .def
      .validate_attrs(node)
      .map_err(|e| e.with_context(&context()))?;

    let inputs = gather_inputs(prepared, n, &values).map_err(|e| e.with_context(&context()))?;
    if let Some(expected) = registration.def.num_inputs {
      if inputs.len() != expected {
        return Err(
          Error::InvalidGraph(format!(
            "{} takes {} data inputs, node {} has {}",
            node.op,
            expected,
            node.name,
            inputs.len()
          ))
          .with_context(&context()),
        );
      }
    }

    let mut ctx = LoweringContext::new(
      graph,
      n,
      &registration.def,
      inputs,
      &mut *state.builder,
      &mut *state.resources,
      state.store,
      state.arguments,
      &mut retvals,
    );
    (registration.lower)(&mut ctx).map_err(|e| e.with_context(&context()))?;
    let outputs = ctx.finish().map_err(|e| e.with_context(&context()))?;
    debug!("lowered {} ({}) into {} outputs", node.name, node.op, outputs.len());
    values.insert(n, outputs);
  }
  Ok(retvals)
}
