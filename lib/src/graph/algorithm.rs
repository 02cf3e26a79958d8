use std::{
  cmp::Reverse,
  collections::{BTreeSet, BinaryHeap, HashMap},
};

use itertools::Itertools;
use petgraph::{
  stable_graph::NodeIndex,
  visit::{Bfs, Reversed},
};
use tracing::{debug, instrument};

use super::Graph;
use crate::error::{Error, Result};

/// Adds control edges source -> n for op nodes without incoming edges and
/// n -> sink for op nodes without outgoing edges. Returns whether anything changed.
#[instrument(level = "debug", skip(graph))]
pub fn fixup_source_and_sink_edges(graph: &mut Graph) -> bool {
  let mut changed = false;
  for n in graph.op_nodes() {
    if !graph.has_in_edges(n) {
      graph.add_control_edge(graph.source(), n);
      changed = true;
    }
    if !graph.has_out_edges(n) {
      graph.add_control_edge(n, graph.sink());
      changed = true;
    }
  }
  debug!("fixup changed graph: {}", changed);
  changed
}

/// Op nodes not reachable from the source, in index order.
pub fn unreachable_from_source(graph: &Graph) -> Vec<NodeIndex> {
  let mut seen = BTreeSet::new();
  let mut bfs = Bfs::new(graph.inner(), graph.source());
  while let Some(n) = bfs.next(graph.inner()) {
    seen.insert(n);
  }
  graph
    .op_nodes()
    .into_iter()
    .filter(|n| !seen.contains(n))
    .collect()
}

/// Op nodes with no path to the sink, in index order.
pub fn cannot_reach_sink(graph: &Graph) -> Vec<NodeIndex> {
  let reversed = Reversed(graph.inner());
  let mut seen = BTreeSet::new();
  let mut bfs = Bfs::new(reversed, graph.sink());
  while let Some(n) = bfs.next(reversed) {
    seen.insert(n);
  }
  graph
    .op_nodes()
    .into_iter()
    .filter(|n| !seen.contains(n))
    .collect()
}

/// Fails with `InvalidGraph` naming every op node the source cannot reach.
/// Nodes without a path to the sink are allowed; they may still have effects.
pub fn validate_reachability(graph: &Graph) -> Result<()> {
  let unreachable = unreachable_from_source(graph);
  if !unreachable.is_empty() {
    return Err(Error::InvalidGraph(format!(
      "The following nodes are unreachable from the source in the graph: {}",
      unreachable
        .into_iter()
        .map(|n| graph.node(n).name.clone())
        .join(", ")
    )));
  }
  Ok(())
}

/// Kahn's algorithm with ties broken by the smaller node index, so the same
/// graph always yields the same order. Includes source and sink.
#[instrument(level = "debug", skip(graph))]
pub fn stable_topological_order(graph: &Graph) -> Result<Vec<NodeIndex>> {
  let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
  for n in graph.node_indices() {
    in_degree.insert(n, graph.in_edges(n).len());
  }
  let mut ready: BinaryHeap<Reverse<NodeIndex>> = in_degree
    .iter()
    .filter(|(_, d)| **d == 0)
    .map(|(n, _)| Reverse(*n))
    .collect();

  let mut order = Vec::with_capacity(in_degree.len());
  while let Some(Reverse(n)) = ready.pop() {
    order.push(n);
    for (dst, _) in graph.out_edges(n) {
      // parallel edges are counted once per edge on both sides
      let d = in_degree.entry(dst).or_insert(0);
      *d -= 1;
      if *d == 0 {
        ready.push(Reverse(dst));
      }
    }
  }

  if order.len() != in_degree.len() {
    let stuck = in_degree
      .iter()
      .filter(|(_, d)| **d > 0)
      .map(|(n, _)| *n)
      .sorted()
      .map(|n| graph.node(n).name.clone())
      .join(", ");
    return Err(Error::InvalidGraph(format!(
      "graph contains a cycle involving: {}",
      stuck
    )));
  }
  Ok(order)
}
