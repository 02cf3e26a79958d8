use std::{fs::File, io::Write, path::Path};

use serde::Serialize;

#[cfg(not(debug_assertions))]
use human_panic::setup_panic;
use tracing::subscriber::{DefaultGuard, SetGlobalDefaultError};

#[cfg(debug_assertions)]
extern crate better_panic;

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::Result;
use crate::graph::Graph;

// [NOTE] tracing
//
// Spans come from `#[instrument]` on the pipeline stages (prepare, inline, lower, assemble).
// Per-node lowering is logged at debug, per-compilation summaries at info, and graph repairs
// at warn. Set RUST_LOG=flowc=debug to see every lowered node.

pub fn install_logger() -> std::result::Result<(), SetGlobalDefaultError> {
  let subscriber = fmt()
    .compact()
    .with_env_filter(EnvFilter::from_default_env())
    .finish();
  tracing::subscriber::set_global_default(subscriber)
}

pub fn init_logging() -> std::result::Result<(), SetGlobalDefaultError> {
  // Human Panic. Only enabled when *not* debugging.
  #[cfg(not(debug_assertions))]
  {
    setup_panic!();
  }

  // Better Panic. Only enabled *when* debugging.
  #[cfg(debug_assertions)]
  {
    better_panic::Settings::debug()
      .most_recent_first(false)
      .lineno_suffix(true)
      .verbosity(better_panic::Verbosity::Full)
      .install();
  }

  install_logger()?;

  Ok(())
}

/// Thread-local subscriber for tests; logging stops when the guard drops.
pub fn init_logging_tests() -> DefaultGuard {
  let subscriber = fmt()
    .compact()
    .with_test_writer()
    .with_max_level(tracing::Level::DEBUG)
    .finish();
  tracing::subscriber::set_default(subscriber)
}

pub fn serialize_to_file<T: Serialize>(path: &Path, obj: &T) -> Result<()> {
  let buff = serde_json::to_string_pretty(obj)?;
  std::fs::write(path, buff)?;
  Ok(())
}

pub fn deserialize_from_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let buff = std::fs::read_to_string(path)?;
  Ok(serde_json::from_str(&buff)?)
}

pub fn save_graphviz(path: &Path, graph: &Graph) -> Result<()> {
  use petgraph::dot::Dot;
  let dot = Dot::with_config(graph.inner(), &[]);
  let mut file = File::create(path)?;
  write!(file, "{}", dot)?;
  Ok(())
}

pub fn save_graphml(path: &Path, graph: &Graph) -> Result<()> {
  use petgraph_graphml::GraphMl;
  let graphml = GraphMl::new(graph.inner())
    .pretty_print(true)
    .export_node_weights_display()
    .export_edge_weights_display();
  let file = File::create(path)?;
  graphml.to_writer(file)?;
  Ok(())
}
