pub use compile::*;
pub use ops::*;
pub use run::*;

pub mod compile;
pub mod ops;
pub mod run;

use std::{path::Path, sync::Arc};

use tracing::info;

use crate::argument::Argument;
use crate::compiler::{Compiler, CompilerOptions};
use crate::error::Result;
use crate::function::FunctionLibrary;
use crate::graph::{Graph, GraphDef};
use crate::utils::deserialize_from_file;

/// A graph document and its argument list, read from JSON files.
pub struct Job {
  pub name: String,
  pub graph: Graph,
  pub library: FunctionLibrary,
  pub args: Vec<Argument>,
}

impl Job {
  pub fn load(graph_path: &Path, args_path: &Path) -> Result<Self> {
    let def: GraphDef = deserialize_from_file(graph_path)?;
    let graph = Graph::from_graph_def(&def)?;
    let library = FunctionLibrary::from_defs(def.library)?;
    let args: Vec<Argument> = deserialize_from_file(args_path)?;
    let name = graph_path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "graph".to_string());
    info!(
      "loaded {}: {} nodes, {} functions, {} arguments",
      name,
      graph.num_op_nodes(),
      library.len(),
      args.len()
    );
    Ok(Job {
      name,
      graph,
      library,
      args,
    })
  }

  /// Compiler whose global function table is the document's library.
  fn compiler(&self, backend: &str) -> Compiler {
    Compiler::new(CompilerOptions {
      backend: backend.to_string(),
      function_library: Arc::new(self.library.clone()),
      ..Default::default()
    })
  }
}
