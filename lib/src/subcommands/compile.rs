use std::path::{Path, PathBuf};

use tracing::info;

use super::Job;
use crate::compiler::{CompilationResult, CompileOptions};
use crate::error::Result;
use crate::utils::{save_graphml, save_graphviz, serialize_to_file};

pub struct Compile {
  job: Job,
  backend: String,
  options: CompileOptions,
  output_path: Option<PathBuf>,
  artifacts_dir: Option<PathBuf>,
}

impl Compile {
  pub fn new(job: Job, backend: &str, options: CompileOptions) -> Self {
    Self {
      job,
      backend: backend.to_string(),
      options,
      output_path: None,
      artifacts_dir: None,
    }
  }

  /// Write the result as JSON here.
  pub fn output(mut self, path: &Path) -> Self {
    self.output_path = Some(PathBuf::from(path));
    self
  }

  /// Dump the input graph as Graphviz and GraphML into this directory.
  pub fn artifacts(mut self, dir: &Path) -> Self {
    self.artifacts_dir = Some(PathBuf::from(dir));
    self
  }

  pub fn run(self) -> Result<CompilationResult> {
    if let Some(dir) = &self.artifacts_dir {
      std::fs::create_dir_all(dir)?;
      save_graphviz(&dir.join(format!("{}.dot", self.job.name)), &self.job.graph)?;
      save_graphml(&dir.join(format!("{}.graphml", self.job.name)), &self.job.graph)?;
      info!("graph artifacts written to {}", dir.display());
    }
    let compiler = self.job.compiler(&self.backend);
    let result = compiler.compile_graph(&self.options, &self.job.name, self.job.graph, &self.job.args)?;
    if let Some(path) = &self.output_path {
      serialize_to_file(path, &result)?;
      info!("compilation result written to {}", path.display());
    }
    Ok(result)
  }
}
