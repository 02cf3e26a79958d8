use std::path::Path;

use tracing::info;

use super::Job;
use crate::compiler::CompileOptions;
use crate::error::{Error, Result};
use crate::ir::LocalClient;
use crate::literal::Literal;
use crate::utils::deserialize_from_file;

/// Compiles a graph and executes it on the reference client.
pub struct Run {
  job: Job,
  backend: String,
  options: CompileOptions,
  inputs: Vec<Literal>,
}

impl Run {
  pub fn new(job: Job, backend: &str, options: CompileOptions, inputs_path: &Path) -> Result<Self> {
    let inputs: Vec<Literal> = deserialize_from_file(inputs_path)?;
    Ok(Self {
      job,
      backend: backend.to_string(),
      options,
      inputs,
    })
  }

  /// Inputs are given per argument; the ones that did not become IR parameters are dropped here.
  pub fn run(self) -> Result<Literal> {
    if self.inputs.len() != self.job.args.len() {
      return Err(Error::InvalidArgument(format!(
        "{} takes {} inputs, {} were supplied",
        self.job.name,
        self.job.args.len(),
        self.inputs.len()
      )));
    }
    let compiler = self.job.compiler(&self.backend);
    let result = compiler.compile_graph(&self.options, &self.job.name, self.job.graph, &self.job.args)?;
    let params: Vec<Literal> = result
      .input_mapping
      .iter()
      .map(|&arg| self.inputs[arg].clone())
      .collect();
    let output = LocalClient::new().execute(&result.computation, &params)?;
    info!(
      "{} returned {} outputs and {} resource updates",
      self.job.name,
      result.outputs.len(),
      result.resource_updates.len()
    );
    Ok(output)
  }
}
