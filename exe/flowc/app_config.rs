use serde::Deserialize;

use flowc::CompileOptions;

/// Config file format. Every field can be omitted; unset fields keep the library defaults.
#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
  /// Backend to look lowering routines up for
  pub backend: Option<String>,
  pub resolve_compile_time_constants: Option<bool>,
  pub is_entry_computation: Option<bool>,
  pub return_updated_values_for_all_resources: Option<bool>,
  pub fixup_source_and_sink_edges: Option<bool>,
  /// Directory for Graphviz/GraphML dumps of the input graph
  pub artifacts: Option<String>,
}

impl AppConfig {
  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      backend: other.backend.or(self.backend),
      resolve_compile_time_constants: other
        .resolve_compile_time_constants
        .or(self.resolve_compile_time_constants),
      is_entry_computation: other.is_entry_computation.or(self.is_entry_computation),
      return_updated_values_for_all_resources: other
        .return_updated_values_for_all_resources
        .or(self.return_updated_values_for_all_resources),
      fixup_source_and_sink_edges: other
        .fixup_source_and_sink_edges
        .or(self.fixup_source_and_sink_edges),
      artifacts: other.artifacts.or(self.artifacts),
    }
  }

  pub fn backend(&self) -> &str {
    self.backend.as_deref().unwrap_or(flowc::DEVICE_CPU_JIT)
  }

  pub fn compile_options(&self) -> CompileOptions {
    let defaults = CompileOptions::default();
    CompileOptions {
      resolve_compile_time_constants: self
        .resolve_compile_time_constants
        .unwrap_or(defaults.resolve_compile_time_constants),
      is_entry_computation: self
        .is_entry_computation
        .unwrap_or(defaults.is_entry_computation),
      return_updated_values_for_all_resources: self
        .return_updated_values_for_all_resources
        .unwrap_or(defaults.return_updated_values_for_all_resources),
      fixup_source_and_sink_edges: self
        .fixup_source_and_sink_edges
        .unwrap_or(defaults.fixup_source_and_sink_edges),
    }
  }
}
