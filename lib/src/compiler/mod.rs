//! The compiler entry points: graph or function in, IR computation plus metadata out.
//!
//! [Note: compilation pipeline]
//!   1. Validate the argument list.
//!   2. Prepare the graph: optional source/sink repair, reachability check, compile-time constant
//!      analysis, function inlining, `_Arg`/`_Retval` binding, deterministic ordering.
//!   3. Populate the resource store once.
//!   4. Turn arguments into IR values. Parameters and initialized resources become IR parameters
//!      in argument order; constants become IR constants; uninitialized resources start as zeros.
//!   5. Lower every node in order.
//!   6. Assemble the result tuple: non-constant return values, then resource updates.
//!
//!   Resources always use the physical layout of the shape representation hook. Parameters and
//!   return values use it only for entry computations. Values are reshaped at the IR boundary so
//!   lowering routines only ever see logical shapes.

mod result;
#[cfg(test)]
mod tests;

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

pub use result::{CompilationResult, OutputDescription, ResourceUpdate};

use crate::argument::{
  identity_shape_representation, physical_shape, Argument, ArgumentKind, ResourceKind,
  ShapeRepresentationFn,
};
use crate::const_analysis::compile_time_constant_inputs;
use crate::error::{Error, Result};
use crate::function::{FunctionLibrary, FunctionResolver, NameAttrList};
use crate::graph::{AttrValue, Graph};
use crate::inline::check_function_body;
use crate::ir::{IrBuilder, IrOp, Shape};
use crate::lower::{lower_graph, LoweringState};
use crate::ops::{OpRegistry, Value, DEVICE_CPU_JIT};
use crate::prepare::prepare_graph;
use crate::resource::{Resource, ResourceTracker};
use crate::resource_store::{PopulateFn, ResourceStore};

/// Construction-time configuration shared by every compilation of one [`Compiler`].
#[derive(Clone)]
pub struct CompilerOptions {
  /// Backend lowering routines are looked up for.
  pub backend: String,
  /// Global function table, consulted after the compiler's local one.
  pub function_library: Arc<FunctionLibrary>,
  pub registry: Arc<OpRegistry>,
  pub populate_resource_manager: Option<PopulateFn>,
  /// Identity when unset.
  pub shape_representation_fn: Option<ShapeRepresentationFn>,
}

impl Default for CompilerOptions {
  fn default() -> Self {
    CompilerOptions {
      backend: DEVICE_CPU_JIT.to_string(),
      function_library: Arc::new(FunctionLibrary::new()),
      registry: OpRegistry::global(),
      populate_resource_manager: None,
      shape_representation_fn: None,
    }
  }
}

impl fmt::Debug for CompilerOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompilerOptions")
      .field("backend", &self.backend)
      .field("functions", &self.function_library.len())
      .field("populate_resource_manager", &self.populate_resource_manager.is_some())
      .field("shape_representation_fn", &self.shape_representation_fn.is_some())
      .finish()
  }
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
  /// Report outputs computable from constants alone as literals instead of IR results.
  pub resolve_compile_time_constants: bool,
  /// Apply the shape representation to parameters and return values as well as resources.
  pub is_entry_computation: bool,
  /// Emit an update for every resource argument, changed or not.
  pub return_updated_values_for_all_resources: bool,
  /// Link isolated nodes to source and sink before validating the graph.
  pub fixup_source_and_sink_edges: bool,
}

impl Default for CompileOptions {
  fn default() -> Self {
    CompileOptions {
      resolve_compile_time_constants: true,
      is_entry_computation: true,
      return_updated_values_for_all_resources: false,
      fixup_source_and_sink_edges: false,
    }
  }
}

/// IR parameters created for the arguments.
#[derive(Debug, Default)]
pub(crate) struct Parameters {
  pub input_mapping: Vec<usize>,
  pub input_shapes: Vec<Shape>,
}

impl Parameters {
  fn add(&mut self, builder: &mut IrBuilder, arg_index: usize, shape: Shape) -> Result<IrOp> {
    let op = builder.parameter(self.input_mapping.len(), shape.clone())?;
    self.input_mapping.push(arg_index);
    self.input_shapes.push(shape);
    Ok(op)
  }
}

#[derive(Debug)]
pub struct Compiler {
  options: CompilerOptions,
  local_library: FunctionLibrary,
}

impl Compiler {
  pub fn new(options: CompilerOptions) -> Self {
    Compiler {
      options,
      local_library: FunctionLibrary::new(),
    }
  }

  pub fn options(&self) -> &CompilerOptions {
    &self.options
  }

  pub fn local_function_library(&self) -> &FunctionLibrary {
    &self.local_library
  }

  /// Functions added here shadow the global table.
  pub fn local_function_library_mut(&mut self) -> &mut FunctionLibrary {
    &mut self.local_library
  }

  fn resolver(&self) -> FunctionResolver<'_> {
    FunctionResolver::new(&self.local_library, &self.options.function_library)
  }

  fn shape_representation(&self) -> ShapeRepresentationFn {
    self
      .options
      .shape_representation_fn
      .clone()
      .unwrap_or_else(identity_shape_representation)
  }

  /// Indices of `_Arg` nodes whose values must be known at compile time.
  pub fn compile_time_constant_arguments(&self, graph: &Graph) -> Result<BTreeSet<usize>> {
    let required = compile_time_constant_inputs(
      graph,
      &self.resolver(),
      &self.options.registry,
      &self.options.backend,
    )?;
    Ok(
      required
        .keys()
        .map(|n| graph.node(*n))
        .filter(|node| node.op == "_Arg")
        .filter_map(|node| match node.attr("index") {
          Some(AttrValue::Int(i)) => Some(*i as usize),
          _ => None,
        })
        .collect(),
    )
  }

  /// Turns each argument into the value its `_Arg` node produces.
  fn bind_arguments(
    &self,
    options: &CompileOptions,
    args: &[Argument],
    builder: &mut IrBuilder,
    resources: &mut ResourceTracker,
  ) -> Result<(Vec<Value>, Parameters)> {
    let hook = self.shape_representation();
    let mut parameters = Parameters::default();
    let mut values = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
      let name = if arg.name.is_empty() {
        format!("arg{}", i)
      } else {
        arg.name.clone()
      };
      let value = match (arg.kind, arg.resource_kind) {
        (ArgumentKind::Constant, _) => {
          let literal = arg.constant_value.clone().ok_or_else(|| {
            Error::InvalidArgument(format!("argument {} is a constant without a value", i))
          })?;
          Value::Tensor(builder.constant(literal))
        }
        (ArgumentKind::Parameter, _) => {
          let physical = if options.is_entry_computation {
            physical_shape(&hook, &arg.shape, arg.dtype)?
          } else {
            arg.shape.clone()
          };
          let p = parameters.add(builder, i, Shape::array(arg.dtype, physical))?;
          Value::Tensor(builder.reshape(p, &arg.shape)?)
        }
        (ArgumentKind::Resource, Some(ResourceKind::Variable)) => {
          let shape = arg.value_shape();
          let initial = if arg.initialized {
            let physical = physical_shape(&hook, &shape, arg.dtype)?;
            let p = parameters.add(builder, i, Shape::array(arg.dtype, physical))?;
            builder.reshape(p, &shape)?
          } else {
            builder.zeros(arg.dtype, &shape)?
          };
          let resource = Resource::variable(i, &name, arg.dtype, shape, arg.initialized, initial);
          Value::Resource(resources.add(resource))
        }
        (ArgumentKind::Resource, Some(ResourceKind::TensorArray)) => {
          let shape = arg.value_shape();
          let physical = physical_shape(&hook, &shape, arg.dtype)?;
          let num_gradients = arg.tensor_array_gradients.len();
          let mut initial = vec![];
          if arg.initialized {
            let element = Shape::array(arg.dtype, physical);
            if num_gradients == 0 {
              let p = parameters.add(builder, i, element)?;
              initial.push(builder.reshape(p, &shape)?);
            } else {
              let tuple = Shape::Tuple(vec![element; num_gradients + 1]);
              let p = parameters.add(builder, i, tuple)?;
              for k in 0..=num_gradients {
                let part = builder.get_tuple_element(p, k)?;
                initial.push(builder.reshape(part, &shape)?);
              }
            }
          } else {
            for _ in 0..=num_gradients {
              initial.push(builder.zeros(arg.dtype, &shape)?);
            }
          }
          let base = initial[0];
          let gradients: BTreeMap<String, IrOp> = arg
            .tensor_array_gradients
            .iter()
            .cloned()
            .zip(initial.into_iter().skip(1))
            .collect();
          let resource = Resource::tensor_array(i, &name, arg.dtype, shape, arg.initialized, base, gradients);
          Value::Resource(resources.add(resource))
        }
        (ArgumentKind::Resource, None) => {
          return Err(Error::InvalidArgument(format!(
            "argument {} is a resource without a resource kind",
            i
          )))
        }
      };
      values.push(value);
    }
    Ok((values, parameters))
  }

  /// Compiles `graph` into a computation named `name`.
  #[instrument(level = "info", skip(self, options, graph, args), fields(backend = %self.options.backend))]
  pub fn compile_graph(
    &self,
    options: &CompileOptions,
    name: &str,
    graph: Graph,
    args: &[Argument],
  ) -> Result<CompilationResult> {
    for (i, arg) in args.iter().enumerate() {
      arg.validate(i)?;
    }
    let resolver = self.resolver();
    let prepared = prepare_graph(
      name,
      graph,
      args,
      &resolver,
      &self.options.registry,
      &self.options.backend,
      options.fixup_source_and_sink_edges,
    )?;

    let mut store = ResourceStore::new();
    if let Some(populate) = &self.options.populate_resource_manager {
      populate(&mut store)?;
      info!("resource store populated with {} entries", store.len());
    }

    let mut builder = IrBuilder::new(name);
    let mut resources = ResourceTracker::new();
    let (arguments, parameters) = self.bind_arguments(options, args, &mut builder, &mut resources)?;

    let retvals = lower_graph(
      &prepared,
      &self.options.registry,
      &self.options.backend,
      LoweringState {
        builder: &mut builder,
        resources: &mut resources,
        store: &store,
        arguments: &arguments,
      },
    )?;

    let result = result::assemble(
      builder,
      &resources,
      retvals,
      prepared.num_retvals,
      options,
      &self.shape_representation(),
      parameters,
    )?;
    info!(
      "compiled {}: {} outputs ({} constant), {} resource updates",
      name,
      result.outputs.len(),
      result.num_constant_outputs(),
      result.resource_updates.len()
    );
    Ok(result)
  }

  /// Instantiates `function` with its attributes and compiles the body.
  #[instrument(level = "info", skip(self, options, args), fields(function = %function.name))]
  pub fn compile_function(
    &self,
    options: &CompileOptions,
    function: &NameAttrList,
    args: &[Argument],
  ) -> Result<CompilationResult> {
    let resolver = self.resolver();
    let body = resolver.instantiate(&function.name, &function.attrs)?;
    check_function_body(
      &function.name,
      &body,
      &resolver,
      &self.options.registry,
      &self.options.backend,
    )?;
    if body.arg_types.len() != args.len() {
      return Err(Error::InvalidArgument(format!(
        "function {} takes {} arguments, {} were supplied",
        function.name,
        body.arg_types.len(),
        args.len()
      )));
    }
    self.compile_graph(options, &function.name, body.graph, args)
  }
}
