use std::sync::{
  atomic::{AtomicI32, Ordering},
  Arc,
};

use petgraph::stable_graph::NodeIndex;
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use super::*;
use crate::error::ErrorKind;
use crate::function::tests::x_times_two;
use crate::function::FunctionDef;
use crate::graph::{fixup_source_and_sink_edges, GraphBuilder, Node, Output};
use crate::ir::LocalClient;
use crate::literal::Literal;
use crate::ops::{LoweringContext, OpDef, OpRegistration, DEVICE_GPU_JIT};
use crate::types::{DataType, TensorShape};

fn compiler() -> Compiler {
  Compiler::new(CompilerOptions::default())
}

fn int_param(dims: &[i64]) -> Argument {
  Argument::parameter(DataType::Int32, TensorShape::new(dims.to_vec()))
}

fn execute(result: &CompilationResult, args: &[Literal]) -> Literal {
  LocalClient::new().execute(&result.computation, args).unwrap()
}

fn int_type() -> AttrValue {
  AttrValue::Type(DataType::Int32)
}

#[test]
fn empty_graph_compiles_and_runs() {
  let graph = GraphBuilder::new().finish();
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", graph, &[])
    .unwrap();
  assert!(result.outputs.is_empty());
  assert!(result.resource_updates.is_empty());
  assert_eq!(execute(&result, &[]), Literal::tuple(vec![]));
}

#[test]
fn adds_two_parameters() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let bb = b.arg("B", DataType::Int32, 1);
  let c = b.binary("C", "Add", a, bb);
  b.retval("D", c, 0);
  let args = [int_param(&[2]), int_param(&[2])];

  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", b.finish(), &args)
    .unwrap();
  assert_eq!(result.input_mapping, vec![0, 1]);
  let out = execute(&result, &[Literal::r1(&[7i32, 42]), Literal::r1(&[-3i32, 101])]);
  assert_eq!(out, Literal::tuple(vec![Literal::r1(&[4i32, 143])]));
}

#[test]
fn parameter_feeding_reshape_shape_is_rejected() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let shape = b.arg("B", DataType::Int32, 1);
  let c = b
    .op("C", "Reshape")
    .inputs([a, shape])
    .attr("T", int_type())
    .attr("Tshape", int_type())
    .finish();
  b.retval("D", c.into(), 0);
  let graph = b.finish();
  let args = [int_param(&[2]), int_param(&[1])];

  let err = compiler()
    .compile_graph(&CompileOptions::default(), "reshape", graph.clone(), &args)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::ConstantExpected);
  let msg = err.to_string();
  assert!(msg.contains("depends on a parameter"), "{}", msg);
  assert!(msg.contains("[[Node: C = Reshape"), "{}", msg);

  let constant: BTreeSet<usize> = [1].into();
  assert_eq!(compiler().compile_time_constant_arguments(&graph).unwrap(), constant);
}

#[test]
fn variable_read_feeding_reshape_shape_is_rejected() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let var = b.arg("V", DataType::Resource, 1);
  let read = b
    .op("R", "ReadVariableOp")
    .input(var)
    .attr("dtype", int_type())
    .finish();
  let c = b.op("C", "Reshape").inputs([a, read.into()]).finish();
  b.retval("D", c.into(), 0);
  let args = [
    int_param(&[2]),
    Argument::variable(DataType::Int32, TensorShape::new(vec![1]), true),
  ];

  let err = compiler()
    .compile_graph(&CompileOptions::default(), "reshape", b.finish(), &args)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::ConstantExpected);
  let msg = err.to_string();
  assert!(msg.contains("must be a compile-time constant"), "{}", msg);
  assert!(msg.contains("[[Node: C = Reshape"), "{}", msg);
}

#[test]
fn overflowing_reshape_shape_is_rejected() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int64, 0);
  let shape = b.constant("shape", Literal::r1(&[-1i64, 1 << 62, 4]));
  let c = b.op("C", "Reshape").inputs([a, shape]).finish();
  b.retval("D", c.into(), 0);
  let args = [Argument::parameter(DataType::Int64, TensorShape::new(vec![4]))];

  let err = compiler()
    .compile_graph(&CompileOptions::default(), "reshape", b.finish(), &args)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
  let msg = err.to_string();
  assert!(msg.contains("too many elements"), "{}", msg);
  assert!(msg.contains("[[Node: C = Reshape"), "{}", msg);
}

#[test]
fn oversized_fill_is_not_folded() {
  let fill = |dims: &[i64]| {
    let mut b = GraphBuilder::new();
    let dims = b.constant("dims", Literal::r1(dims));
    let value = b.constant("value", Literal::r0(1i32));
    let f = b.op("F", "Fill").inputs([dims, value]).finish();
    b.retval("D", f.into(), 0);
    compiler().compile_graph(&CompileOptions::default(), "fill", b.finish(), &[])
  };

  let result = fill(&[8192, 8192]).unwrap();
  assert!(!result.outputs[0].is_constant);
  assert_eq!(result.outputs[0].shape, TensorShape::new(vec![8192, 8192]));

  let err = fill(&[1 << 40, 1 << 40]).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
  assert!(err.to_string().contains("too many elements"), "{}", err);
}

#[test]
fn constant_argument_satisfies_reshape() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let shape = b.arg("B", DataType::Int32, 1);
  let c = b.op("C", "Reshape").inputs([a, shape]).finish();
  b.retval("D", c.into(), 0);
  let args = [
    int_param(&[4]),
    Argument::constant(Literal::r1(&[2i32, -1])).unwrap(),
  ];

  let result = compiler()
    .compile_graph(&CompileOptions::default(), "reshape", b.finish(), &args)
    .unwrap();
  assert_eq!(result.input_mapping, vec![0]);
  assert_eq!(result.outputs[0].shape, TensorShape::new(vec![2, 2]));
  let out = execute(&result, &[Literal::r1(&[1i32, 2, 3, 4])]);
  assert_eq!(out, Literal::tuple(vec![Literal::r2(&[&[1i32, 2], &[3, 4]])]));
}

fn constant_outputs_graph() -> Graph {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let seven = b.constant("B", Literal::r0(7i32));
  let c = b.unary("C", "Neg", a);
  b.retval("D", seven, 0);
  b.retval("E", c, 1);
  b.finish()
}

#[test]
fn constant_outputs_are_folded_on_request() {
  let args = [int_param(&[2])];
  let input = [Literal::r1(&[7i32, 42])];

  let options = CompileOptions {
    resolve_compile_time_constants: true,
    ..Default::default()
  };
  let result = compiler()
    .compile_graph(&options, "constants", constant_outputs_graph(), &args)
    .unwrap();
  assert_eq!(result.outputs.len(), 2);
  assert!(result.outputs[0].is_constant);
  assert_eq!(result.outputs[0].constant_value, Some(Literal::r0(7i32)));
  assert!(!result.outputs[1].is_constant);
  assert_eq!(
    execute(&result, &input),
    Literal::tuple(vec![Literal::r1(&[-7i32, -42])])
  );

  let options = CompileOptions {
    resolve_compile_time_constants: false,
    ..Default::default()
  };
  let result = compiler()
    .compile_graph(&options, "constants", constant_outputs_graph(), &args)
    .unwrap();
  assert!(result.outputs.iter().all(|o| !o.is_constant));
  assert_eq!(
    execute(&result, &input),
    Literal::tuple(vec![Literal::r0(7i32), Literal::r1(&[-7i32, -42])])
  );
}

#[test]
fn constant_output_of_called_function_is_folded() {
  let foo: FunctionDef = serde_json::from_str(
    r#"{
      "name": "foo",
      "args": [{"name": "a_0", "type": "int32"}],
      "rets": [
        {"name": "const", "type": "int32", "source": "Const"},
        {"name": "a", "type": "int32", "source": "a_0"}
      ],
      "nodes": [{"name": "Const", "op": "Const", "attrs": {
        "dtype": {"type": "int32"},
        "value": {"tensor": {"array": {"shape": [], "data": {"dtype": "int32", "values": [7]}}}}}}]
    }"#,
  )
  .unwrap();
  let library = FunctionLibrary::from_defs([foo]).unwrap();
  let compiler = Compiler::new(CompilerOptions {
    function_library: Arc::new(library),
    ..Default::default()
  });

  let mut b = GraphBuilder::new();
  let arg = b.arg("input_arg", DataType::Int32, 0);
  let foo = b.op("foo", "foo").input(arg).finish();
  b.retval("retval_0", Output { node: foo, index: 0 }, 0);
  b.retval("retval_1", Output { node: foo, index: 1 }, 1);

  let result = compiler
    .compile_graph(&CompileOptions::default(), "constants", b.finish(), &[int_param(&[1])])
    .unwrap();
  assert_eq!(result.outputs.len(), 2);
  assert!(result.outputs[0].is_constant);
  assert_eq!(result.outputs[0].constant_value, Some(Literal::r0(7i32)));
  assert!(!result.outputs[1].is_constant);
}

#[derive(Default)]
struct DummyResource {
  reads: AtomicI32,
}

fn dummy_registry() -> OpRegistry {
  let mut registry = OpRegistry::with_builtin_kernels();
  registry.register(OpRegistration::new(
    OpDef::new("DummyReadResource").inputs(1).outputs(2),
    |ctx: &mut LoweringContext<'_>| {
      let store = ctx.resource_store();
      let dummy: Arc<DummyResource> = store.lookup(store.default_container(), "dummy")?;
      dummy.reads.fetch_add(1, Ordering::SeqCst);
      let x = ctx.input(0)?;
      ctx.set_output(0, x);
      ctx.set_output(1, x);
      Ok(())
    },
  ));
  for backend in [DEVICE_CPU_JIT, DEVICE_GPU_JIT] {
    registry.register(
      OpRegistration::new(
        OpDef::new("DummyDuplicateOp").inputs(1).outputs(1),
        |ctx: &mut LoweringContext<'_>| {
          let x = ctx.input(0)?;
          ctx.set_output(0, x);
          Ok(())
        },
      )
      .backend(backend),
    );
  }
  registry
}

#[test]
fn populate_callback_seeds_the_resource_store() {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let read = b.op("B", "DummyReadResource").input(a).finish();
  let c = b.binary(
    "C",
    "Add",
    Output { node: read, index: 1 },
    Output { node: read, index: 0 },
  );
  b.retval("D", c, 0);

  let resource = Arc::new(DummyResource::default());
  let seeded = resource.clone();
  let populate: PopulateFn = Arc::new(move |store: &mut ResourceStore| {
    let container = store.default_container();
    store.create(container, "dummy", seeded.clone())
  });
  let compiler = Compiler::new(CompilerOptions {
    registry: Arc::new(dummy_registry()),
    populate_resource_manager: Some(populate),
    ..Default::default()
  });

  assert_eq!(resource.reads.load(Ordering::SeqCst), 0);
  let result = compiler
    .compile_graph(&CompileOptions::default(), "dummy", b.finish(), &[int_param(&[2])])
    .unwrap();
  assert_eq!(resource.reads.load(Ordering::SeqCst), 1);
  let out = execute(&result, &[Literal::r1(&[1i32, 2])]);
  assert_eq!(out, Literal::tuple(vec![Literal::r1(&[2i32, 4])]));
}

#[test]
fn backend_scoped_registrations() {
  let build = || {
    let mut b = GraphBuilder::new();
    let a = b.arg("A", DataType::Int32, 0);
    let d = b.unary("dup", "DummyDuplicateOp", a);
    b.retval("out", d, 0);
    b.finish()
  };
  let registry = Arc::new(dummy_registry());
  for backend in [DEVICE_CPU_JIT, DEVICE_GPU_JIT] {
    let compiler = Compiler::new(CompilerOptions {
      backend: backend.to_string(),
      registry: registry.clone(),
      ..Default::default()
    });
    compiler
      .compile_graph(&CompileOptions::default(), "dup", build(), &[int_param(&[2])])
      .unwrap();
  }
  let compiler = Compiler::new(CompilerOptions {
    backend: "TPU_JIT".to_string(),
    registry,
    ..Default::default()
  });
  let err = compiler
    .compile_graph(&CompileOptions::default(), "dup", build(), &[int_param(&[2])])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnimplementedOp);
  assert!(err.to_string().contains("DummyDuplicateOp"));
}

#[test]
fn node_with_two_consumers_compiles_deterministically() {
  let build = || {
    let mut b = GraphBuilder::new();
    let a = b.arg("A", DataType::Int32, 0);
    let x = b.unary("B", "Neg", a);
    let y = b.unary("C", "Neg", a);
    let d = b.binary("D", "Add", x, y);
    b.retval("E", d, 0);
    b.finish()
  };
  let args = [int_param(&[2])];
  let first = compiler()
    .compile_graph(&CompileOptions::default(), "dedup", build(), &args)
    .unwrap();
  let second = compiler()
    .compile_graph(&CompileOptions::default(), "dedup", build(), &args)
    .unwrap();
  assert!(first.computation.structurally_equal(&second.computation));
}

fn random_graph(seed: u64, size: usize) -> Graph {
  let mut rng = StdRng::seed_from_u64(seed);
  let mut b = GraphBuilder::new();
  let mut values = vec![b.arg("A", DataType::Int32, 0)];
  for i in 0..size {
    let x = values[rng.gen_range(0..values.len())];
    let y = values[rng.gen_range(0..values.len())];
    let name = format!("n{}", i);
    let next = match rng.gen_range(0..4) {
      0 => b.unary(&name, "Neg", x),
      1 => b.binary(&name, "Add", x, y),
      2 => b.binary(&name, "Sub", x, y),
      _ => b.binary(&name, "Mul", x, y),
    };
    values.push(next);
  }
  let last = values[values.len() - 1];
  b.retval("out", last, 0);
  b.finish()
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(32))]
  #[test]
  fn compilation_is_deterministic(seed in 0u64..10_000, size in 1usize..16) {
    let args = [int_param(&[3])];
    let first = compiler()
      .compile_graph(&CompileOptions::default(), "random", random_graph(seed, size), &args)
      .unwrap();
    let second = compiler()
      .compile_graph(&CompileOptions::default(), "random", random_graph(seed, size), &args)
      .unwrap();
    prop_assert_eq!(first.computation.fingerprint().unwrap(), second.computation.fingerprint().unwrap());
  }
}

fn tensor_array(gradients: &[&str]) -> Argument {
  Argument::tensor_array(DataType::Int32, TensorShape::scalar(), 2, true, gradients.iter().copied())
}

fn grad_node(b: &mut GraphBuilder, name: &str, handle: Output, flow: Output) -> NodeIndex {
  b.op(name, "TensorArrayGradV3")
    .inputs([handle, flow])
    .attr("source", AttrValue::Str(name.to_string()))
    .finish()
}

fn read_node(b: &mut GraphBuilder, handle: Output, index: Output, flow: Output) -> Output {
  b.op("read", "TensorArrayReadV3")
    .inputs([handle, index, flow])
    .attr("dtype", int_type())
    .finish()
    .into()
}

#[test]
fn tensor_arrays_pass_to_and_from_the_computation() {
  let mut b = GraphBuilder::new();
  let arg = b.arg("arg", DataType::Resource, 0);
  let flow = b.constant("flow", Literal::r1::<f32>(&[]));
  let grad1 = grad_node(&mut b, "grad1", arg, flow);
  let grad2 = grad_node(&mut b, "grad2", arg, Output { node: grad1, index: 1 });
  let index = b.constant("index", Literal::r0(1i32));
  let write = b
    .op("write", "TensorArrayWriteV3")
    .inputs([grad1.into(), index, index, Output { node: grad2, index: 1 }])
    .finish();
  let read = read_node(&mut b, arg, index, write.into());
  b.retval("retval", read, 0);

  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", b.finish(), &[tensor_array(&["grad2"])])
    .unwrap();
  assert_eq!(result.resource_updates.len(), 1);
  let update = &result.resource_updates[0];
  assert_eq!(update.input_index, 0);
  assert_eq!(update.dtype, DataType::Int32);
  let accessed: BTreeSet<String> = ["grad1".to_string(), "grad2".to_string()].into();
  assert_eq!(update.tensor_array_gradients_accessed, accessed);

  let input = Literal::tuple(vec![Literal::r1(&[7i32, 42]), Literal::r1(&[-3i32, 101])]);
  let out = execute(&result, &[input]);
  let expected = Literal::tuple(vec![
    Literal::r0(42i32),
    Literal::tuple(vec![
      Literal::r1(&[7i32, 42]),
      Literal::r1(&[0i32, 1]),
      Literal::r1(&[-3i32, 101]),
    ]),
  ]);
  assert_eq!(out, expected);
}

fn size_of_tensor_array(size: i64) -> Result<CompilationResult> {
  let mut b = GraphBuilder::new();
  let arg = b.arg("arg", DataType::Resource, 0);
  let flow = b.constant("flow", Literal::r1::<f32>(&[]));
  let size_node = b.op("size", "TensorArraySizeV3").inputs([arg, flow]).finish();
  b.retval("retval", size_node.into(), 0);
  let args = [Argument::tensor_array(
    DataType::Int32,
    TensorShape::scalar(),
    size,
    true,
    Vec::<String>::new(),
  )];
  compiler().compile_graph(&CompileOptions::default(), "size", b.finish(), &args)
}

#[test]
fn tensor_array_size_is_a_constant() {
  let result = size_of_tensor_array(2).unwrap();
  assert_eq!(result.outputs[0].constant_value, Some(Literal::r0(2i32)));

  let err = size_of_tensor_array(1 << 31).unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
  assert!(err.to_string().contains("does not fit in int32"), "{}", err);
}

fn grad_then_read(source: &str) -> Graph {
  let mut b = GraphBuilder::new();
  let arg = b.arg("arg", DataType::Resource, 0);
  let flow = b.constant("flow", Literal::r1::<f32>(&[]));
  let grad = grad_node(&mut b, source, arg, flow);
  let index = b.constant("index", Literal::r0(1i32));
  let read = read_node(&mut b, arg, index, Output { node: grad, index: 1 });
  b.retval("retval", read, 0);
  b.finish()
}

#[test]
fn unwritten_declared_gradients_are_not_outputs() {
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", grad_then_read("grad1"), &[tensor_array(&["grad1"])])
    .unwrap();
  assert!(result.resource_updates.is_empty());
}

#[test]
fn new_gradients_are_outputs() {
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", grad_then_read("grad2"), &[tensor_array(&["grad1"])])
    .unwrap();
  assert_eq!(result.resource_updates.len(), 1);
  let accessed: BTreeSet<String> = ["grad1".to_string(), "grad2".to_string()].into();
  assert_eq!(result.resource_updates[0].tensor_array_gradients_accessed, accessed);
}

#[test]
fn undefined_function_fails() {
  let err = compiler()
    .compile_function(&CompileOptions::default(), &NameAttrList::new("Function_NotDefined_"), &[])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::FunctionNotFound);
  assert!(err.to_string().contains("is not defined."), "{}", err);
}

#[test]
fn local_function_with_missing_attr_reports_both_lookups() {
  let mut compiler = compiler();
  compiler
    .local_function_library_mut()
    .add_function(x_times_two())
    .unwrap();
  let err = compiler
    .compile_function(&CompileOptions::default(), &NameAttrList::new("XTimesTwo"), &[])
    .unwrap_err();
  let msg = err.to_string();
  assert!(msg.contains("is not defined."), "{}", msg);
  assert!(msg.contains("Attr T is not found"), "{}", msg);
}

#[test]
fn compiles_instantiated_function() {
  let mut compiler = compiler();
  compiler
    .local_function_library_mut()
    .add_function(x_times_two())
    .unwrap();
  let function = NameAttrList::new("XTimesTwo").with_attr("T", int_type());
  let result = compiler
    .compile_function(&CompileOptions::default(), &function, &[int_param(&[3])])
    .unwrap();
  let out = execute(&result, &[Literal::r1(&[1i32, -2, 3])]);
  assert_eq!(out, Literal::tuple(vec![Literal::r1(&[2i32, -4, 6])]));
}

fn fill_fn() -> FunctionDef {
  serde_json::from_str(
    r#"{
      "name": "FillFn",
      "args": [{"name": "x", "type": "T"}, {"name": "dims", "type": "int32"}],
      "rets": [{"name": "y", "type": "T", "source": "y"}],
      "attrs": [{"name": "T", "allowed": ["float32", "float64", "int32", "int64"]}],
      "nodes": [{"name": "y", "op": "Fill", "inputs": ["dims", "x"], "attrs": {"T": {"placeholder": "T"}}}]
    }"#,
  )
  .unwrap()
}

fn fill_call_graph() -> Graph {
  let mut b = GraphBuilder::new();
  let value = b.constant("value", Literal::r0(1i32));
  let shape = b.constant("shape", Literal::r1(&[5i32]));
  let fill = b
    .op("fill", "FillFn")
    .inputs([value, shape])
    .attr("T", int_type())
    .finish();
  b.retval("retval", fill.into(), 0);
  b.finish()
}

#[test]
fn function_call_with_constant_dims() {
  let compiler = Compiler::new(CompilerOptions {
    function_library: Arc::new(FunctionLibrary::from_defs([fill_fn()]).unwrap()),
    ..Default::default()
  });
  let result = compiler
    .compile_graph(&CompileOptions::default(), "fill", fill_call_graph(), &[])
    .unwrap();
  assert!(result.outputs[0].is_constant);
  assert_eq!(result.outputs[0].constant_value, Some(Literal::r1(&[1i32; 5])));
}

#[test]
fn function_with_invalid_op_names_every_offender() {
  let mut fill = fill_fn();
  for (name, op) in [("Invalid", "InvalidOp"), ("Switch", "Switch")] {
    fill.nodes.push(crate::graph::NodeDef {
      name: name.to_string(),
      op: op.to_string(),
      inputs: vec![],
      attrs: Default::default(),
    });
  }
  let compiler = Compiler::new(CompilerOptions {
    function_library: Arc::new(FunctionLibrary::from_defs([fill]).unwrap()),
    ..Default::default()
  });
  let err = compiler
    .compile_graph(&CompileOptions::default(), "fill", fill_call_graph(), &[])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::UnimplementedOp);
  let msg = err.to_string();
  assert!(msg.contains("FillFn:{InvalidOp}"), "{}", msg);
  assert!(msg.contains("Switch"), "{}", msg);
}

/// `V += A; return read(V) + 1`, with the read ordered after the write.
fn variable_graph() -> Graph {
  let mut b = GraphBuilder::new();
  let a = b.arg("A", DataType::Int32, 0);
  let var = b.arg("V", DataType::Resource, 1);
  let write = b.op("W", "AssignAddVariableOp").inputs([var, a]).finish();
  let read = b
    .op("R", "ReadVariableOp")
    .input(var)
    .control_input(write)
    .attr("dtype", int_type())
    .finish();
  let one = b.constant("one", Literal::r0(1i32));
  let sum = b.binary("D", "Add", read.into(), one);
  b.retval("retval", sum, 0);
  b.finish()
}

#[test]
fn variables_are_updated() {
  let args = [
    int_param(&[2]),
    Argument::variable(DataType::Int32, TensorShape::new(vec![2]), true),
  ];
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", variable_graph(), &args)
    .unwrap();
  assert_eq!(result.resource_updates.len(), 1);
  assert_eq!(result.resource_updates[0].input_index, 1);
  assert!(result.resource_updates[0].modified);

  let out = execute(&result, &[Literal::r1(&[-3i32, 101]), Literal::r1(&[7i32, 42])]);
  assert_eq!(
    out,
    Literal::tuple(vec![Literal::r1(&[5i32, 144]), Literal::r1(&[4i32, 143])])
  );
}

#[test]
fn uninitialized_variable_starts_at_zero_and_takes_no_parameter() {
  let args = [
    int_param(&[2]),
    Argument::variable(DataType::Int32, TensorShape::new(vec![2]), false),
  ];
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "add", variable_graph(), &args)
    .unwrap();
  assert_eq!(result.input_mapping, vec![0]);
  let out = execute(&result, &[Literal::r1(&[-3i32, 101])]);
  assert_eq!(
    out,
    Literal::tuple(vec![Literal::r1(&[-2i32, 102]), Literal::r1(&[-3i32, 101])])
  );
}

#[test]
fn unchanged_resources_are_reported_only_on_request() {
  let mut b = GraphBuilder::new();
  let var = b.arg("V", DataType::Resource, 0);
  let read = b
    .op("R", "ReadVariableOp")
    .input(var)
    .attr("dtype", int_type())
    .finish();
  b.retval("retval", read.into(), 0);
  let graph = b.finish();
  let args = [Argument::variable(DataType::Int32, TensorShape::new(vec![2]), true)];

  let result = compiler()
    .compile_graph(&CompileOptions::default(), "read", graph.clone(), &args)
    .unwrap();
  assert!(result.resource_updates.is_empty());

  let options = CompileOptions {
    return_updated_values_for_all_resources: true,
    ..Default::default()
  };
  let result = compiler().compile_graph(&options, "read", graph, &args).unwrap();
  assert_eq!(result.resource_updates.len(), 1);
  assert!(!result.resource_updates[0].modified);
  let out = execute(&result, &[Literal::r1(&[3i32, 4])]);
  assert_eq!(
    out,
    Literal::tuple(vec![Literal::r1(&[3i32, 4]), Literal::r1(&[3i32, 4])])
  );
}

#[test]
fn returning_a_resource_handle_is_rejected() {
  let mut b = GraphBuilder::new();
  let var = b.arg("V", DataType::Resource, 0);
  b.retval("retval", var, 0);
  let args = [Argument::variable(DataType::Int32, TensorShape::scalar(), true)];
  let err = compiler()
    .compile_graph(&CompileOptions::default(), "leak", b.finish(), &args)
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

fn flattening_compiler() -> Compiler {
  Compiler::new(CompilerOptions {
    shape_representation_fn: Some(crate::argument::flattening_shape_representation()),
    ..Default::default()
  })
}

fn square_args() -> [Argument; 2] {
  [
    int_param(&[2, 2]),
    Argument::variable(DataType::Int32, TensorShape::new(vec![2, 2]), true),
  ]
}

#[test]
fn shape_representation_applies_to_resources_only_inside() {
  let options = CompileOptions {
    is_entry_computation: false,
    ..Default::default()
  };
  let result = flattening_compiler()
    .compile_graph(&options, "add", variable_graph(), &square_args())
    .unwrap();
  let flat = |dims: Vec<i64>| Shape::array(DataType::Int32, TensorShape::new(dims));
  let program = LocalClient::new().program_shape(&result.computation);
  assert_eq!(program.parameters, vec![flat(vec![2, 2]), flat(vec![4])]);
  assert_eq!(program.result, Shape::Tuple(vec![flat(vec![2, 2]), flat(vec![4])]));
  assert_eq!(result.input_shapes, program.parameters);
  assert_eq!(result.output_shape, program.result);

  let out = execute(
    &result,
    &[Literal::r2(&[&[4i32, 55], &[1, -3]]), Literal::r1(&[22i32, 11, 33, 404])],
  );
  assert_eq!(
    out,
    Literal::tuple(vec![
      Literal::r2(&[&[27i32, 67], &[35, 402]]),
      Literal::r1(&[26i32, 66, 34, 401]),
    ])
  );
}

#[test]
fn shape_representation_applies_to_entry_boundary() {
  let options = CompileOptions {
    is_entry_computation: true,
    ..Default::default()
  };
  let result = flattening_compiler()
    .compile_graph(&options, "add", variable_graph(), &square_args())
    .unwrap();
  let flat = Shape::array(DataType::Int32, TensorShape::new(vec![4]));
  let program = LocalClient::new().program_shape(&result.computation);
  assert_eq!(program.parameters, vec![flat.clone(), flat.clone()]);
  assert_eq!(program.result, Shape::Tuple(vec![flat.clone(), flat]));
  assert_eq!(result.outputs[0].shape, TensorShape::new(vec![2, 2]));

  let out = execute(
    &result,
    &[Literal::r1(&[4i32, 55, 1, -3]), Literal::r1(&[22i32, 11, 33, 404])],
  );
  assert_eq!(
    out,
    Literal::tuple(vec![
      Literal::r1(&[27i32, 67, 35, 402]),
      Literal::r1(&[26i32, 66, 34, 401]),
    ])
  );
}

#[test]
fn node_with_disallowed_type_attr_fails() {
  let mut graph = Graph::new();
  let shape = graph.add_node(
    Node::new("Shape", "Shape")
      .with_attr("T", int_type())
      .with_attr("out_type", AttrValue::Type(DataType::Bool)),
  );
  graph.add_control_edge(graph.source(), shape);

  let err = compiler()
    .compile_graph(&CompileOptions::default(), "invalid_type", graph, &[])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidAttribute);
  assert!(err.to_string().contains("is not in the list of allowed values"), "{}", err);
}

#[test]
fn single_op_without_inputs_needs_fixup() {
  let mut graph = Graph::new();
  graph.add_node(Node::new("NoOp", "NoOp"));

  let err = compiler()
    .compile_graph(&CompileOptions::default(), "NoOp", graph.clone(), &[])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidGraph);
  assert!(err
    .to_string()
    .contains("The following nodes are unreachable from the source in the graph: NoOp"));

  let options = CompileOptions {
    fixup_source_and_sink_edges: true,
    ..Default::default()
  };
  let result = compiler().compile_graph(&options, "NoOp", graph.clone(), &[]).unwrap();
  assert!(result.resource_updates.is_empty());

  assert!(fixup_source_and_sink_edges(&mut graph));
  let result = compiler()
    .compile_graph(&CompileOptions::default(), "NoOp", graph, &[])
    .unwrap();
  assert!(result.resource_updates.is_empty());
  assert_eq!(execute(&result, &[]), Literal::tuple(vec![]));
}

#[test]
fn invalid_arguments_are_rejected_before_compiling() {
  let mut arg = int_param(&[2]);
  arg.kind = ArgumentKind::Constant;
  let err = compiler()
    .compile_graph(&CompileOptions::default(), "bad", GraphBuilder::new().finish(), &[arg])
    .unwrap_err();
  assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
