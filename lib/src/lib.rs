//! Compiles typed dataflow graphs into a lowered tensor IR.
//!
//! A [`Compiler`] takes a [`Graph`] (or a function from its libraries) plus one [`Argument`] per
//! entry value and returns a [`CompilationResult`]: the IR computation, a description of every
//! output, and the resource arguments the computation writes back.

pub mod argument;
pub mod compiler;
pub mod const_analysis;
pub mod error;
pub mod function;
pub mod graph;
pub mod inline;
pub mod ir;
pub mod literal;
pub mod lower;
pub mod ops;
pub mod prepare;
pub mod resource;
pub mod resource_store;
pub mod subcommands;
pub mod types;
pub mod utils;

pub use argument::{Argument, ArgumentKind, ResourceKind, ShapeRepresentationFn};
pub use compiler::{
  CompilationResult, CompileOptions, Compiler, CompilerOptions, OutputDescription, ResourceUpdate,
};
pub use error::{Error, ErrorKind, Result};
pub use function::{FunctionDef, FunctionLibrary, NameAttrList};
pub use graph::{Graph, GraphBuilder, GraphDef};
pub use ir::{Computation, LocalClient};
pub use literal::Literal;
pub use ops::{OpRegistry, DEVICE_CPU_JIT, DEVICE_GPU_JIT};
pub use resource_store::{PopulateFn, ResourceStore};
pub use types::{DataType, TensorShape};
