//! Target IR: a flat list of instructions in definition order, each naming its
//! operands by handle. A built [`Computation`] is immutable.

pub mod builder;
pub mod client;
pub mod eval;

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub use builder::{IrBuilder, MAX_FOLDED_ELEMENTS};
pub use client::LocalClient;

use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::types::{DataType, TensorShape};

/// Handle to an instruction inside one builder / computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IrOp(pub(crate) usize);

impl IrOp {
  pub fn id(&self) -> usize {
    self.0
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
  Array { dtype: DataType, dims: TensorShape },
  Tuple(Vec<Shape>),
}

impl Shape {
  pub fn array(dtype: DataType, dims: TensorShape) -> Self {
    Shape::Array { dtype, dims }
  }

  pub fn is_tuple(&self) -> bool {
    matches!(self, Shape::Tuple(_))
  }

  pub fn as_array(&self) -> Result<(DataType, &TensorShape)> {
    match self {
      Shape::Array { dtype, dims } => Ok((*dtype, dims)),
      Shape::Tuple(_) => Err(Error::InvalidArgument(format!(
        "expected an array shape, got {}",
        self
      ))),
    }
  }

  pub fn tuple_elements(&self) -> Result<&[Shape]> {
    match self {
      Shape::Tuple(elements) => Ok(elements),
      Shape::Array { .. } => Err(Error::InvalidArgument(format!(
        "expected a tuple shape, got {}",
        self
      ))),
    }
  }

  pub fn of_literal(literal: &Literal) -> Shape {
    match literal {
      Literal::Array { shape, data } => Shape::array(data.dtype(), shape.clone()),
      Literal::Tuple(elements) => Shape::Tuple(elements.iter().map(Shape::of_literal).collect()),
    }
  }
}

impl fmt::Display for Shape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Shape::Array { dtype, dims } => write!(f, "{}{}", dtype, dims),
      Shape::Tuple(elements) => write!(f, "({})", elements.iter().join(", ")),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
  Parameter(usize),
  Constant(Literal),
  Add,
  Subtract,
  Multiply,
  Negate,
  Convert,
  Reshape,
  /// `dimensions[i]` is the output dimension operand dimension `i` maps to.
  Broadcast { dimensions: Vec<usize> },
  Tuple,
  GetTupleElement(usize),
  /// Operands: array, then one scalar start index per dimension.
  DynamicSlice { sizes: Vec<i64> },
  /// Operands: array, update, then one scalar start index per dimension.
  DynamicUpdateSlice,
}

impl Opcode {
  pub fn mnemonic(&self) -> &'static str {
    match self {
      Opcode::Parameter(_) => "parameter",
      Opcode::Constant(_) => "constant",
      Opcode::Add => "add",
      Opcode::Subtract => "subtract",
      Opcode::Multiply => "multiply",
      Opcode::Negate => "negate",
      Opcode::Convert => "convert",
      Opcode::Reshape => "reshape",
      Opcode::Broadcast { .. } => "broadcast",
      Opcode::Tuple => "tuple",
      Opcode::GetTupleElement(_) => "get-tuple-element",
      Opcode::DynamicSlice { .. } => "dynamic-slice",
      Opcode::DynamicUpdateSlice => "dynamic-update-slice",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
  pub name: String,
  pub opcode: Opcode,
  pub shape: Shape,
  pub operands: Vec<IrOp>,
}

impl fmt::Display for Instruction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let extra = match &self.opcode {
      Opcode::Parameter(n) => format!("{}", n),
      Opcode::Constant(lit) => format!("{}", lit),
      Opcode::GetTupleElement(i) => format!("index={}", i),
      Opcode::Broadcast { dimensions } => format!("dimensions={{{}}}", dimensions.iter().join(",")),
      Opcode::DynamicSlice { sizes } => format!("sizes={{{}}}", sizes.iter().join(",")),
      _ => String::new(),
    };
    let operands = self.operands.iter().map(|o| format!("%{}", o.0));
    write!(
      f,
      "{} = {} {}({})",
      self.name,
      self.shape,
      self.opcode.mnemonic(),
      operands.chain((!extra.is_empty()).then_some(extra)).join(", ")
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramShape {
  pub parameters: Vec<Shape>,
  pub result: Shape,
}

impl fmt::Display for ProgramShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({}) -> {}", self.parameters.iter().join(", "), self.result)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Computation {
  pub name: String,
  pub instructions: Vec<Instruction>,
  pub root: IrOp,
  pub program_shape: ProgramShape,
}

impl Computation {
  pub fn instruction(&self, op: IrOp) -> &Instruction {
    &self.instructions[op.0]
  }

  pub fn root_instruction(&self) -> &Instruction {
    self.instruction(self.root)
  }

  pub fn num_parameters(&self) -> usize {
    self.program_shape.parameters.len()
  }

  /// Serialized instruction stream with names stripped: two computations with
  /// the same fingerprint compute the same thing the same way.
  pub fn fingerprint(&self) -> Result<String> {
    #[derive(Serialize)]
    struct Unnamed<'a> {
      opcode: &'a Opcode,
      shape: &'a Shape,
      operands: &'a [IrOp],
    }
    let stream: Vec<Unnamed<'_>> = self
      .instructions
      .iter()
      .map(|i| Unnamed {
        opcode: &i.opcode,
        shape: &i.shape,
        operands: &i.operands,
      })
      .collect();
    Ok(serde_json::to_string(&(stream, self.root, &self.program_shape))?)
  }

  pub fn structurally_equal(&self, other: &Computation) -> bool {
    match (self.fingerprint(), other.fingerprint()) {
      (Ok(a), Ok(b)) => a == b,
      _ => false,
    }
  }
}

impl fmt::Display for Computation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "computation {} {} {{", self.name, self.program_shape)?;
    for (i, inst) in self.instructions.iter().enumerate() {
      let marker = if IrOp(i) == self.root { "ROOT " } else { "" };
      writeln!(f, "  %{}: {}{}", i, marker, inst)?;
    }
    write!(f, "}}")
  }
}
