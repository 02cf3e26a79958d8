use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;
use tracing::debug;

use super::{eval, Computation, Instruction, IrOp, Opcode, ProgramShape, Shape};
use crate::error::{Error, Result};
use crate::literal::Literal;
use crate::types::{DataType, TensorShape};

/// Largest array [`IrBuilder::compute_constant`] will materialize.
pub const MAX_FOLDED_ELEMENTS: i64 = 1 << 24;

/// Appends instructions in definition order. Every method validates operand
/// shapes eagerly, so a finished computation is always well-typed.
#[derive(Debug)]
pub struct IrBuilder {
  name: String,
  instructions: Vec<Instruction>,
  parameters: BTreeMap<usize, IrOp>,
  name_counts: HashMap<String, usize>,
  constness: HashMap<IrOp, bool>,
}

impl IrBuilder {
  pub fn new(name: &str) -> Self {
    IrBuilder {
      name: name.to_string(),
      instructions: vec![],
      parameters: BTreeMap::new(),
      name_counts: HashMap::new(),
      constness: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn num_instructions(&self) -> usize {
    self.instructions.len()
  }

  fn push(&mut self, opcode: Opcode, shape: Shape, operands: Vec<IrOp>) -> IrOp {
    let prefix = opcode.mnemonic();
    let count = self.name_counts.entry(prefix.to_string()).or_insert(0);
    let name = format!("{}.{}", prefix, count);
    *count += 1;
    let op = IrOp(self.instructions.len());
    self.instructions.push(Instruction {
      name,
      opcode,
      shape,
      operands,
    });
    op
  }

  fn check(&self, op: IrOp) -> Result<()> {
    if op.0 >= self.instructions.len() {
      return Err(Error::InternalError(format!("unknown IR handle %{}", op.0)));
    }
    Ok(())
  }

  pub fn shape(&self, op: IrOp) -> Result<&Shape> {
    self.check(op)?;
    Ok(&self.instructions[op.0].shape)
  }

  pub fn array_shape(&self, op: IrOp) -> Result<(DataType, TensorShape)> {
    let (dtype, dims) = self.shape(op)?.as_array()?;
    Ok((dtype, dims.clone()))
  }

  pub fn parameter(&mut self, number: usize, shape: Shape) -> Result<IrOp> {
    if self.parameters.contains_key(&number) {
      return Err(Error::InternalError(format!("parameter {} defined twice", number)));
    }
    let op = self.push(Opcode::Parameter(number), shape, vec![]);
    self.parameters.insert(number, op);
    Ok(op)
  }

  pub fn constant(&mut self, literal: Literal) -> IrOp {
    let shape = Shape::of_literal(&literal);
    self.push(Opcode::Constant(literal), shape, vec![])
  }

  pub fn zeros(&mut self, dtype: DataType, dims: &TensorShape) -> Result<IrOp> {
    Ok(self.constant(Literal::zeros(dtype, dims)?))
  }

  fn binary(&mut self, opcode: Opcode, a: IrOp, b: IrOp) -> Result<IrOp> {
    let lhs = self.array_shape(a)?;
    let rhs = self.array_shape(b)?;
    if lhs != rhs {
      return Err(Error::InvalidArgument(format!(
        "{} requires identical operand shapes, got {}{} and {}{}",
        opcode.mnemonic(),
        lhs.0,
        lhs.1,
        rhs.0,
        rhs.1
      )));
    }
    if !lhs.0.is_numeric() {
      return Err(Error::InvalidArgument(format!(
        "{} is not defined for {}",
        opcode.mnemonic(),
        lhs.0
      )));
    }
    Ok(self.push(opcode, Shape::array(lhs.0, lhs.1), vec![a, b]))
  }

  pub fn add(&mut self, a: IrOp, b: IrOp) -> Result<IrOp> {
    self.binary(Opcode::Add, a, b)
  }

  pub fn sub(&mut self, a: IrOp, b: IrOp) -> Result<IrOp> {
    self.binary(Opcode::Subtract, a, b)
  }

  pub fn mul(&mut self, a: IrOp, b: IrOp) -> Result<IrOp> {
    self.binary(Opcode::Multiply, a, b)
  }

  pub fn neg(&mut self, a: IrOp) -> Result<IrOp> {
    let (dtype, dims) = self.array_shape(a)?;
    if !dtype.is_numeric() {
      return Err(Error::InvalidArgument(format!("negate is not defined for {}", dtype)));
    }
    Ok(self.push(Opcode::Negate, Shape::array(dtype, dims), vec![a]))
  }

  pub fn convert(&mut self, a: IrOp, to: DataType) -> Result<IrOp> {
    let (dtype, dims) = self.array_shape(a)?;
    if dtype == to {
      return Ok(a);
    }
    if to == DataType::Resource {
      return Err(Error::InvalidArgument("cannot convert to resource".to_string()));
    }
    Ok(self.push(Opcode::Convert, Shape::array(to, dims), vec![a]))
  }

  /// No-op when the shape already matches.
  pub fn reshape(&mut self, a: IrOp, dims: &TensorShape) -> Result<IrOp> {
    let (dtype, current) = self.array_shape(a)?;
    if current == *dims {
      return Ok(a);
    }
    if !dims.is_valid()
      || dims.checked_num_elements().is_none()
      || current.num_elements() != dims.num_elements()
    {
      return Err(Error::InvalidArgument(format!(
        "cannot reshape {} into {}",
        current, dims
      )));
    }
    Ok(self.push(Opcode::Reshape, Shape::array(dtype, dims.clone()), vec![a]))
  }

  pub fn broadcast(&mut self, a: IrOp, dims: &TensorShape, dimensions: Vec<usize>) -> Result<IrOp> {
    let (dtype, operand) = self.array_shape(a)?;
    let ok = dims.checked_num_elements().is_some()
      && dimensions.len() == operand.rank()
      && dimensions.iter().tuple_windows().all(|(x, y)| x < y)
      && dimensions.iter().enumerate().all(|(i, d)| {
        *d < dims.rank() && (operand.dims()[i] == dims.dims()[*d] || operand.dims()[i] == 1)
      });
    if !ok {
      return Err(Error::InvalidArgument(format!(
        "cannot broadcast {} into {} along {:?}",
        operand, dims, dimensions
      )));
    }
    Ok(self.push(
      Opcode::Broadcast { dimensions },
      Shape::array(dtype, dims.clone()),
      vec![a],
    ))
  }

  /// NumPy-style broadcast: trailing dimensions align.
  pub fn broadcast_to(&mut self, a: IrOp, dims: &TensorShape) -> Result<IrOp> {
    let (_, operand) = self.array_shape(a)?;
    if operand == *dims {
      return Ok(a);
    }
    if operand.rank() > dims.rank() {
      return Err(Error::InvalidArgument(format!(
        "cannot broadcast {} into {}",
        operand, dims
      )));
    }
    let offset = dims.rank() - operand.rank();
    self.broadcast(a, dims, (offset..dims.rank()).collect())
  }

  pub fn tuple(&mut self, elements: Vec<IrOp>) -> Result<IrOp> {
    let shapes = elements
      .iter()
      .map(|e| self.shape(*e).cloned())
      .collect::<Result<Vec<_>>>()?;
    Ok(self.push(Opcode::Tuple, Shape::Tuple(shapes), elements))
  }

  pub fn get_tuple_element(&mut self, t: IrOp, index: usize) -> Result<IrOp> {
    let element = self
      .shape(t)?
      .tuple_elements()?
      .get(index)
      .cloned()
      .ok_or_else(|| Error::InvalidArgument(format!("tuple has no element {}", index)))?;
    Ok(self.push(Opcode::GetTupleElement(index), element, vec![t]))
  }

  fn check_start_indices(&self, starts: &[IrOp], rank: usize) -> Result<()> {
    if starts.len() != rank {
      return Err(Error::InvalidArgument(format!(
        "expected {} start indices, got {}",
        rank,
        starts.len()
      )));
    }
    for s in starts {
      let (dtype, dims) = self.array_shape(*s)?;
      if !dtype.is_integer() || dims.rank() != 0 {
        return Err(Error::InvalidArgument(format!(
          "start indices must be integer scalars, got {}{}",
          dtype, dims
        )));
      }
    }
    Ok(())
  }

  /// Start indices are clamped at run time so the slice stays in bounds.
  pub fn dynamic_slice(&mut self, a: IrOp, starts: &[IrOp], sizes: &[i64]) -> Result<IrOp> {
    let (dtype, dims) = self.array_shape(a)?;
    self.check_start_indices(starts, dims.rank())?;
    if sizes.len() != dims.rank() || sizes.iter().zip(dims.dims()).any(|(s, d)| *s < 0 || s > d) {
      return Err(Error::InvalidArgument(format!(
        "slice sizes {:?} do not fit {}",
        sizes, dims
      )));
    }
    let mut operands = vec![a];
    operands.extend_from_slice(starts);
    Ok(self.push(
      Opcode::DynamicSlice {
        sizes: sizes.to_vec(),
      },
      Shape::array(dtype, TensorShape::new(sizes.to_vec())),
      operands,
    ))
  }

  pub fn dynamic_update_slice(&mut self, a: IrOp, update: IrOp, starts: &[IrOp]) -> Result<IrOp> {
    let (dtype, dims) = self.array_shape(a)?;
    let (update_dtype, update_dims) = self.array_shape(update)?;
    self.check_start_indices(starts, dims.rank())?;
    if dtype != update_dtype
      || update_dims.rank() != dims.rank()
      || update_dims.dims().iter().zip(dims.dims()).any(|(u, d)| u > d)
    {
      return Err(Error::InvalidArgument(format!(
        "cannot update {}{} with {}{}",
        dtype, dims, update_dtype, update_dims
      )));
    }
    let mut operands = vec![a, update];
    operands.extend_from_slice(starts);
    Ok(self.push(
      Opcode::DynamicUpdateSlice,
      Shape::array(dtype, dims),
      operands,
    ))
  }

  /// True when no parameter is reachable from `op`.
  pub fn is_constant(&mut self, op: IrOp) -> Result<bool> {
    self.check(op)?;
    if let Some(known) = self.constness.get(&op) {
      return Ok(*known);
    }
    let mut seen = HashSet::new();
    let mut stack = vec![op];
    let mut constant = true;
    while let Some(current) = stack.pop() {
      if !seen.insert(current) {
        continue;
      }
      let inst = &self.instructions[current.0];
      if matches!(inst.opcode, Opcode::Parameter(_)) {
        constant = false;
        break;
      }
      stack.extend(inst.operands.iter().copied());
    }
    self.constness.insert(op, constant);
    Ok(constant)
  }

  /// Evaluates a parameter-free subcomputation.
  pub fn compute_constant(&mut self, op: IrOp) -> Result<Literal> {
    if !self.is_constant(op)? {
      return Err(Error::InternalError(format!(
        "{} depends on a parameter",
        self.instructions[op.0].name
      )));
    }
    if let Shape::Array { dims, .. } = &self.instructions[op.0].shape {
      if dims.num_elements() > MAX_FOLDED_ELEMENTS {
        return Err(Error::InvalidArgument(format!(
          "{} of shape {} is too large to evaluate at compile time (limit {} elements)",
          self.instructions[op.0].name,
          dims,
          MAX_FOLDED_ELEMENTS
        )));
      }
    }
    eval::evaluate(&self.instructions, op, &[])
  }

  /// Finalizes with `root` as the result. Parameters must be numbered `0..n`.
  pub fn build(self, root: IrOp) -> Result<Computation> {
    self.check(root)?;
    if let Some((i, (n, _))) = self
      .parameters
      .iter()
      .enumerate()
      .find(|(i, (n, _))| *i != **n)
    {
      return Err(Error::InternalError(format!(
        "parameter numbers are not dense: expected {}, found {}",
        i, n
      )));
    }
    let parameters = self
      .parameters
      .values()
      .map(|p| self.instructions[p.0].shape.clone())
      .collect();
    let program_shape = ProgramShape {
      parameters,
      result: self.instructions[root.0].shape.clone(),
    };
    debug!(
      "built computation {} with {} instructions: {}",
      self.name,
      self.instructions.len(),
      program_shape
    );
    Ok(Computation {
      name: self.name,
      instructions: self.instructions,
      root,
      program_shape,
    })
  }
}
