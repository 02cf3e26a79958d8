use thiserror::Error;

/// Every failure aborts the whole compilation; nothing is downgraded to a warning.
#[derive(Debug, Error)]
pub enum Error {
  /// Nodes unreachable from the source (or unable to reach the sink), or a cyclic graph.
  #[error("invalid graph: {0}")]
  InvalidGraph(String),

  /// No lowering routine on the active backend. Function inlining aggregates
  /// every offending operation into one message.
  #[error("unimplemented: {0}")]
  UnimplementedOp(String),

  /// A data-dependent value reached an input that must be known at compile time.
  #[error("{0}")]
  ConstantExpected(String),

  /// Function missing from both local and global tables (or malformed in one of them).
  #[error("{0}")]
  FunctionNotFound(String),

  #[error("{0}")]
  InvalidAttribute(String),

  /// A lowering routine broke its output arity contract. Engine or routine defect.
  #[error("internal: {0}")]
  InternalError(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// Raised by the reference IR client, never by the compiler itself.
  #[error("execution failed: {0}")]
  Execution(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Serde(#[from] serde_json::Error),
}

/// Fieldless mirror of [`Error`] for matching on the category only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  InvalidGraph,
  UnimplementedOp,
  ConstantExpected,
  FunctionNotFound,
  InvalidAttribute,
  InternalError,
  InvalidArgument,
  NotFound,
  AlreadyExists,
  Execution,
  Io,
  Serde,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Error::InvalidGraph(_) => ErrorKind::InvalidGraph,
      Error::UnimplementedOp(_) => ErrorKind::UnimplementedOp,
      Error::ConstantExpected(_) => ErrorKind::ConstantExpected,
      Error::FunctionNotFound(_) => ErrorKind::FunctionNotFound,
      Error::InvalidAttribute(_) => ErrorKind::InvalidAttribute,
      Error::InternalError(_) => ErrorKind::InternalError,
      Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
      Error::NotFound(_) => ErrorKind::NotFound,
      Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
      Error::Execution(_) => ErrorKind::Execution,
      Error::Io(_) => ErrorKind::Io,
      Error::Serde(_) => ErrorKind::Serde,
    }
  }

  /// Appends node context (`[[Node: ...]]`) to a message-carrying error.
  /// Wrapped io/serde errors are returned untouched.
  pub fn with_context(self, context: &str) -> Self {
    let attach = |msg: String| format!("{}\n\t{}", msg, context);
    match self {
      Error::InvalidGraph(m) => Error::InvalidGraph(attach(m)),
      Error::UnimplementedOp(m) => Error::UnimplementedOp(attach(m)),
      Error::ConstantExpected(m) => Error::ConstantExpected(attach(m)),
      Error::FunctionNotFound(m) => Error::FunctionNotFound(attach(m)),
      Error::InvalidAttribute(m) => Error::InvalidAttribute(attach(m)),
      Error::InternalError(m) => Error::InternalError(attach(m)),
      Error::InvalidArgument(m) => Error::InvalidArgument(attach(m)),
      Error::NotFound(m) => Error::NotFound(attach(m)),
      Error::AlreadyExists(m) => Error::AlreadyExists(attach(m)),
      Error::Execution(m) => Error::Execution(attach(m)),
      other => other,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
