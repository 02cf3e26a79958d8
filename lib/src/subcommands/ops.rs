use crate::ops::OpRegistry;

/// Lists the operations the builtin registry can lower for one backend.
pub struct Ops {
  backend: String,
}

impl Ops {
  pub fn new(backend: &str) -> Self {
    Self {
      backend: backend.to_string(),
    }
  }

  pub fn run(self) -> Vec<String> {
    OpRegistry::global().op_names(&self.backend)
  }
}
