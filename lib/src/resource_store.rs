use std::{
  any::Any,
  collections::HashMap,
  fmt,
  sync::Arc,
};

use crate::error::{Error, Result};

pub const DEFAULT_CONTAINER: &str = "localhost";

/// Host-side objects keyed by `(container, name)`. A fresh store is created
/// for every compilation and handed to the population callback once.
#[derive(Default)]
pub struct ResourceStore {
  entries: HashMap<(String, String), Arc<dyn Any + Send + Sync>>,
}

/// Seeds the store before lowering starts.
pub type PopulateFn = Arc<dyn Fn(&mut ResourceStore) -> Result<()> + Send + Sync>;

impl ResourceStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn default_container(&self) -> &'static str {
    DEFAULT_CONTAINER
  }

  pub fn create<T: Any + Send + Sync>(&mut self, container: &str, name: &str, value: Arc<T>) -> Result<()> {
    let key = (container.to_string(), name.to_string());
    if self.entries.contains_key(&key) {
      return Err(Error::AlreadyExists(format!("resource {}/{}", container, name)));
    }
    self.entries.insert(key, value);
    Ok(())
  }

  pub fn lookup<T: Any + Send + Sync>(&self, container: &str, name: &str) -> Result<Arc<T>> {
    let entry = self
      .entries
      .get(&(container.to_string(), name.to_string()))
      .ok_or_else(|| Error::NotFound(format!("resource {}/{}", container, name)))?;
    entry.clone().downcast::<T>().map_err(|_| {
      Error::InvalidArgument(format!(
        "resource {}/{} holds a different type than {}",
        container,
        name,
        std::any::type_name::<T>()
      ))
    })
  }

  pub fn contains(&self, container: &str, name: &str) -> bool {
    self
      .entries
      .contains_key(&(container.to_string(), name.to_string()))
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

impl fmt::Debug for ResourceStore {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut keys: Vec<_> = self.entries.keys().collect();
    keys.sort();
    f.debug_struct("ResourceStore").field("entries", &keys).finish()
  }
}
