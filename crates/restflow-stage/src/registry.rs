use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::stage::Stage;

/// Stages available to a run, keyed by descriptor name.
#[derive(Clone, Default)]
pub struct StageRegistry {
  stages: BTreeMap<String, Arc<dyn Stage>>,
}

impl StageRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, stage: Arc<dyn Stage>) -> Result<(), RegistryError> {
    let name = stage.describe().name.clone();
    if self.stages.contains_key(&name) {
      return Err(RegistryError::DuplicateStage(name));
    }
    self.stages.insert(name, stage);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Result<Arc<dyn Stage>, RegistryError> {
    self
      .stages
      .get(name)
      .cloned()
      .ok_or_else(|| RegistryError::UnknownStage(name.to_string()))
  }

  pub fn contains(&self, name: &str) -> bool {
    self.stages.contains_key(name)
  }
}

impl std::fmt::Debug for StageRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StageRegistry")
      .field("stages", &self.stages.keys().collect::<Vec<_>>())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::builtin::Merge;
  use crate::port::PortType;

  #[test]
  fn test_register_and_get() {
    let mut registry = StageRegistry::new();
    registry
      .register(Arc::new(Merge::new("translist", 2, PortType::Transform)))
      .unwrap();

    assert!(registry.contains("translist"));
    assert_eq!(registry.get("translist").unwrap().describe().inputs.len(), 2);
  }

  #[test]
  fn test_duplicate_rejected() {
    let mut registry = StageRegistry::new();
    registry
      .register(Arc::new(Merge::new("translist", 2, PortType::Transform)))
      .unwrap();

    let err = registry
      .register(Arc::new(Merge::new("translist", 3, PortType::Transform)))
      .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateStage(name) if name == "translist"));
  }

  #[test]
  fn test_unknown_stage() {
    let registry = StageRegistry::new();
    assert!(matches!(
      registry.get("moco"),
      Err(RegistryError::UnknownStage(name)) if name == "moco"
    ));
  }
}
