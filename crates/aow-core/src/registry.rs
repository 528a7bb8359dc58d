//! Generic resource registry: directory-of-YAML-files loading, indexed
//! lookup by name. Used by the AAT Registry to load archetype definitions at
//! startup.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{AowError, AowResult};

/// Common trait for all resource registries.
pub trait Registry<T> {
    /// Load all resources from a directory of `.yaml`/`.yml` files.
    fn load_directory(&mut self, path: &Path) -> AowResult<usize>;

    fn get(&self, name: &str) -> Option<&T>;

    fn get_all(&self) -> Vec<&T>;

    fn register(&mut self, resource: T) -> AowResult<()>;

    fn count(&self) -> usize;

    fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

pub(crate) fn load_yaml_file<T: serde::de::DeserializeOwned>(path: &Path) -> AowResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AowError::config(format!("failed to read resource file {}: {}", path.display(), e))
    })?;
    serde_yaml::from_str(&content).map_err(|e| {
        AowError::config(format!("failed to parse resource file {}: {}", path.display(), e))
    })
}

pub(crate) fn load_yaml_directory<T: serde::de::DeserializeOwned>(
    dir: &Path,
) -> AowResult<Vec<T>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AowError::config(format!("failed to read directory {}: {}", dir.display(), e))
    })?;
    for entry in entries {
        let entry = entry.map_err(|e| AowError::config(e.to_string()))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yaml" || e == "yml")
            .unwrap_or(false);
        if is_yaml {
            out.push(load_yaml_file(&path)?);
        }
    }
    Ok(out)
}

#[derive(Debug, Default)]
pub struct AatRegistryStore {
    aats: HashMap<String, crate::model::Aat>,
}

impl AatRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry<crate::model::Aat> for AatRegistryStore {
    fn load_directory(&mut self, path: &Path) -> AowResult<usize> {
        let loaded: Vec<crate::model::Aat> = load_yaml_directory(path)?;
        let count = loaded.len();
        for aat in loaded {
            self.register(aat)?;
        }
        Ok(count)
    }

    fn get(&self, name: &str) -> Option<&crate::model::Aat> {
        self.aats.get(name)
    }

    fn get_all(&self) -> Vec<&crate::model::Aat> {
        self.aats.values().collect()
    }

    fn register(&mut self, resource: crate::model::Aat) -> AowResult<()> {
        self.aats.insert(resource.id.clone(), resource);
        Ok(())
    }

    fn count(&self) -> usize {
        self.aats.len()
    }
}
