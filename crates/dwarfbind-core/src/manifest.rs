//! Sidecar describing what a generated module defines.
//!
//! A later generation run reads the manifests of earlier modules and reuses
//! their types through `External` descriptors instead of defining them again.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BindError, Result};
use crate::types::TypeKey;

/// One type a module defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestType
{
    pub key: TypeKey,
    pub python_name: String,
    pub size: u64,
    pub align: u64,
    #[serde(default)]
    pub has_pointers: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest
{
    /// Python module name, used as the import name
    pub module: String,
    pub types: Vec<ManifestType>,
    /// Every top-level name the module binds
    #[serde(default)]
    pub names: BTreeSet<String>,
}

impl ModuleManifest
{
    pub fn new(module: impl Into<String>) -> Self
    {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn lookup(&self, key: &TypeKey) -> Option<&ManifestType>
    {
        self.types.iter().find(|entry| &entry.key == key)
    }

    pub fn defines_name(&self, name: &str) -> bool
    {
        self.names.contains(name)
    }

    pub fn to_json(&self) -> Result<String>
    {
        serde_json::to_string_pretty(self).map_err(|err| BindError::Config(format!("manifest encoding failed: {err}")))
    }

    pub fn from_json(text: &str) -> Result<Self>
    {
        serde_json::from_str(text).map_err(|err| BindError::Config(format!("invalid manifest: {err}")))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let manifest = Self::from_json(&text)
            .map_err(|err| BindError::Config(format!("{}: {err}", path.display())))?;
        debug!(
            "Loaded manifest for {} ({} types) from {}",
            manifest.module,
            manifest.types.len(),
            path.display()
        );
        Ok(manifest)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()>
    {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::die::QualifiedName;
    use crate::types::Category;

    #[test]
    fn test_lookup_by_identity()
    {
        let mut manifest = ModuleManifest::new("netbase");
        manifest.types.push(ManifestType {
            key: TypeKey::new(Category::Struct, QualifiedName::parse("Packet")),
            python_name: "struct_Packet".to_string(),
            size: 16,
            align: 8,
            has_pointers: true,
        });

        let key = TypeKey::new(Category::Struct, QualifiedName::parse("Packet"));
        assert_eq!(manifest.lookup(&key).map(|entry| entry.size), Some(16));

        let typedef = TypeKey::new(Category::Typedef, QualifiedName::parse("Packet"));
        assert!(manifest.lookup(&typedef).is_none());
    }

    #[test]
    fn test_json_shape()
    {
        let text = r#"{
            "module": "base",
            "types": [
                { "key": { "category": "union", "name": ["ns", "Value"] },
                  "python_name": "union_ns_cn_cn_Value", "size": 8, "align": 8 }
            ]
        }"#;
        let manifest = ModuleManifest::from_json(text).unwrap();
        assert_eq!(manifest.types[0].key.name.to_string(), "ns::Value");
        assert!(!manifest.types[0].has_pointers);
        assert!(manifest.names.is_empty());

        assert!(matches!(ModuleManifest::from_json("{"), Err(BindError::Config(_))));
    }
}
