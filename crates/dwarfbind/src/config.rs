//! JSON generation requests.
//!
//! ```json
//! {
//!   "module": "widget",
//!   "libraries": ["libwidget.so"],
//!   "types": [{ "name": "Widget", "fields": { "u": { "type": "WidgetUnion" } } }],
//!   "functions": ["widget_open"],
//!   "globals": ["widget_count"],
//!   "symbol_patterns": [{ "kind": "function", "pattern": "widget_close(_v\\d+)?" }],
//!   "existing": ["base.py.manifest.json"],
//!   "headers": ["include/widget.h"],
//!   "deep_inspect": true
//! }
//! ```
//!
//! Relative paths are taken relative to the current directory.

use std::fs;
use std::path::{Path, PathBuf};

use dwarfbind_core::{
    BindError, GenerateOptions, MacroSource, ModuleManifest, NameSelection, Result, SymbolPattern, TypeRequest,
    TypeSelection,
};
use serde::Deserialize;
use tracing::debug;

/// One generation session as described in a configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerateConfig
{
    /// Python module name; the output file stem when absent
    pub module: Option<String>,
    pub libraries: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub types: Vec<TypeRequest>,
    pub functions: Vec<String>,
    pub globals: Vec<String>,
    pub symbol_patterns: Vec<SymbolPattern>,
    /// Manifests of modules to import types from
    pub existing: Vec<PathBuf>,
    /// Headers scanned for `#define`s
    pub headers: Vec<PathBuf>,
    pub deep_inspect: bool,
    pub nameless_enums: bool,
    pub header: Option<String>,
    pub trailer: Option<String>,
}

impl GenerateConfig
{
    /// Read a configuration file.
    ///
    /// ## Errors
    ///
    /// `Io` when the file cannot be read, `Config` when it is not a valid
    /// configuration document.
    pub fn load(path: &Path) -> Result<Self>
    {
        let text = fs::read_to_string(path)?;
        let config = Self::from_json(&text).map_err(|err| BindError::Config(format!("{}: {err}", path.display())))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self>
    {
        serde_json::from_str(text).map_err(|err| BindError::Config(err.to_string()))
    }

    /// Module name: explicit, else the output file stem, else `bindings`.
    pub fn module_name(&self) -> String
    {
        self.module.clone().unwrap_or_else(|| {
            self.output
                .as_deref()
                .and_then(Path::file_stem)
                .map_or_else(|| "bindings".to_string(), |stem| stem.to_string_lossy().into_owned())
        })
    }

    /// Build generation options, reading every referenced manifest and
    /// header.
    ///
    /// ## Errors
    ///
    /// Any manifest or header that cannot be read.
    pub fn into_options(self) -> Result<GenerateOptions>
    {
        let module_name = self.module_name();
        let existing = self.existing.iter().map(ModuleManifest::load).collect::<Result<Vec<_>>>()?;
        let macro_sources = self.headers.iter().map(MacroSource::read).collect::<Result<Vec<_>>>()?;

        Ok(GenerateOptions {
            module_name,
            types: TypeSelection::Requests(self.types),
            functions: NameSelection::Names(self.functions),
            globals: NameSelection::Names(self.globals),
            symbol_patterns: self.symbol_patterns,
            existing,
            namespace_filter: None,
            macro_sources,
            deep_inspect: self.deep_inspect,
            nameless_enums: self.nameless_enums,
            header: self.header,
            trailer: self.trailer,
        })
    }
}

/// Where the manifest for `output` goes: `widget.py` gets
/// `widget.py.manifest.json`.
pub fn manifest_path(output: &Path) -> PathBuf
{
    let mut name = output.as_os_str().to_owned();
    name.push(".manifest.json");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_full_document()
    {
        let config = GenerateConfig::from_json(
            r#"{
                "libraries": ["libwidget.so"],
                "output": "out/widget.py",
                "types": [
                    { "name": "Widget", "pack": true,
                      "fields": { "u": { "type": { "name": "WidgetUnion", "elements": ["union"] } },
                                  "cb": { "ctype": "c_void_p" } } }
                ],
                "functions": ["widget_open"],
                "symbol_patterns": [{ "kind": "variable", "pattern": "widget_.*_count" }],
                "deep_inspect": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.module_name(), "widget");
        assert_eq!(config.types[0].name, "Widget");
        assert!(config.types[0].pack);
        assert_eq!(config.types[0].fields["cb"].ctype.as_deref(), Some("c_void_p"));
        assert_eq!(config.symbol_patterns[0], SymbolPattern::variable("widget_.*_count"));

        let options = config.into_options().unwrap();
        assert_eq!(options.module_name, "widget");
        assert!(options.deep_inspect);
        assert_eq!(options.functions.listed().len(), 1);
    }

    #[test]
    fn test_unknown_keys_are_rejected()
    {
        assert!(matches!(
            GenerateConfig::from_json(r#"{ "tpyes": [] }"#),
            Err(BindError::Config(_))
        ));
    }

    #[test]
    fn test_defaults()
    {
        let config = GenerateConfig::from_json("{}").unwrap();
        assert_eq!(config.module_name(), "bindings");
        assert!(config.libraries.is_empty());
    }

    #[test]
    fn test_manifest_path()
    {
        assert_eq!(
            manifest_path(Path::new("out/widget.py")),
            PathBuf::from("out/widget.py.manifest.json")
        );
    }
}
