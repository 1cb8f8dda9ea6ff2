//! # dwarfbind-core
//!
//! Python `ctypes` bindings from DWARF debug information.
//!
//! This crate provides the generation engine:
//! - Loading ELF and Mach-O images and their DWARF into a [`DieForest`]
//! - Resolving debug-info entries to deduplicated type descriptors
//! - Reconstructing byte-exact record layouts, bitfields included
//! - Applying caller hints (renames, nested type names, overrides)
//! - Rendering the python module and checking its layouts
//!
//! ## Entry Points
//!
//! ```rust,no_run
//! use dwarfbind_core::{generate, load_images, GenerateOptions, TypeRequest};
//!
//! # fn main() -> dwarfbind_core::Result<()>
//! # {
//! let forest = load_images(&["libwidget.so"])?;
//! let options = GenerateOptions::new("widget").with_type(TypeRequest::new("Widget"))?;
//! let module = generate(&forest, &options)?;
//! std::fs::write("widget.py", &module.source)?;
//! # Ok(())
//! # }
//! ```
//!
//! Fatal problems are [`BindError`]s; everything recoverable is collected
//! in [`GeneratedModule::diagnostics`].

pub mod diagnostics;
pub mod die;
pub mod emit;
pub mod error;
pub mod expression;
pub mod filter;
pub mod generate;
pub mod image;
pub mod layout;
pub mod macros;
pub mod manifest;
pub mod pyident;
pub mod request;
pub mod resolver;
pub mod symbols;
pub mod types;
pub mod verify;

// Re-export commonly used types
pub use diagnostics::{Diagnostic, Diagnostics, Subject};
pub use die::{DieAttrs, DieForest, DieId, DieRef, ForestBuilder, QualifiedName, Tag};
pub use error::{BindError, Result};
pub use generate::{generate, inspect, FunctionBinding, GenerateOptions, GeneratedModule, GlobalBinding};
pub use image::load_images;
pub use macros::MacroSource;
pub use manifest::ModuleManifest;
pub use request::{FieldHint, NameSelection, NestedType, SymbolKind, SymbolPattern, TypeMatch, TypeRequest, TypeSelection};
pub use resolver::TypeResolver;
pub use types::{Category, TypeId, TypeKey};
