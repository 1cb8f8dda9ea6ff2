//! # Error Types
//!
//! Fatal error handling for binding generation.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and readable messages. Recoverable problems never show up here: they are
//! collected as [`crate::diagnostics::Diagnostic`] values instead, so a single
//! missing symbol cannot block generation of everything else.

use thiserror::Error;

/// Main error type for generation
///
/// Every variant aborts the artifact being generated. Emitting a wrong
/// signature or layout for a load-bearing symbol risks memory corruption at
/// call time, which is strictly worse than a failed build.
///
/// ## Error Categories
///
/// 1. **Type errors**: UnrepresentableType
/// 2. **Symbol errors**: AmbiguousSymbol
/// 3. **Input errors**: InvalidRequest, Config
/// 4. **Container errors**: Dwarf, Object
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum BindError
{
    /// A primitive type or debug-info construct has no `ctypes` equivalent
    ///
    /// This happens when:
    /// - A base type name is not in the primitive table and is not a complex float
    /// - A 128-bit integer is used on a 32-bit target
    /// - A type reference points at a DIE tag the resolver does not model
    #[error("no ctypes representation for {name}: {reason}")]
    UnrepresentableType
    {
        /// Qualified name of the offending type
        name: String,
        /// Why it cannot be represented
        reason: String,
    },

    /// A linker-name pattern matched zero or several symbols
    ///
    /// Patterns are resolved against every loaded image's exported symbols in
    /// raw and demangled form. Exactly one distinct symbol must match.
    #[error("symbol pattern `{pattern}` must match exactly one symbol, found {}: {candidates:?}", .candidates.len())]
    AmbiguousSymbol
    {
        /// The regular expression as supplied
        pattern: String,
        /// Every matching linker name (empty when nothing matched)
        candidates: Vec<String>,
    },

    /// A caller request is malformed
    ///
    /// Examples:
    /// - A symbol pattern that is not a valid regular expression
    /// - A type request with an empty python name
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The DWARF sections of an image could not be parsed
    #[error("DWARF error: {0}")]
    Dwarf(String),

    /// The object container (ELF, Mach-O) could not be parsed
    #[error("Object file error: {0}")]
    Object(String),

    /// Configuration or manifest documents could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (reading binaries, headers, manifests)
    ///
    /// This is a standard Rust `std::io::Error` converted to our error type.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, BindError>`
///
/// ```rust
/// use dwarfbind_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, BindError>;

/// Map a gimli DWARF error to a `BindError` with context.
///
/// `context` describes what was being read when the error occurred
/// (e.g., "parsing .debug_info").
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> BindError
{
    BindError::Dwarf(format!("{context}: {err}"))
}
