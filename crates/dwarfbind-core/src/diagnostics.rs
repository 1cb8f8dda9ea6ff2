//! Recoverable problems found while generating a module.
//!
//! Every [`Diagnostic`] is logged at `warn` the moment it is recorded and kept
//! in a [`Diagnostics`] sink that is handed back with the generated artifact.

use std::fmt;

use thiserror::Error;
use tracing::warn;

/// What kind of entity a [`Diagnostic::MissingDefinition`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject
{
    Type,
    Function,
    Variable,
    Symbol,
}

impl fmt::Display for Subject
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let text = match self {
            Subject::Type => "type",
            Subject::Function => "function",
            Subject::Variable => "variable",
            Subject::Symbol => "symbol",
        };
        f.write_str(text)
    }
}

/// A recoverable problem. Generation continues after each one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic
{
    /// A requested name was never found as a true definition
    #[error("{subject} {name} not found")]
    MissingDefinition
    {
        subject: Subject,
        name: String,
    },

    /// A type was located but no full definition exists in any input
    ///
    /// Types depending on it degrade to opaque byte arrays.
    #[error("incomplete type {name}: {detail}")]
    IncompleteType
    {
        name: String,
        detail: String,
    },

    /// Computed size or offset diverges from what the compiler recorded
    #[error("layout mismatch in {type_name}: {detail}")]
    LayoutMismatch
    {
        type_name: String,
        detail: String,
    },

    /// A pointer-bearing field sits at a misaligned offset
    #[error("unaligned ptr field {field} in {type_name}: offset={offset} [{misalignment}]")]
    UnalignedPointer
    {
        type_name: String,
        field: String,
        offset: u64,
        misalignment: u64,
    },

    /// Something was deliberately left out of the generated module
    #[error("skipped {subject}: {reason}")]
    Skipped
    {
        subject: String,
        reason: String,
    },
}

/// Accumulates diagnostics for one generation session.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics
{
    entries: Vec<Diagnostic>,
}

impl Diagnostics
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record a diagnostic and log it.
    pub fn push(&mut self, diagnostic: Diagnostic)
    {
        warn!("{diagnostic}");
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>)
    {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic>
    {
        self.entries.iter()
    }

    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic>
    {
        self.entries
    }
}

impl<'a> IntoIterator for &'a Diagnostics
{
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter
    {
        self.entries.iter()
    }
}
