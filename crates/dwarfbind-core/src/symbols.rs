//! Exported symbol tables.
//!
//! Each loaded image carries the names its dynamic symbol table exports,
//! indexed both by name and by address. The address index lets one function
//! definition be decorated under every alias the linker gave it.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use rustc_demangle::try_demangle;
use smallvec::SmallVec;

use crate::error::{BindError, Result};

/// Linker-visible names of one image.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable
{
    names: BTreeMap<String, u64>,
    by_address: BTreeMap<u64, SmallVec<[String; 2]>>,
}

impl SymbolTable
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Record a defined symbol.
    ///
    /// Zero-sized symbols are known by name but never map an address: they
    /// are markers, not functions or objects.
    pub fn insert(&mut self, name: impl Into<String>, address: u64, size: u64)
    {
        let name = name.into();
        if size > 0 {
            let aliases = self.by_address.entry(address).or_default();
            if !aliases.contains(&name) {
                aliases.push(name.clone());
            }
        }
        self.names.insert(name, address);
    }

    pub fn contains(&self, name: &str) -> bool
    {
        self.names.contains_key(name)
    }

    pub fn address_of(&self, name: &str) -> Option<u64>
    {
        self.names.get(name).copied()
    }

    /// Every exported name at `address`.
    pub fn names_at(&self, address: u64) -> &[String]
    {
        self.by_address.get(&address).map_or(&[], |names| names.as_slice())
    }

    pub fn has_address(&self, address: u64) -> bool
    {
        self.by_address.contains_key(&address)
    }

    pub fn names(&self) -> impl Iterator<Item = &str>
    {
        self.names.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize
    {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.names.is_empty()
    }

    /// Names whose raw or demangled form matches `pattern`.
    ///
    /// The pattern should be anchored; [`find_unique`] anchors it.
    pub fn matching<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = &'a str>
    {
        self.names().filter(move |name| symbol_matches(pattern, name))
    }
}

fn symbol_matches(pattern: &Regex, name: &str) -> bool
{
    if pattern.is_match(name) {
        return true;
    }
    match try_demangle(name) {
        // `{:#}` drops the trailing hash so patterns can name the path only.
        Ok(demangled) => pattern.is_match(&format!("{demangled:#}")),
        Err(_) => false,
    }
}

/// Resolve `pattern` to the single linker name it denotes across `tables`.
///
/// ## Errors
///
/// - `InvalidRequest` if the pattern is not a valid regular expression
/// - `AmbiguousSymbol` unless exactly one distinct name matches
pub fn find_unique<'a>(pattern: &str, tables: impl IntoIterator<Item = &'a SymbolTable>) -> Result<String>
{
    let regex = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|err| BindError::InvalidRequest(format!("bad symbol pattern `{pattern}`: {err}")))?;
    let mut candidates = BTreeSet::new();
    for table in tables {
        candidates.extend(table.matching(&regex).map(str::to_string));
    }
    if candidates.len() == 1 {
        if let Some(name) = candidates.pop_first() {
            return Ok(name);
        }
    }
    Err(BindError::AmbiguousSymbol {
        pattern: pattern.to_string(),
        candidates: candidates.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn table() -> SymbolTable
    {
        let mut table = SymbolTable::new();
        table.insert("widget_open", 0x1000, 64);
        table.insert("widget_open_v2", 0x1000, 64);
        table.insert("widget_close", 0x1040, 32);
        table.insert("_end", 0x9000, 0);
        table
    }

    #[test]
    fn test_aliases_share_address()
    {
        let table = table();
        assert_eq!(table.names_at(0x1000), ["widget_open", "widget_open_v2"]);
        assert!(table.names_at(0x9000).is_empty());
        assert!(table.contains("_end"));
        assert_eq!(table.address_of("widget_close"), Some(0x1040));
    }

    #[test]
    fn test_find_unique_requires_single_match()
    {
        let table = table();
        assert_eq!(find_unique("widget_c.*", [&table]).unwrap(), "widget_close");

        match find_unique("widget_open.*", [&table]) {
            Err(BindError::AmbiguousSymbol { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected AmbiguousSymbol, got {other:?}"),
        }
        assert!(matches!(
            find_unique("nothing_here", [&table]),
            Err(BindError::AmbiguousSymbol { .. })
        ));
        assert!(matches!(find_unique("(", [&table]), Err(BindError::InvalidRequest(_))));
    }

    #[test]
    fn test_pattern_must_cover_whole_name()
    {
        let table = table();
        // "widget_clos" is a prefix of a symbol, not a match for it.
        assert!(find_unique("widget_clos", [&table]).is_err());
    }
}
