//! Caller intent: which types, functions and globals to bind, and how.
//!
//! Requests deserialize from the JSON configuration the command line reads;
//! every optional field defaults to "no override".

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::die::{DieRef, QualifiedName};
use crate::pyident::as_python_id;
use crate::types::Category;

/// Type named by a field hint: a bare python name, or a full request with
/// its own field hints for nested anonymous types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NestedType
{
    Name(String),
    Request(Box<TypeRequest>),
}

impl NestedType
{
    pub fn into_request(self) -> TypeRequest
    {
        match self {
            NestedType::Name(name) => TypeRequest::new(name),
            NestedType::Request(request) => *request,
        }
    }
}

/// Override for one member of a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FieldHint
{
    /// Python name for the member's type
    #[serde(rename = "type")]
    pub nested: Option<NestedType>,
    /// Alternative field name
    pub rename: Option<String>,
    /// Literal ctypes spelling used instead of the member's type
    pub ctype: Option<String>,
    pub allow_unaligned: bool,
}

/// A type the caller wants, optionally under another name or with a
/// modified layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeRequest
{
    /// Name to give the type in python
    pub name: String,
    /// C++ qualified name to look for; `name` when absent
    pub c_name: Option<String>,
    /// Base class instead of `Structure`/`Union`
    pub base: Option<String>,
    pub pack: bool,
    pub mixins: Option<Vec<String>>,
    pub nameless_enum: Option<bool>,
    /// Restrict the request to these categories
    pub elements: Option<Vec<Category>>,
    pub unaligned_ptrs: bool,
    pub fields: BTreeMap<String, FieldHint>,
}

impl TypeRequest
{
    pub fn new(name: impl Into<String>) -> Self
    {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn c_name(mut self, name: impl Into<String>) -> Self
    {
        self.c_name = Some(name.into());
        self
    }

    pub fn base(mut self, base: impl Into<String>) -> Self
    {
        self.base = Some(base.into());
        self
    }

    pub fn pack(mut self) -> Self
    {
        self.pack = true;
        self
    }

    pub fn mixin(mut self, mixin: impl Into<String>) -> Self
    {
        self.mixins.get_or_insert_with(Vec::new).push(mixin.into());
        self
    }

    pub fn nameless_enum(mut self, nameless: bool) -> Self
    {
        self.nameless_enum = Some(nameless);
        self
    }

    pub fn elements(mut self, elements: Vec<Category>) -> Self
    {
        self.elements = Some(elements);
        self
    }

    pub fn unaligned_ptrs(mut self) -> Self
    {
        self.unaligned_ptrs = true;
        self
    }

    /// Attach a hint for member `field`.
    pub fn field(mut self, field: impl Into<String>, hint: FieldHint) -> Self
    {
        self.fields.insert(field.into(), hint);
        self
    }

    /// The C++ name the request is looking for.
    pub fn source_name(&self) -> QualifiedName
    {
        QualifiedName::parse(self.c_name.as_deref().unwrap_or(&self.name))
    }

    /// `name` as a python identifier.
    pub fn python_name(&self) -> String
    {
        as_python_id(&self.name)
    }

    pub fn applies_to(&self, category: Category) -> bool
    {
        self.elements
            .as_ref()
            .map_or(true, |elements| elements.contains(&category))
    }
}

impl FieldHint
{
    pub fn rename(name: impl Into<String>) -> Self
    {
        Self {
            rename: Some(name.into()),
            ..Self::default()
        }
    }

    /// Name the member's (usually anonymous) type.
    pub fn named_type(nested: impl Into<NestedType>) -> Self
    {
        Self {
            nested: Some(nested.into()),
            ..Self::default()
        }
    }

    pub fn ctype(ctype: impl Into<String>) -> Self
    {
        Self {
            ctype: Some(ctype.into()),
            ..Self::default()
        }
    }

    pub fn allow_unaligned() -> Self
    {
        Self {
            allow_unaligned: true,
            ..Self::default()
        }
    }
}

impl From<&str> for NestedType
{
    fn from(name: &str) -> Self
    {
        NestedType::Name(name.to_string())
    }
}

impl From<TypeRequest> for NestedType
{
    fn from(request: TypeRequest) -> Self
    {
        NestedType::Request(Box::new(request))
    }
}

/// Answer of a type predicate for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeMatch
{
    Skip,
    Include,
    Hinted(TypeRequest),
}

/// Decides about one named type DIE.
pub type TypePredicate = Box<dyn Fn(&DieRef<'_>) -> TypeMatch>;
/// Decides about one function, variable or scope DIE.
pub type NamePredicate = Box<dyn Fn(&DieRef<'_>) -> bool>;

/// Which types to generate.
pub enum TypeSelection
{
    Requests(Vec<TypeRequest>),
    /// Forces a full traversal, every scope is a candidate
    Predicate(TypePredicate),
}

impl Default for TypeSelection
{
    fn default() -> Self
    {
        TypeSelection::Requests(Vec::new())
    }
}

impl fmt::Debug for TypeSelection
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            TypeSelection::Requests(requests) => f.debug_tuple("Requests").field(requests).finish(),
            TypeSelection::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Which functions or global variables to generate.
pub enum NameSelection
{
    Names(Vec<String>),
    Predicate(NamePredicate),
}

impl NameSelection
{
    pub fn none() -> Self
    {
        NameSelection::Names(Vec::new())
    }

    pub fn is_predicate(&self) -> bool
    {
        matches!(self, NameSelection::Predicate(_))
    }

    /// Qualified names listed explicitly; empty for a predicate.
    pub fn listed(&self) -> Vec<QualifiedName>
    {
        match self {
            NameSelection::Names(names) => names.iter().map(|name| QualifiedName::parse(name)).collect(),
            NameSelection::Predicate(_) => Vec::new(),
        }
    }

    pub fn accepts(&self, die: &DieRef<'_>) -> bool
    {
        match self {
            NameSelection::Names(names) => {
                let name = die.fullname();
                names.iter().any(|wanted| QualifiedName::parse(wanted) == name)
            }
            NameSelection::Predicate(predicate) => predicate(die),
        }
    }
}

impl Default for NameSelection
{
    fn default() -> Self
    {
        Self::none()
    }
}

impl fmt::Debug for NameSelection
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            NameSelection::Names(names) => f.debug_tuple("Names").field(names).finish(),
            NameSelection::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind
{
    Function,
    Variable,
}

/// A regular expression over exported symbol names that must match exactly
/// one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolPattern
{
    pub kind: SymbolKind,
    pub pattern: String,
}

impl SymbolPattern
{
    pub fn function(pattern: impl Into<String>) -> Self
    {
        Self {
            kind: SymbolKind::Function,
            pattern: pattern.into(),
        }
    }

    pub fn variable(pattern: impl Into<String>) -> Self
    {
        Self {
            kind: SymbolKind::Variable,
            pattern: pattern.into(),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::die::{DieAttrs, ForestBuilder, Tag};

    #[test]
    fn test_request_from_json()
    {
        let json = r#"{
            "name": "Packet",
            "c_name": "net::packet",
            "pack": true,
            "elements": ["struct"],
            "fields": {
                "hdr": { "type": "PacketHeader" },
                "flags": { "ctype": "c_uint", "allow_unaligned": true },
                "body": { "type": { "name": "Body", "fields": { "u": { "rename": "payload" } } } }
            }
        }"#;
        let request: TypeRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.source_name().to_string(), "net::packet");
        assert!(request.pack);
        assert!(request.applies_to(Category::Struct));
        assert!(!request.applies_to(Category::Typedef));
        assert_eq!(request.fields["hdr"].nested, Some(NestedType::Name("PacketHeader".to_string())));
        assert!(request.fields["flags"].allow_unaligned);

        let body = request.fields["body"].nested.clone().unwrap().into_request();
        assert_eq!(body.name, "Body");
        assert_eq!(body.fields["u"].rename.as_deref(), Some("payload"));
    }

    #[test]
    fn test_unknown_hint_key_rejected()
    {
        let result = serde_json::from_str::<FieldHint>(r#"{ "typename": "X" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_name_selection()
    {
        let mut builder = ForestBuilder::new();
        let image = builder.add_image("librun.so");
        let unit = builder.add_unit(image, None);
        let ns = builder.add(unit, Tag::Namespace, DieAttrs::new().name("ns"));
        let scoped = builder.add(ns, Tag::Subprogram, DieAttrs::new().name("run"));
        let global = builder.add(unit, Tag::Subprogram, DieAttrs::new().name("run"));
        let forest = builder.finish();

        let names = NameSelection::Names(vec!["ns::run".to_string()]);
        assert!(names.accepts(&forest.die(scoped)));
        assert!(!names.accepts(&forest.die(global)));

        let everything = NameSelection::Predicate(Box::new(|_| true));
        assert!(everything.is_predicate());
        assert!(everything.listed().is_empty());
    }
}
