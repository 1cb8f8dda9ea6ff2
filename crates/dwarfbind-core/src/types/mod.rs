//! # Type Descriptors
//!
//! One descriptor per canonical identity, the `(Category, QualifiedName)`
//! [`TypeKey`]. Descriptors live in the resolver's arena and refer to each
//! other by [`TypeId`], so self-referential and mutually recursive pointer
//! graphs need no owning cycles.
//!
//! ## Lifecycle
//!
//! ```text
//! Unresolved ──declare──> Declared ──define──> Defined
//! ```
//!
//! Transitions are monotonic. A record whose only DIE is a declaration
//! stays `Declared`; members of that type fall back to opaque bytes.

pub mod primitive;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use primitive::PrimitiveInfo;

use crate::die::{DieId, QualifiedName, Tag};
use crate::layout::RecordLayout;

/// Index of a descriptor in its resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) usize);

/// Coarse kind of a type, derived from its DIE tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category
{
    Void,
    Base,
    Pointer,
    Array,
    Typedef,
    Const,
    Volatile,
    Restrict,
    Enum,
    Struct,
    Class,
    Union,
    Subroutine,
    Subprogram,
}

impl Category
{
    /// `None` for tags that do not describe a type.
    pub fn from_tag(tag: Tag) -> Option<Self>
    {
        Some(match tag {
            Tag::BaseType => Category::Base,
            Tag::Pointer | Tag::Reference | Tag::RvalueReference | Tag::PtrToMember | Tag::Unspecified => {
                Category::Pointer
            }
            Tag::Array => Category::Array,
            Tag::Typedef => Category::Typedef,
            Tag::Const => Category::Const,
            Tag::Volatile => Category::Volatile,
            Tag::Restrict => Category::Restrict,
            Tag::Enumeration => Category::Enum,
            Tag::Structure => Category::Struct,
            Tag::Class => Category::Class,
            Tag::Union => Category::Union,
            Tag::Subroutine => Category::Subroutine,
            Tag::Subprogram => Category::Subprogram,
            _ => return None,
        })
    }

    /// Prefix that keeps tagged C types apart from typedefs of the same name.
    pub fn tag_prefix(self) -> &'static str
    {
        match self {
            Category::Struct => "struct_",
            Category::Union => "union_",
            Category::Enum => "enum_",
            _ => "",
        }
    }

    /// Struct, union and enum: the types C keeps in the tag namespace.
    pub fn is_tagged(self) -> bool
    {
        matches!(self, Category::Struct | Category::Union | Category::Enum)
    }

    pub fn is_record(self) -> bool
    {
        matches!(self, Category::Struct | Category::Class | Category::Union)
    }
}

impl fmt::Display for Category
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Category::Void => "void",
            Category::Base => "base",
            Category::Pointer => "pointer",
            Category::Array => "array",
            Category::Typedef => "typedef",
            Category::Const => "const",
            Category::Volatile => "volatile",
            Category::Restrict => "restrict",
            Category::Enum => "enum",
            Category::Struct => "struct",
            Category::Class => "class",
            Category::Union => "union",
            Category::Subroutine => "subroutine",
            Category::Subprogram => "subprogram",
        };
        f.write_str(label)
    }
}

/// Canonical identity of a type within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeKey
{
    pub category: Category,
    pub name: QualifiedName,
}

impl TypeKey
{
    pub fn new(category: Category, name: QualifiedName) -> Self
    {
        Self { category, name }
    }

    pub fn void() -> Self
    {
        Self::new(Category::Void, QualifiedName::default())
    }

    /// `struct_ns::Foo` style name: tag prefix plus the C++ spelling.
    pub fn flat_name(&self, with_tag: bool) -> String
    {
        if self.category == Category::Void {
            return "void".to_string();
        }
        let prefix = if with_tag { self.category.tag_prefix() } else { "" };
        format!("{prefix}{}", self.name)
    }
}

impl fmt::Display for TypeKey
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} {}", self.category, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TypeState
{
    Unresolved,
    Declared,
    Defined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qualifier
{
    Const,
    Volatile,
    Restrict,
}

impl Qualifier
{
    /// Name of the identity wrapper the generated prelude defines.
    pub fn wrapper(self) -> &'static str
    {
        match self {
            Qualifier::Const => "CONST",
            Qualifier::Volatile => "VOLATILE",
            Qualifier::Restrict => "RESTRICT",
        }
    }
}

/// One field of a record before layout.
#[derive(Debug, Clone)]
pub struct Member
{
    /// Real name, `__anon__member__N` or `__super__N`
    pub name: String,
    pub die: DieId,
    pub ty: TypeId,
    pub inheritance: bool,
    pub anonymous: bool,
    pub ctype_override: Option<String>,
    pub allow_unaligned: bool,
}

#[derive(Debug, Clone)]
pub struct RecordInfo
{
    pub union: bool,
    pub members: Vec<Member>,
    pub members_found: bool,
    pub super_count: usize,
    /// Python base class, `Structure`/`Union` unless a request overrides it
    pub base: String,
    pub mixins: Vec<String>,
    pub pack_requested: bool,
    /// Every field may hold unaligned pointers
    pub unaligned_ptrs: bool,
    pub layout: Option<RecordLayout>,
}

impl RecordInfo
{
    pub fn new(union: bool) -> Self
    {
        Self {
            union,
            members: Vec::new(),
            members_found: false,
            super_count: 0,
            base: if union { "Union" } else { "Structure" }.to_string(),
            mixins: Vec::new(),
            pack_requested: false,
            unaligned_ptrs: false,
            layout: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnumInfo
{
    /// Emit enumerators at module level instead of inside the class
    pub nameless: bool,
    pub enumerators: Vec<(String, i64)>,
    pub underlying: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub struct FunctionSig
{
    pub ret: Option<TypeId>,
    pub params: Vec<TypeId>,
}

/// A type already defined by a previously generated module.
#[derive(Debug, Clone)]
pub struct ExternalInfo
{
    pub module: String,
    pub python_name: String,
    pub size: u64,
    pub align: u64,
    pub has_pointers: bool,
}

#[derive(Debug, Clone)]
pub enum TypeKind
{
    Void,
    Primitive
    {
        info: PrimitiveInfo,
        ctype: String,
        align: u64,
    },
    Pointer
    {
        /// `None` for `void *` and unspecified types
        target: Option<TypeId>,
        byte_size: u64,
    },
    Array
    {
        element: TypeId,
        /// Outermost first
        dims: Vec<u64>,
    },
    Typedef
    {
        target: Option<TypeId>,
    },
    Qualified
    {
        qualifier: Qualifier,
        target: Option<TypeId>,
    },
    Enum(EnumInfo),
    Record(RecordInfo),
    /// A function type reached through a pointer
    Function(FunctionSig),
    /// A function definition, used for `restype`/`argtypes`
    FunctionDef(FunctionSig),
    External(ExternalInfo),
}

/// Canonical binding-side type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor
{
    pub key: TypeKey,
    /// The DIE that first produced this descriptor (`None` for void)
    pub die: Option<DieId>,
    /// Defining DIE, resolved lazily from `die`
    pub(crate) definition: Option<DieId>,
    pub state: TypeState,
    pub kind: TypeKind,
    /// Set once a definition was attempted and could not be produced
    pub(crate) define_failed: bool,
}

impl TypeDescriptor
{
    pub fn is_defined(&self) -> bool
    {
        self.state == TypeState::Defined
    }

    pub fn is_external(&self) -> bool
    {
        matches!(self.kind, TypeKind::External(_))
    }

    pub fn record(&self) -> Option<&RecordInfo>
    {
        match &self.kind {
            TypeKind::Record(record) => Some(record),
            _ => None,
        }
    }

    pub(crate) fn record_mut(&mut self) -> Option<&mut RecordInfo>
    {
        match &mut self.kind {
            TypeKind::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// A unit of generated output, in the order it must appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission
{
    /// Forward declaration (record class or typedef alias)
    Declare(TypeId),
    /// Full definition (record body or enum class)
    Define(TypeId),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_flat_names()
    {
        let key = TypeKey::new(Category::Struct, QualifiedName::parse("net::Packet"));
        assert_eq!(key.flat_name(true), "struct_net::Packet");
        assert_eq!(key.flat_name(false), "net::Packet");

        let class = TypeKey::new(Category::Class, QualifiedName::parse("Widget"));
        assert_eq!(class.flat_name(true), "Widget");
        assert_eq!(TypeKey::void().flat_name(true), "void");
    }

    #[test]
    fn test_reference_tags_are_pointers()
    {
        assert_eq!(Category::from_tag(Tag::Reference), Some(Category::Pointer));
        assert_eq!(Category::from_tag(Tag::PtrToMember), Some(Category::Pointer));
        assert_eq!(Category::from_tag(Tag::Member), None);
        assert!(Category::Union.is_tagged());
        assert!(!Category::Class.is_tagged());
    }
}
