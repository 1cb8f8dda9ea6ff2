//! # Debug Information Entries
//!
//! An owned, immutable arena of DWARF DIEs across every loaded image.
//!
//! The arena is built once, either by the [`crate::image`] loader from real
//! binaries or by [`ForestBuilder`] in tests, and never mutates afterwards.
//! Everything downstream refers to entries through copyable [`DieId`]
//! indices; cross references (`DW_AT_type`, `DW_AT_specification`) are
//! already resolved to indices when the forest is finished.
//!
//! ## Naming
//!
//! A DIE's qualified name is the chain of enclosing namespace, structure,
//! class and union names plus its own. Entries with `DW_AT_specification`
//! borrow the name of their specification, and unnamed entries are given a
//! synthetic `anon_<image>_<offset>` name that is unique within one load.

mod builder;

use std::fmt;

use gimli::constants;
use serde::{Deserialize, Serialize};

pub use builder::ForestBuilder;

use crate::symbols::SymbolTable;

/// Index of a DIE in its [`DieForest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DieId(pub(crate) usize);

impl DieId
{
    pub fn index(self) -> usize
    {
        self.0
    }
}

/// Index of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageIndex(pub(crate) usize);

/// The DWARF tags the generator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag
{
    CompileUnit,
    PartialUnit,
    Namespace,
    Structure,
    Class,
    Union,
    Enumeration,
    Enumerator,
    Typedef,
    BaseType,
    Pointer,
    Reference,
    RvalueReference,
    PtrToMember,
    Unspecified,
    Array,
    Subrange,
    Const,
    Volatile,
    Restrict,
    Subroutine,
    Subprogram,
    FormalParameter,
    Member,
    Inheritance,
    Variable,
    TemplateTypeParam,
    TemplateValueParam,
    ImportedDeclaration,
    Other(u16),
}

impl Tag
{
    /// `DW_TAG_GNU_template_parameter_pack`
    pub const GNU_TEMPLATE_PARAMETER_PACK: Tag = Tag::Other(0x4107);

    pub fn from_dwarf(tag: gimli::DwTag) -> Self
    {
        match tag {
            constants::DW_TAG_compile_unit => Tag::CompileUnit,
            constants::DW_TAG_partial_unit => Tag::PartialUnit,
            constants::DW_TAG_namespace => Tag::Namespace,
            constants::DW_TAG_structure_type => Tag::Structure,
            constants::DW_TAG_class_type => Tag::Class,
            constants::DW_TAG_union_type => Tag::Union,
            constants::DW_TAG_enumeration_type => Tag::Enumeration,
            constants::DW_TAG_enumerator => Tag::Enumerator,
            constants::DW_TAG_typedef => Tag::Typedef,
            constants::DW_TAG_base_type => Tag::BaseType,
            constants::DW_TAG_pointer_type => Tag::Pointer,
            constants::DW_TAG_reference_type => Tag::Reference,
            constants::DW_TAG_rvalue_reference_type => Tag::RvalueReference,
            constants::DW_TAG_ptr_to_member_type => Tag::PtrToMember,
            constants::DW_TAG_unspecified_type => Tag::Unspecified,
            constants::DW_TAG_array_type => Tag::Array,
            constants::DW_TAG_subrange_type => Tag::Subrange,
            constants::DW_TAG_const_type => Tag::Const,
            constants::DW_TAG_volatile_type => Tag::Volatile,
            constants::DW_TAG_restrict_type => Tag::Restrict,
            constants::DW_TAG_subroutine_type => Tag::Subroutine,
            constants::DW_TAG_subprogram => Tag::Subprogram,
            constants::DW_TAG_formal_parameter => Tag::FormalParameter,
            constants::DW_TAG_member => Tag::Member,
            constants::DW_TAG_inheritance => Tag::Inheritance,
            constants::DW_TAG_variable => Tag::Variable,
            constants::DW_TAG_template_type_parameter => Tag::TemplateTypeParam,
            constants::DW_TAG_template_value_parameter => Tag::TemplateValueParam,
            constants::DW_TAG_imported_declaration => Tag::ImportedDeclaration,
            other => Tag::Other(other.0),
        }
    }

    /// Tags whose name becomes a scope of the names nested inside them.
    pub fn is_scope(self) -> bool
    {
        matches!(self, Tag::Namespace | Tag::Structure | Tag::Class | Tag::Union)
    }

    pub fn is_unit(self) -> bool
    {
        matches!(self, Tag::CompileUnit | Tag::PartialUnit)
    }
}

/// Attributes of one DIE. Absent attributes are `None`/`false`.
///
/// The setters consume and return `self` so synthetic entries read like the
/// DWARF they stand for:
///
/// ```rust
/// use dwarfbind_core::die::DieAttrs;
///
/// let attrs = DieAttrs::new().name("flags").bit_size(3).data_bit_offset(32);
/// assert_eq!(attrs.name.as_deref(), Some("flags"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DieAttrs
{
    pub name: Option<String>,
    pub linkage_name: Option<String>,
    pub byte_size: Option<u64>,
    pub bit_size: Option<u64>,
    /// Legacy (DWARF 2/3) big-endian-relative bit offset.
    pub bit_offset: Option<u64>,
    pub data_bit_offset: Option<u64>,
    pub member_location: Option<u64>,
    pub count: Option<u64>,
    pub upper_bound: Option<i64>,
    pub type_ref: Option<DieId>,
    pub specification: Option<DieId>,
    pub declaration: bool,
    pub external: bool,
    pub low_pc: Option<u64>,
    pub const_value: Option<i64>,
    pub encoding: Option<u8>,
    pub producer: Option<String>,
}

impl DieAttrs
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self
    {
        self.name = Some(name.into());
        self
    }

    pub fn linkage_name(mut self, name: impl Into<String>) -> Self
    {
        self.linkage_name = Some(name.into());
        self
    }

    pub fn byte_size(mut self, size: u64) -> Self
    {
        self.byte_size = Some(size);
        self
    }

    pub fn bit_size(mut self, bits: u64) -> Self
    {
        self.bit_size = Some(bits);
        self
    }

    pub fn bit_offset(mut self, bits: u64) -> Self
    {
        self.bit_offset = Some(bits);
        self
    }

    pub fn data_bit_offset(mut self, bits: u64) -> Self
    {
        self.data_bit_offset = Some(bits);
        self
    }

    pub fn member_location(mut self, offset: u64) -> Self
    {
        self.member_location = Some(offset);
        self
    }

    pub fn count(mut self, count: u64) -> Self
    {
        self.count = Some(count);
        self
    }

    pub fn upper_bound(mut self, bound: i64) -> Self
    {
        self.upper_bound = Some(bound);
        self
    }

    pub fn type_ref(mut self, target: DieId) -> Self
    {
        self.type_ref = Some(target);
        self
    }

    pub fn specification(mut self, target: DieId) -> Self
    {
        self.specification = Some(target);
        self
    }

    pub fn declaration(mut self) -> Self
    {
        self.declaration = true;
        self
    }

    pub fn external(mut self) -> Self
    {
        self.external = true;
        self
    }

    pub fn low_pc(mut self, address: u64) -> Self
    {
        self.low_pc = Some(address);
        self
    }

    pub fn const_value(mut self, value: i64) -> Self
    {
        self.const_value = Some(value);
        self
    }

    pub fn encoding(mut self, encoding: u8) -> Self
    {
        self.encoding = Some(encoding);
        self
    }

    pub fn producer(mut self, producer: impl Into<String>) -> Self
    {
        self.producer = Some(producer.into());
        self
    }
}

/// A fully qualified name, outermost scope first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName(Vec<String>);

impl QualifiedName
{
    pub fn new(segments: Vec<String>) -> Self
    {
        Self(segments)
    }

    /// Split a C++ spelling such as `ns::Outer::Inner`.
    pub fn parse(text: &str) -> Self
    {
        Self(text.split("::").map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String]
    {
        &self.0
    }

    pub fn leaf(&self) -> Option<&str>
    {
        self.0.last().map(String::as_str)
    }

    /// Every proper prefix, outermost first: `a::b::c` yields `a` and `a::b`.
    pub fn scopes(&self) -> impl Iterator<Item = QualifiedName> + '_
    {
        (1..self.0.len()).map(move |end| QualifiedName(self.0[..end].to_vec()))
    }

    pub fn len(&self) -> usize
    {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.0.is_empty()
    }
}

impl fmt::Display for QualifiedName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.0.join("::"))
    }
}

impl From<&str> for QualifiedName
{
    fn from(text: &str) -> Self
    {
        Self::parse(text)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DieData
{
    pub(crate) tag: Tag,
    pub(crate) attrs: DieAttrs,
    pub(crate) parent: Option<DieId>,
    pub(crate) children: Vec<DieId>,
    pub(crate) image: ImageIndex,
    pub(crate) offset: u64,
}

/// One loaded binary.
#[derive(Debug, Clone)]
pub struct ImageInfo
{
    /// Path or label the image was loaded from.
    pub name: String,
    /// Name a runtime loader would use for it.
    pub soname: String,
    /// Per-load number used in synthetic names of anonymous entries.
    pub file_id: u32,
    pub symbols: SymbolTable,
    pub(crate) units: Vec<DieId>,
}

/// Every DIE of every loaded image.
#[derive(Debug, Clone)]
pub struct DieForest
{
    pub(crate) dies: Vec<DieData>,
    pub(crate) images: Vec<ImageInfo>,
    pub(crate) pointer_size: u64,
}

impl DieForest
{
    pub fn die(&self, id: DieId) -> DieRef<'_>
    {
        DieRef { forest: self, id }
    }

    pub fn len(&self) -> usize
    {
        self.dies.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.dies.is_empty()
    }

    pub fn images(&self) -> &[ImageInfo]
    {
        &self.images
    }

    pub fn image(&self, index: ImageIndex) -> &ImageInfo
    {
        &self.images[index.0]
    }

    /// Size in bytes of a data pointer on the target.
    pub fn pointer_size(&self) -> u64
    {
        self.pointer_size
    }

    /// Unit roots of every image, in load order.
    pub fn units(&self) -> impl Iterator<Item = DieRef<'_>>
    {
        self.images
            .iter()
            .flat_map(|image| image.units.iter())
            .map(move |&id| self.die(id))
    }

    /// Find a defining (non-declaration) DIE with the same tag and qualified
    /// name as `declaration`, searching every image in load order.
    pub fn find_definition(&self, declaration: DieId) -> Option<DieId>
    {
        let decl = self.die(declaration);
        let name = decl.fullname();
        let tag = decl.tag();
        if name.is_empty() {
            return None;
        }
        self.units()
            .find_map(|unit| self.search_definition(unit.id, tag, name.segments()))
    }

    fn search_definition(&self, id: DieId, tag: Tag, path: &[String]) -> Option<DieId>
    {
        let die = &self.dies[id.0];
        let same_name = die.attrs.name.as_deref() == path.first().map(String::as_str);

        if path.len() == 1 && same_name && !die.attrs.declaration && die.tag == tag {
            return Some(id);
        }

        let remaining = match die.tag {
            Tag::Namespace | Tag::Structure | Tag::Class | Tag::Union => {
                if !same_name || path.len() == 1 {
                    return None;
                }
                &path[1..]
            }
            // Units hold scopes without consuming a name segment.
            Tag::CompileUnit | Tag::PartialUnit => path,
            _ => return None,
        };

        die.children
            .iter()
            .find_map(|&child| self.search_definition(child, tag, remaining))
    }
}

/// A borrowed view of one DIE.
#[derive(Clone, Copy)]
pub struct DieRef<'f>
{
    forest: &'f DieForest,
    id: DieId,
}

impl<'f> DieRef<'f>
{
    fn data(&self) -> &'f DieData
    {
        &self.forest.dies[self.id.0]
    }

    pub fn id(&self) -> DieId
    {
        self.id
    }

    pub fn forest(&self) -> &'f DieForest
    {
        self.forest
    }

    pub fn tag(&self) -> Tag
    {
        self.data().tag
    }

    pub fn attrs(&self) -> &'f DieAttrs
    {
        &self.data().attrs
    }

    pub fn name(&self) -> Option<&'f str>
    {
        self.data().attrs.name.as_deref()
    }

    /// Section offset of the entry in its image.
    pub fn offset(&self) -> u64
    {
        self.data().offset
    }

    pub fn image(&self) -> &'f ImageInfo
    {
        self.forest.image(self.data().image)
    }

    /// The exported symbols of the image this entry came from.
    pub fn symbols(&self) -> &'f SymbolTable
    {
        &self.image().symbols
    }

    pub fn parent(&self) -> Option<DieRef<'f>>
    {
        self.data().parent.map(|id| self.forest.die(id))
    }

    pub fn children(&self) -> impl Iterator<Item = DieRef<'f>> + 'f
    {
        let forest = self.forest;
        self.data().children.iter().map(move |&id| forest.die(id))
    }

    pub fn type_die(&self) -> Option<DieRef<'f>>
    {
        self.data().attrs.type_ref.map(|id| self.forest.die(id))
    }

    /// `DW_AT_type`, taken from the specification or abstract origin when
    /// the entry itself has none (out-of-line definitions, inlined copies).
    pub fn declared_type(&self) -> Option<DieId>
    {
        self.attrs().type_ref.or_else(|| {
            let spec = self.attrs().specification?;
            (spec != self.id).then(|| self.forest.die(spec).declared_type()).flatten()
        })
    }

    /// Name of this entry alone, synthesised for anonymous entries.
    pub fn local_name(&self) -> String
    {
        if let Some(name) = self.name() {
            return name.to_string();
        }
        let suffix = match self.tag() {
            Tag::Structure => "_struct",
            Tag::Class => "_class",
            Tag::Union => "_union",
            Tag::Enumeration => "_enum",
            _ => "",
        };
        format!("anon_{}_{}{suffix}", self.image().file_id, self.offset())
    }

    /// Qualified name including enclosing scopes.
    pub fn fullname(&self) -> QualifiedName
    {
        let mut segments = Vec::new();
        self.collect_name(&mut segments, true);
        QualifiedName(segments)
    }

    fn collect_name(&self, segments: &mut Vec<String>, leaf: bool)
    {
        if let Some(spec) = self.attrs().specification {
            if spec != self.id {
                self.forest.die(spec).collect_name(segments, leaf);
                return;
            }
        }
        if let Some(parent) = self.parent() {
            parent.collect_name(segments, false);
        }
        if leaf || self.tag().is_scope() {
            segments.push(self.local_name());
        }
    }

    /// Linker name: `DW_AT_linkage_name` if present, else the plain name.
    pub fn linker_name(&self) -> Option<&'f str>
    {
        self.attrs().linkage_name.as_deref().or_else(|| self.name())
    }

    /// Size in bytes of the object this entry describes.
    ///
    /// `DW_AT_byte_size` wins; pointers without one take the target pointer
    /// size, arrays multiply out their dimensions and everything else asks
    /// the referenced type. `void` is zero.
    pub fn storage_size(&self) -> u64
    {
        if let Some(size) = self.attrs().byte_size {
            return size;
        }
        if self.tag() == Tag::Pointer {
            return self.forest.pointer_size;
        }
        let base = self.type_die().map_or(0, |base| base.storage_size());
        if self.tag() == Tag::Array {
            return self.array_dimensions().iter().product::<u64>() * base;
        }
        base
    }

    /// Dimensions of an array type, outermost first.
    ///
    /// A subrange without a count or upper bound (a flexible array member)
    /// has dimension zero.
    pub fn array_dimensions(&self) -> Vec<u64>
    {
        self.children()
            .filter(|child| child.tag() == Tag::Subrange)
            .map(|child| {
                let attrs = child.attrs();
                attrs
                    .count
                    .or_else(|| attrs.upper_bound.map(|bound| (bound + 1).max(0) as u64))
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Bit offset of a bitfield from the start of the enclosing record.
    ///
    /// Legacy `DW_AT_bit_offset` counts from the most significant bit of the
    /// storage unit and is converted assuming a little-endian target.
    pub fn bit_position(&self) -> Option<u64>
    {
        let attrs = self.attrs();
        if let Some(bits) = attrs.data_bit_offset {
            return Some(bits);
        }
        let legacy = attrs.bit_offset?;
        let bit_size = attrs.bit_size?;
        let unit_bits = self.storage_size() * 8;
        let base = attrs.member_location.unwrap_or(0) * 8;
        Some((base + unit_bits).saturating_sub(bit_size + legacy))
    }
}

impl fmt::Debug for DieRef<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DieRef")
            .field("id", &self.id)
            .field("tag", &self.tag())
            .field("name", &self.name())
            .finish()
    }
}
