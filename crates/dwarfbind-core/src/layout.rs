//! # Record Layout
//!
//! Turns the members of one struct, class or union into the `ctypes` field
//! list that reproduces the compiler's layout.
//!
//! `ctypes` cannot place a field at an arbitrary offset. All it offers is
//! natural alignment, `_pack_ = 1`, and `(name, type, bits)` bitfields packed
//! into storage units of the field's type. The compiler's layout is therefore
//! rebuilt by walking members in declaration order while tracking two bit
//! positions:
//!
//! - the cursor: where the next bitfield in the current storage unit starts
//! - the unit end: where the current storage unit stops
//!
//! Gaps left by unnamed bitfields become synthetic `<field>_prepad_<bit>`
//! fields, unexplained tail bytes become `__trailing_pad`, and any member
//! sitting at an offset its alignment forbids marks the record packed.
//!
//! This module is pure: the resolver describes each member as a
//! [`MemberSlot`] and receives a [`RecordLayout`] plus diagnostics.

use crate::diagnostics::Diagnostic;
use crate::types::TypeId;

/// What the resolver knows about a record as a whole.
#[derive(Debug, Clone)]
pub struct RecordShape<'a>
{
    /// Python name, used in diagnostics
    pub name: &'a str,
    pub is_union: bool,
    /// `DW_AT_byte_size` of the definition
    pub byte_size: Option<u64>,
    /// Number of inheritance-derived members
    pub super_count: usize,
    pub pack_requested: bool,
}

/// One member, described in layout terms.
#[derive(Debug, Clone)]
pub struct MemberSlot
{
    /// Member name as declared, or its synthetic name
    pub name: String,
    /// Python spelling of `name`
    pub py_name: String,
    pub ty: TypeId,
    /// ctypes spelling of the member's type, or its override
    pub ctype: String,
    /// Display name of the member's type, for diagnostics
    pub type_name: String,
    /// Whether the member's type has a full definition
    pub defined: bool,
    /// Natural alignment of the member's type
    pub align: u64,
    /// Size of the storage unit: the member's own byte size, else its type's
    pub storage_bytes: u64,
    pub member_location: Option<u64>,
    pub bit_size: Option<u64>,
    /// Offset in bits from the start of the record, for bitfields
    pub bit_offset: Option<u64>,
    pub overridden: bool,
    /// Inheritance member whose base has no data at all
    pub empty_base: bool,
}

impl MemberSlot
{
    /// First byte the member occupies. Bitfields described only by
    /// `DW_AT_data_bit_offset` start at the byte holding their first bit.
    pub fn start_byte(&self) -> Option<u64>
    {
        self.member_location.or_else(|| self.bit_offset.map(|bits| bits / 8))
    }
}

/// Why a field is in the generated list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole
{
    Member,
    /// Gap before a bitfield
    Padding,
    /// Stand-in for a member whose type has no definition
    Opaque,
    TrailingPad,
}

/// What occupies a field's storage, for the self-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldStorage
{
    Typed(TypeId),
    /// `c_char * N`
    Bytes(u64),
    /// A caller-supplied ctypes spelling
    Literal(String),
    /// `c_void_p`
    Pointer,
}

/// Entry for a field in the `_ctypegen_offsets` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetCheck
{
    /// Compared against the ctypes offset of the field
    Expected(u64),
    /// Rendered as `None`: shares a storage unit, has no location, or is overridden
    Unchecked,
    /// Rendered as `-1`: synthetic padding
    Padding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutField
{
    pub name: String,
    pub ctype: String,
    pub bits: Option<u64>,
    pub role: FieldRole,
    pub storage: FieldStorage,
    /// `None` for the trailing pad, which has no offsets-table entry
    pub offset: Option<OffsetCheck>,
}

/// Result of laying out one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordLayout
{
    pub fields: Vec<LayoutField>,
    /// Effective alignment; 1 once packed
    pub alignment: u64,
    pub packed: bool,
    pub pack_reason: Option<String>,
    /// Python names of anonymous members, sorted
    pub anonymous: Vec<String>,
    /// The record had member entries (an empty field list is still emitted)
    pub has_members: bool,
    /// Union with no members but a size: a single `c_void_p` field stands in
    pub transparent_union: bool,
}

impl RecordLayout
{
    /// Layout of a record that was never defined.
    pub fn empty() -> Self
    {
        Self {
            fields: Vec::new(),
            alignment: 1,
            packed: false,
            pack_reason: None,
            anonymous: Vec::new(),
            has_members: false,
            transparent_union: false,
        }
    }

    /// Fields that correspond to members or padding, excluding the tail pad.
    pub fn checked_fields(&self) -> impl Iterator<Item = (&LayoutField, OffsetCheck)>
    {
        self.fields
            .iter()
            .filter_map(|field| field.offset.map(|offset| (field, offset)))
    }
}

const EXPLICIT_PACK: &str = "explicitly requested by type hint";

/// Lay out `slots` for the record described by `shape`.
pub fn lay_out(shape: &RecordShape<'_>, slots: &[MemberSlot], anonymous: Vec<String>) -> (RecordLayout, Vec<Diagnostic>)
{
    let mut builder = LayoutBuilder::new(shape);
    for (index, slot) in slots.iter().enumerate() {
        if slot.empty_base {
            continue;
        }
        let next_start = slots.get(index + 1).and_then(MemberSlot::start_byte);
        builder.place(slot, next_start);
    }
    builder.finish(slots.len(), anonymous)
}

struct LayoutBuilder<'s, 'a>
{
    shape: &'s RecordShape<'a>,
    fields: Vec<LayoutField>,
    diagnostics: Vec<Diagnostic>,
    alignment: u64,
    packed: bool,
    pack_reason: Option<String>,
    /// Next free bit within the current storage unit
    cursor: u64,
    /// End of the current storage unit, in bits
    unit_end: u64,
    last_location: Option<u64>,
}

impl<'s, 'a> LayoutBuilder<'s, 'a>
{
    fn new(shape: &'s RecordShape<'a>) -> Self
    {
        Self {
            shape,
            fields: Vec::new(),
            diagnostics: Vec::new(),
            alignment: 1,
            packed: shape.pack_requested,
            pack_reason: shape.pack_requested.then(|| EXPLICIT_PACK.to_string()),
            cursor: 0,
            unit_end: 0,
            last_location: None,
        }
    }

    fn place(&mut self, slot: &MemberSlot, next_start: Option<u64>)
    {
        let location = slot.member_location;

        let (ctype, align, storage, role, storage_bytes) = if slot.defined || slot.overridden {
            let storage = if slot.overridden {
                FieldStorage::Literal(slot.ctype.clone())
            } else {
                FieldStorage::Typed(slot.ty)
            };
            (slot.ctype.clone(), slot.align, storage, FieldRole::Member, slot.storage_bytes)
        } else {
            let start = slot.start_byte().unwrap_or(0);
            let end = next_start.or(self.shape.byte_size).unwrap_or(start);
            let size = end.saturating_sub(start);
            self.diagnostics.push(Diagnostic::IncompleteType {
                name: slot.type_name.clone(),
                detail: format!("padded {}:{} with {size} opaque bytes", self.shape.name, slot.name),
            });
            (format!("c_char * {size}"), 1, FieldStorage::Bytes(size), FieldRole::Opaque, size)
        };

        if !slot.overridden && align > self.alignment {
            if align % self.alignment != 0 {
                self.diagnostics.push(Diagnostic::LayoutMismatch {
                    type_name: self.shape.name.to_string(),
                    detail: format!(
                        "field {} alignment {align} is not a multiple of {}",
                        slot.name, self.alignment
                    ),
                });
            }
            self.alignment = align;
        }

        let offset = self.offset_entry(slot);
        let bitfield = match (slot.bit_offset, slot.bit_size) {
            (Some(offset), Some(bits)) if !slot.overridden && role == FieldRole::Member => Some((offset, bits)),
            _ => None,
        };

        if let Some((bit_offset, bits)) = bitfield {
            self.place_bitfield(slot, &ctype, &storage, bit_offset, bits, storage_bytes, offset);
        } else {
            self.fields.push(LayoutField {
                name: slot.py_name.clone(),
                ctype,
                bits: None,
                role,
                storage,
                offset: Some(offset),
            });
            if !self.shape.is_union {
                self.cursor = (location.unwrap_or(0) + storage_bytes) * 8;
                self.unit_end = self.cursor;
            }
        }

        if let Some(location) = location {
            if !slot.overridden && align > 0 && !self.packed && location % align != 0 {
                self.packed = true;
                self.pack_reason = Some(format!(
                    "field {}, required alignment {align}, offset {location}",
                    slot.name
                ));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn place_bitfield(
        &mut self,
        slot: &MemberSlot,
        ctype: &str,
        storage: &FieldStorage,
        bit_offset: u64,
        bits: u64,
        storage_bytes: u64,
        offset: OffsetCheck,
    )
    {
        let unit_bits = (storage_bytes * 8).max(8);

        while bit_offset >= self.unit_end {
            // An unnamed bitfield left the rest of the current unit unused.
            // In packed records the previous bitfield may straddle the unit
            // end, leaving nothing to pad.
            let gap = self.unit_end.saturating_sub(self.cursor);
            if gap > 0 && bits <= gap {
                self.push_pad(slot, ctype, storage, gap);
            }
            self.cursor = self.cursor.max(self.unit_end);
            self.unit_end = self.cursor + unit_bits;
        }

        if bit_offset > self.cursor {
            let gap = bit_offset - self.cursor;
            self.push_pad(slot, ctype, storage, gap);
        }
        self.cursor = bit_offset + bits;

        self.fields.push(LayoutField {
            name: slot.py_name.clone(),
            ctype: ctype.to_string(),
            bits: Some(bits),
            role: FieldRole::Member,
            storage: storage.clone(),
            offset: Some(offset),
        });
    }

    fn push_pad(&mut self, slot: &MemberSlot, ctype: &str, storage: &FieldStorage, bits: u64)
    {
        self.fields.push(LayoutField {
            name: format!("{}_prepad_{}", slot.py_name, self.unit_end),
            ctype: ctype.to_string(),
            bits: Some(bits),
            role: FieldRole::Padding,
            storage: storage.clone(),
            offset: Some(OffsetCheck::Padding),
        });
    }

    /// Members sharing a storage unit report the same location; only the
    /// first of them is checked.
    fn offset_entry(&mut self, slot: &MemberSlot) -> OffsetCheck
    {
        match slot.member_location {
            Some(location) if !slot.overridden && self.last_location != Some(location) => {
                self.last_location = Some(location);
                OffsetCheck::Expected(location)
            }
            Some(_) => OffsetCheck::Unchecked,
            None => {
                self.last_location = None;
                OffsetCheck::Unchecked
            }
        }
    }

    fn finish(mut self, member_count: usize, anonymous: Vec<String>) -> (RecordLayout, Vec<Diagnostic>)
    {
        let shape = self.shape;
        let has_members = member_count > 0;

        if !has_members {
            let transparent_union = shape.is_union && shape.byte_size.is_some();
            if transparent_union {
                self.fields.push(LayoutField {
                    name: "__broken_transparent_union".to_string(),
                    ctype: "c_void_p".to_string(),
                    bits: None,
                    role: FieldRole::Opaque,
                    storage: FieldStorage::Pointer,
                    offset: None,
                });
            }
            let layout = RecordLayout {
                fields: self.fields,
                transparent_union,
                ..RecordLayout::empty()
            };
            return (layout, self.diagnostics);
        }

        let mut end = self.unit_end / 8;
        let residue = end % self.alignment;
        if residue != 0 {
            end += self.alignment - residue;
        }

        if let Some(size) = shape.byte_size {
            if !shape.is_union && end < size && member_count != shape.super_count {
                let pad = size - end;
                self.fields.push(LayoutField {
                    name: "__trailing_pad".to_string(),
                    ctype: format!("c_char * {pad}"),
                    bits: None,
                    role: FieldRole::TrailingPad,
                    storage: FieldStorage::Bytes(pad),
                    offset: None,
                });
            }

            if !self.packed && size % self.alignment != 0 {
                self.packed = true;
                self.pack_reason = Some(format!(
                    "total size {size}, field alignment requirement {}",
                    self.alignment
                ));
            }
        }

        if self.packed {
            self.alignment = 1;
        }

        let layout = RecordLayout {
            fields: self.fields,
            alignment: self.alignment,
            packed: self.packed,
            pack_reason: self.pack_reason,
            anonymous,
            has_members,
            transparent_union: false,
        };
        (layout, self.diagnostics)
    }
}
