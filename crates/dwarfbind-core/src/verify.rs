//! # Self-check
//!
//! Re-derives the layout `ctypes` will give each generated record and
//! compares it with what the compiler recorded. The model follows CPython's
//! classic (GCC-style) `Structure` rules:
//!
//! - a plain field starts at the cursor rounded up to its alignment
//! - a bitfield continues the previous storage unit when that unit is a
//!   bitfield of the same size with enough bits left, else opens a new unit
//! - `_pack_ = 1` makes every alignment 1
//! - the size is the cursor rounded up to the largest alignment
//!
//! Union members all sit at offset 0.

use std::collections::HashMap;

use tracing::debug;

use crate::diagnostics::Diagnostic;
use crate::layout::{FieldStorage, LayoutField, OffsetCheck, RecordLayout};
use crate::resolver::TypeResolver;
use crate::types::primitive::ctype_layout;
use crate::types::{Emission, TypeId, TypeKind};

/// Size, alignment and field offsets of one record as `ctypes` computes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtypesLayout
{
    pub size: u64,
    pub align: u64,
    /// Byte offset of each field, in field order
    pub offsets: Vec<u64>,
}

/// Memoized `ctypes` model over one resolver session.
pub struct LayoutModel<'r, 'f>
{
    resolver: &'r TypeResolver<'f>,
    records: HashMap<TypeId, Option<CtypesLayout>>,
    pointers: HashMap<TypeId, bool>,
}

struct BitUnit
{
    size: u64,
    used: u64,
}

impl<'r, 'f> LayoutModel<'r, 'f>
{
    pub fn new(resolver: &'r TypeResolver<'f>) -> Self
    {
        Self {
            resolver,
            records: HashMap::new(),
            pointers: HashMap::new(),
        }
    }

    /// `None` when a field's spelling cannot be sized without running python.
    pub fn record(&mut self, id: TypeId) -> Option<CtypesLayout>
    {
        if let Some(known) = self.records.get(&id) {
            return known.clone();
        }
        // Guards recursion through malformed graphs.
        self.records.insert(id, None);
        let resolver = self.resolver;
        let computed = resolver.record_layout(id).and_then(|layout| self.compute(id, layout));
        self.records.insert(id, computed.clone());
        computed
    }

    fn compute(&mut self, id: TypeId, layout: &RecordLayout) -> Option<CtypesLayout>
    {
        let is_union = self.resolver.descriptor(id).record().is_some_and(|record| record.union);
        let mut offsets = Vec::with_capacity(layout.fields.len());
        let mut cursor = 0;
        let mut max_align = 1;
        let mut union_size = 0;
        let mut unit: Option<BitUnit> = None;

        for field in &layout.fields {
            let (size, natural) = self.storage_layout(&field.storage, &field.ctype)?;
            let align = if layout.packed { 1 } else { natural.max(1) };
            max_align = max_align.max(align);

            if is_union {
                offsets.push(0);
                union_size = union_size.max(size);
                continue;
            }

            match field.bits {
                Some(bits) => {
                    let fits = unit
                        .as_ref()
                        .is_some_and(|open| open.size == size && open.used + bits <= size * 8);
                    if fits {
                        if let Some(open) = unit.as_mut() {
                            open.used += bits;
                        }
                        offsets.push(cursor - size);
                    } else {
                        let start = round_up(cursor, align);
                        offsets.push(start);
                        cursor = start + size;
                        unit = Some(BitUnit { size, used: bits });
                    }
                }
                None => {
                    let start = round_up(cursor, align);
                    offsets.push(start);
                    cursor = start + size;
                    unit = None;
                }
            }
        }

        let end = if is_union { union_size } else { cursor };
        Some(CtypesLayout {
            size: round_up(end, max_align),
            align: max_align,
            offsets,
        })
    }

    /// Size and natural alignment of what a field stores.
    fn storage_layout(&mut self, storage: &FieldStorage, ctype: &str) -> Option<(u64, u64)>
    {
        let pointer_size = self.resolver.forest().pointer_size();
        match storage {
            FieldStorage::Bytes(count) => Some((*count, 1)),
            FieldStorage::Pointer => Some((pointer_size, pointer_size)),
            FieldStorage::Literal(spelling) => ctype_layout(spelling, pointer_size),
            FieldStorage::Typed(id) => {
                let size = self.type_size(*id)?;
                Some((size, self.resolver.alignment_of(*id)))
            }
        }
        .or_else(|| {
            debug!("Cannot size ctypes spelling {ctype}");
            None
        })
    }

    fn type_size(&mut self, id: TypeId) -> Option<u64>
    {
        let resolver = self.resolver;
        match &resolver.descriptor(id).kind {
            TypeKind::Record(_) => self.record(id).map(|layout| layout.size),
            TypeKind::Array { element, dims } => Some(self.type_size(*element)? * dims.iter().product::<u64>()),
            TypeKind::Typedef { target: Some(target) } | TypeKind::Qualified { target: Some(target), .. } => {
                self.type_size(*target)
            }
            TypeKind::Enum(info) => match info.underlying {
                Some(underlying) => self.type_size(underlying),
                None => Some(resolver.size_of(id)),
            },
            _ => Some(resolver.size_of(id)),
        }
    }

    /// Whether values of `id` contain pointer data anywhere.
    pub fn has_pointers(&mut self, id: TypeId) -> bool
    {
        if let Some(&known) = self.pointers.get(&id) {
            return known;
        }
        self.pointers.insert(id, false);
        let resolver = self.resolver;
        let result = match &resolver.descriptor(id).kind {
            TypeKind::Pointer { .. } | TypeKind::Function(_) => true,
            TypeKind::External(external) => external.has_pointers,
            TypeKind::Array { element, .. } => self.has_pointers(*element),
            TypeKind::Typedef { target: Some(target) } | TypeKind::Qualified { target: Some(target), .. } => {
                self.has_pointers(*target)
            }
            TypeKind::Record(_) => {
                let fields: &[LayoutField] = resolver.record_layout(id).map_or(&[], |layout| layout.fields.as_slice());
                fields.iter().any(|field| self.storage_has_pointers(&field.storage))
            }
            _ => false,
        };
        self.pointers.insert(id, result);
        result
    }

    fn storage_has_pointers(&mut self, storage: &FieldStorage) -> bool
    {
        match storage {
            FieldStorage::Pointer => true,
            FieldStorage::Bytes(_) => false,
            FieldStorage::Literal(spelling) => {
                let spelling = spelling.trim();
                spelling.starts_with("POINTER(")
                    || spelling.starts_with("CFUNCTYPE(")
                    || matches!(spelling, "c_void_p" | "c_char_p" | "c_wchar_p")
            }
            FieldStorage::Typed(id) => self.has_pointers(*id),
        }
    }

    fn storage_align(&self, storage: &FieldStorage) -> u64
    {
        let pointer_size = self.resolver.forest().pointer_size();
        match storage {
            FieldStorage::Bytes(_) => 1,
            FieldStorage::Pointer => pointer_size,
            FieldStorage::Literal(spelling) => ctype_layout(spelling, pointer_size).map_or(0, |(_, align)| align),
            FieldStorage::Typed(id) => self.resolver.alignment_of(*id),
        }
    }
}

fn round_up(value: u64, align: u64) -> u64
{
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Check every record the session defined. Returns the problems found.
pub fn self_check(resolver: &TypeResolver<'_>) -> Vec<Diagnostic>
{
    let mut model = LayoutModel::new(resolver);
    let mut problems = Vec::new();

    for emission in resolver.emissions() {
        let Emission::Define(id) = *emission else {
            continue;
        };
        let Some(layout) = resolver.record_layout(id) else {
            continue;
        };
        let name = resolver.py_name(id);
        let Some(computed) = model.record(id) else {
            debug!("Skipping self-check of {name}: unsized field");
            continue;
        };

        check_size(resolver, id, &name, &computed, &mut problems);
        check_offsets(&name, layout, &computed, &mut problems);
        check_unaligned(&mut model, id, &name, layout, &computed, &mut problems);
    }
    problems
}

fn check_size(resolver: &TypeResolver<'_>, id: TypeId, name: &str, computed: &CtypesLayout, problems: &mut Vec<Diagnostic>)
{
    let native = resolver.size_of(id);
    // Empty C++ classes have size 1; ctypes makes them 0.
    if computed.size == native || (computed.size == 0 && native == 1) {
        return;
    }
    problems.push(Diagnostic::LayoutMismatch {
        type_name: name.to_string(),
        detail: format!(
            "type {name} has mismatched size. {} in ctypes, {native} in DWARF",
            computed.size
        ),
    });
}

fn check_offsets(name: &str, layout: &RecordLayout, computed: &CtypesLayout, problems: &mut Vec<Diagnostic>)
{
    for (field, actual) in layout.fields.iter().zip(&computed.offsets) {
        let Some(OffsetCheck::Expected(expected)) = field.offset else {
            continue;
        };
        if *actual != expected {
            problems.push(Diagnostic::LayoutMismatch {
                type_name: name.to_string(),
                detail: format!(
                    "field {} of {name} has offset {actual} in ctypes, {expected} in DWARF",
                    field.name
                ),
            });
        }
    }
}

fn check_unaligned(
    model: &mut LayoutModel<'_, '_>,
    id: TypeId,
    name: &str,
    layout: &RecordLayout,
    computed: &CtypesLayout,
    problems: &mut Vec<Diagnostic>,
)
{
    let resolver = model.resolver;
    let Some(record) = resolver.descriptor(id).record() else {
        return;
    };
    if record.unaligned_ptrs {
        return;
    }
    let allowed: Vec<String> = record
        .members
        .iter()
        .filter(|member| member.allow_unaligned)
        .map(|member| crate::pyident::as_python_id(&member.name))
        .collect();

    for (field, &offset) in layout.fields.iter().zip(&computed.offsets) {
        let align = model.storage_align(&field.storage);
        if align == 0 || offset % align == 0 {
            continue;
        }
        if !model.storage_has_pointers(&field.storage) || allowed.contains(&field.name) {
            continue;
        }
        problems.push(Diagnostic::UnalignedPointer {
            type_name: name.to_string(),
            field: field.name.clone(),
            offset,
            misalignment: offset % align,
        });
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_round_up()
    {
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(3, 1), 3);
        assert_eq!(round_up(0, 8), 0);
    }
}
