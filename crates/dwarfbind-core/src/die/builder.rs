use std::path::Path;

use super::{DieAttrs, DieData, DieForest, DieId, ImageIndex, ImageInfo, Tag};
use crate::symbols::SymbolTable;

/// First offset handed out to synthetic entries, just past a DWARF 4 unit header.
const FIRST_SYNTHETIC_OFFSET: u64 = 0x0b;

/// Incrementally assembles a [`DieForest`].
///
/// The image loader drives this with real section offsets; tests use the
/// automatic offsets and the shorthand constructors.
///
/// ```rust
/// use dwarfbind_core::die::{DieAttrs, ForestBuilder, Tag};
///
/// let mut builder = ForestBuilder::new();
/// let image = builder.add_image("libwidget.so");
/// let unit = builder.add_unit(image, Some("GNU C17 12.2.0"));
/// let int = builder.base_type(unit, "int", 4, gimli::constants::DW_ATE_signed.0);
/// let count = builder.add(unit, Tag::Variable, DieAttrs::new().name("count").type_ref(int).external());
/// let forest = builder.finish();
/// assert_eq!(forest.die(count).fullname().to_string(), "count");
/// ```
#[derive(Debug)]
pub struct ForestBuilder
{
    dies: Vec<DieData>,
    images: Vec<ImageInfo>,
    pointer_size: u64,
    next_offset: u64,
}

impl Default for ForestBuilder
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl ForestBuilder
{
    /// A builder for a 64-bit target.
    pub fn new() -> Self
    {
        Self::with_pointer_size(8)
    }

    pub fn with_pointer_size(pointer_size: u64) -> Self
    {
        Self {
            dies: Vec::new(),
            images: Vec::new(),
            pointer_size,
            next_offset: FIRST_SYNTHETIC_OFFSET,
        }
    }

    pub(crate) fn set_pointer_size(&mut self, pointer_size: u64)
    {
        self.pointer_size = pointer_size;
    }

    /// Register an image. Its soname is the final path component of `name`.
    pub fn add_image(&mut self, name: impl Into<String>) -> ImageIndex
    {
        let name = name.into();
        let soname = Path::new(&name)
            .file_name()
            .map_or_else(|| name.clone(), |file| file.to_string_lossy().into_owned());
        let index = self.images.len();
        self.images.push(ImageInfo {
            name,
            soname,
            file_id: index as u32,
            symbols: SymbolTable::new(),
            units: Vec::new(),
        });
        ImageIndex(index)
    }

    pub fn add_unit(&mut self, image: ImageIndex, producer: Option<&str>) -> DieId
    {
        let mut attrs = DieAttrs::new();
        attrs.producer = producer.map(str::to_string);
        let offset = self.take_offset();
        self.add_at(image, None, Tag::CompileUnit, attrs, offset)
    }

    /// Append a child of `parent` with the next free offset.
    pub fn add(&mut self, parent: DieId, tag: Tag, attrs: DieAttrs) -> DieId
    {
        let image = self.dies[parent.0].image;
        let offset = self.take_offset();
        self.add_at(image, Some(parent), tag, attrs, offset)
    }

    /// Append an entry at an explicit section offset. Entries without a
    /// parent become unit roots of `image`.
    pub(crate) fn add_at(
        &mut self,
        image: ImageIndex,
        parent: Option<DieId>,
        tag: Tag,
        attrs: DieAttrs,
        offset: u64,
    ) -> DieId
    {
        let id = DieId(self.dies.len());
        self.dies.push(DieData {
            tag,
            attrs,
            parent,
            children: Vec::new(),
            image,
            offset,
        });
        match parent {
            Some(parent) => self.dies[parent.0].children.push(id),
            None => self.images[image.0].units.push(id),
        }
        id
    }

    fn take_offset(&mut self) -> u64
    {
        let offset = self.next_offset;
        self.next_offset += 8;
        offset
    }

    pub fn attrs_mut(&mut self, id: DieId) -> &mut DieAttrs
    {
        &mut self.dies[id.0].attrs
    }

    /// Point `id`'s `DW_AT_type` at `target`. Useful for self-referential types.
    pub fn set_type(&mut self, id: DieId, target: DieId)
    {
        self.dies[id.0].attrs.type_ref = Some(target);
    }

    pub fn add_symbol(&mut self, image: ImageIndex, name: impl Into<String>, address: u64, size: u64)
    {
        self.images[image.0].symbols.insert(name, address, size);
    }

    pub(crate) fn symbols_mut(&mut self, image: ImageIndex) -> &mut SymbolTable
    {
        &mut self.images[image.0].symbols
    }

    pub fn base_type(&mut self, parent: DieId, name: &str, byte_size: u64, encoding: u8) -> DieId
    {
        self.add(
            parent,
            Tag::BaseType,
            DieAttrs::new().name(name).byte_size(byte_size).encoding(encoding),
        )
    }

    /// A pointer to `target`, or to `void` when `target` is `None`.
    pub fn pointer_to(&mut self, parent: DieId, target: Option<DieId>) -> DieId
    {
        let mut attrs = DieAttrs::new().byte_size(self.pointer_size);
        attrs.type_ref = target;
        self.add(parent, Tag::Pointer, attrs)
    }

    pub fn member(&mut self, record: DieId, name: &str, ty: DieId, offset: u64) -> DieId
    {
        self.add(
            record,
            Tag::Member,
            DieAttrs::new().name(name).type_ref(ty).member_location(offset),
        )
    }

    /// A bitfield member described with `DW_AT_data_bit_offset`.
    pub fn bitfield(&mut self, record: DieId, name: &str, ty: DieId, bit_offset: u64, bits: u64) -> DieId
    {
        self.add(
            record,
            Tag::Member,
            DieAttrs::new()
                .name(name)
                .type_ref(ty)
                .data_bit_offset(bit_offset)
                .bit_size(bits),
        )
    }

    pub fn finish(self) -> DieForest
    {
        DieForest {
            dies: self.dies,
            images: self.images,
            pointer_size: self.pointer_size,
        }
    }
}
