//! Binary image parsing and DWARF loading.
//!
//! Each image is parsed with `object`, its DWARF sections are handed to
//! `gimli`, and every unit in `.debug_info` is copied into the shared
//! [`DieForest`]. References between entries are recorded as section offsets
//! while walking and patched to [`DieId`]s once the whole image is loaded,
//! since `DW_FORM_ref_addr` may point forward into a later unit.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use gimli::{
    constants, AttributeValue, DebuggingInformationEntry, Dwarf, EndianArcSlice, EntriesTreeNode, Reader as _,
    RunTimeEndian, SectionId, Unit, UnitType,
};
use object::{Object, ObjectSection, ObjectSymbol};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::die::{DieAttrs, DieForest, DieId, ForestBuilder, ImageIndex, Tag};
use crate::error::{map_dwarf_error, BindError, Result};
use crate::symbols::SymbolTable;

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offsets"]),
    (".debug_types", &[".debug_types", "__debug_types"]),
];

fn section_key(id: SectionId) -> &'static str
{
    match id {
        SectionId::DebugAbbrev => ".debug_abbrev",
        SectionId::DebugAddr => ".debug_addr",
        SectionId::DebugInfo => ".debug_info",
        SectionId::DebugLine => ".debug_line",
        SectionId::DebugLineStr => ".debug_line_str",
        SectionId::DebugRanges => ".debug_ranges",
        SectionId::DebugRngLists => ".debug_rnglists",
        SectionId::DebugStr => ".debug_str",
        SectionId::DebugStrOffsets => ".debug_str_offsets",
        SectionId::DebugTypes => ".debug_types",
        _ => "",
    }
}

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> Result<Arc<[u8]>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section
                .uncompressed_data()
                .map_err(|err| BindError::Object(format!("failed to read {name}: {err}")))?;
            return Ok(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
                Cow::Owned(vec) => vec.into(),
            });
        }
    }

    Ok(Arc::<[u8]>::from(Vec::new()))
}

/// Which attribute slot a pending reference fills.
#[derive(Debug, Clone, Copy)]
enum RefSlot
{
    Type,
    Specification,
}

type PendingRefs = SmallVec<[(RefSlot, u64); 2]>;

/// Load every image in `paths` into one forest, in the given order.
///
/// The first image decides the target pointer size.
pub fn load_images<P: AsRef<Path>>(paths: &[P]) -> Result<DieForest>
{
    let mut builder = ForestBuilder::new();
    let mut pointer_size = None;

    for path in paths {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| BindError::Object(format!("failed to parse {}: {err}", path.display())))?;

        let size = if file.is_64() { 8 } else { 4 };
        match pointer_size {
            None => {
                builder.set_pointer_size(size);
                pointer_size = Some(size);
            }
            Some(existing) if existing != size => {
                warn!("{} has {size}-byte pointers, using {existing}", path.display());
            }
            Some(_) => {}
        }

        let image = builder.add_image(path.display().to_string());
        let symbols = builder.symbols_mut(image);
        collect_symbols(&file, symbols);
        let exported = symbols.len();

        let mut loader = ImageLoader::new(&mut builder, image);
        loader.load(&file)?;
        info!(
            "loaded {}: {} entries, {exported} exported symbols",
            path.display(),
            loader.offsets.len()
        );
    }

    Ok(builder.finish())
}

fn collect_symbols(file: &object::File<'_>, table: &mut SymbolTable)
{
    // Mach-O prefixes C symbols with '_'; dlsym adds it back.
    let strip_underscore = file.format() == object::BinaryFormat::MachO;

    let mut dynamic = 0usize;
    for symbol in file.dynamic_symbols() {
        if record_symbol(table, &symbol, strip_underscore) {
            dynamic += 1;
        }
    }
    if dynamic == 0 {
        debug!("no dynamic symbols, falling back to global symbol table");
        for symbol in file.symbols().filter(|symbol| symbol.is_global()) {
            record_symbol(table, &symbol, strip_underscore);
        }
    }
}

fn record_symbol<'data>(table: &mut SymbolTable, symbol: &impl ObjectSymbol<'data>, strip_underscore: bool) -> bool
{
    if !symbol.is_definition() {
        return false;
    }
    let Ok(name) = symbol.name() else {
        return false;
    };
    let name = if strip_underscore {
        name.strip_prefix('_').unwrap_or(name)
    } else {
        name
    };
    if name.is_empty() {
        return false;
    }
    table.insert(name, symbol.address(), symbol.size());
    true
}

struct ImageLoader<'b>
{
    builder: &'b mut ForestBuilder,
    image: ImageIndex,
    offsets: HashMap<u64, DieId>,
    pending: Vec<(DieId, RefSlot, u64)>,
}

impl<'b> ImageLoader<'b>
{
    fn new(builder: &'b mut ForestBuilder, image: ImageIndex) -> Self
    {
        Self {
            builder,
            image,
            offsets: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn load(&mut self, file: &object::File<'_>) -> Result<()>
    {
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut sections = HashMap::new();
        for (canonical, aliases) in DWARF_SECTIONS {
            sections.insert(*canonical, load_section_bytes(file, aliases)?);
        }

        let dwarf: OwnedDwarf = Dwarf::load(|id| {
            let data = sections
                .get(section_key(id))
                .cloned()
                .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
            Ok::<_, gimli::Error>(EndianArcSlice::new(data, endian))
        })
        .map_err(|err| map_dwarf_error("loading DWARF sections", err))?;

        let mut headers = dwarf.units();
        while let Some(header) = headers
            .next()
            .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
        {
            if matches!(header.type_(), UnitType::Type { .. } | UnitType::SplitType { .. }) {
                continue;
            }
            let unit = dwarf
                .unit(header)
                .map_err(|err| map_dwarf_error("parsing compilation unit", err))?;
            let mut tree = unit
                .entries_tree(None)
                .map_err(|err| map_dwarf_error("building unit tree", err))?;
            let root = tree.root().map_err(|err| map_dwarf_error("navigating unit root", err))?;
            self.load_node(&dwarf, &unit, root, None)?;
        }

        self.patch_references();
        Ok(())
    }

    fn load_node(
        &mut self,
        dwarf: &OwnedDwarf,
        unit: &Unit<OwnedReader>,
        node: EntriesTreeNode<'_, '_, '_, OwnedReader>,
        parent: Option<DieId>,
    ) -> Result<()>
    {
        let entry = node.entry();
        let offset = entry
            .offset()
            .to_debug_info_offset(&unit.header)
            .map_or(0, |offset| offset.0 as u64);
        let tag = Tag::from_dwarf(entry.tag());
        let (attrs, refs) = read_attrs(dwarf, unit, entry)?;

        let id = self.builder.add_at(self.image, parent, tag, attrs, offset);
        self.offsets.insert(offset, id);
        self.pending.extend(refs.into_iter().map(|(slot, target)| (id, slot, target)));

        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating children", err))?
        {
            self.load_node(dwarf, unit, child, Some(id))?;
        }
        Ok(())
    }

    fn patch_references(&mut self)
    {
        for (id, slot, target) in self.pending.drain(..) {
            let Some(&resolved) = self.offsets.get(&target) else {
                warn!("reference to unknown entry at {target:#x}");
                continue;
            };
            let attrs = self.builder.attrs_mut(id);
            match slot {
                RefSlot::Type => attrs.type_ref = Some(resolved),
                RefSlot::Specification => attrs.specification = Some(resolved),
            }
        }
    }
}

fn read_attrs(
    dwarf: &OwnedDwarf,
    unit: &Unit<OwnedReader>,
    entry: &DebuggingInformationEntry<'_, '_, OwnedReader>,
) -> Result<(DieAttrs, PendingRefs)>
{
    let mut attrs = DieAttrs::new();
    let mut refs = PendingRefs::new();

    let mut iter = entry.attrs();
    while let Some(attr) = iter
        .next()
        .map_err(|err| map_dwarf_error("reading attributes", err))?
    {
        match attr.name() {
            constants::DW_AT_name => attrs.name = Some(attr_string(dwarf, unit, attr.value())?),
            constants::DW_AT_linkage_name | constants::DW_AT_MIPS_linkage_name => {
                attrs.linkage_name = Some(attr_string(dwarf, unit, attr.value())?);
            }
            constants::DW_AT_producer => attrs.producer = Some(attr_string(dwarf, unit, attr.value())?),
            constants::DW_AT_byte_size => attrs.byte_size = attr.udata_value(),
            constants::DW_AT_bit_size => attrs.bit_size = attr.udata_value(),
            constants::DW_AT_bit_offset => attrs.bit_offset = attr.udata_value(),
            constants::DW_AT_data_bit_offset => attrs.data_bit_offset = attr.udata_value(),
            constants::DW_AT_data_member_location => attrs.member_location = member_location(attr.value())?,
            constants::DW_AT_count => attrs.count = attr.udata_value(),
            constants::DW_AT_upper_bound => attrs.upper_bound = signed_value(attr.value()),
            constants::DW_AT_const_value => attrs.const_value = signed_value(attr.value()),
            constants::DW_AT_encoding => {
                if let AttributeValue::Encoding(encoding) = attr.value() {
                    attrs.encoding = Some(encoding.0);
                }
            }
            constants::DW_AT_declaration => attrs.declaration = matches!(attr.value(), AttributeValue::Flag(true)),
            constants::DW_AT_external => attrs.external = matches!(attr.value(), AttributeValue::Flag(true)),
            constants::DW_AT_low_pc => {
                attrs.low_pc = dwarf
                    .attr_address(unit, attr.value())
                    .map_err(|err| map_dwarf_error("reading DW_AT_low_pc", err))?;
            }
            constants::DW_AT_type => {
                if let Some(target) = reference_offset(unit, attr.value()) {
                    refs.push((RefSlot::Type, target));
                }
            }
            constants::DW_AT_specification | constants::DW_AT_abstract_origin => {
                if let Some(target) = reference_offset(unit, attr.value()) {
                    refs.push((RefSlot::Specification, target));
                }
            }
            _ => {}
        }
    }

    Ok((attrs, refs))
}

fn attr_string(dwarf: &OwnedDwarf, unit: &Unit<OwnedReader>, value: AttributeValue<OwnedReader>) -> Result<String>
{
    let reader = dwarf
        .attr_string(unit, value)
        .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
    let text = reader
        .to_string_lossy()
        .map_err(|err| map_dwarf_error("decoding DWARF string", err))?;
    Ok(text.into_owned())
}

fn reference_offset(unit: &Unit<OwnedReader>, value: AttributeValue<OwnedReader>) -> Option<u64>
{
    match value {
        AttributeValue::UnitRef(offset) => offset
            .to_debug_info_offset(&unit.header)
            .map(|offset| offset.0 as u64),
        AttributeValue::DebugInfoRef(offset) => Some(offset.0 as u64),
        other => {
            debug!("unsupported reference form {other:?}");
            None
        }
    }
}

fn signed_value(value: AttributeValue<OwnedReader>) -> Option<i64>
{
    match value {
        AttributeValue::Sdata(value) => Some(value),
        other => other.udata_value().map(|value| value as i64),
    }
}

/// `DW_AT_data_member_location` is either a constant or, in older
/// producers, a `DW_OP_plus_uconst` expression.
fn member_location(value: AttributeValue<OwnedReader>) -> Result<Option<u64>>
{
    match value {
        AttributeValue::Exprloc(expression) => {
            let mut reader = expression.0;
            if reader.is_empty() {
                return Ok(None);
            }
            let op = reader
                .read_u8()
                .map_err(|err| map_dwarf_error("reading member location", err))?;
            if op != constants::DW_OP_plus_uconst.0 {
                return Ok(None);
            }
            let offset = reader
                .read_uleb128()
                .map_err(|err| map_dwarf_error("reading member location", err))?;
            Ok(Some(offset))
        }
        other => Ok(other.udata_value()),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_missing_file_is_io_error()
    {
        let result = load_images(&["/nonexistent/libnothing.so"]);
        assert!(matches!(result, Err(BindError::Io(_))));
    }

    #[test]
    fn test_garbage_is_object_error()
    {
        let dir = std::env::temp_dir().join(format!("dwarfbind-image-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("garbage.so");
        fs::write(&path, b"definitely not an object file").unwrap();

        let result = load_images(&[&path]);
        assert!(matches!(result, Err(BindError::Object(_))));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_member_location_forms()
    {
        assert_eq!(member_location(AttributeValue::Udata(24)).unwrap(), Some(24));

        let bytes: Arc<[u8]> = Arc::from(vec![constants::DW_OP_plus_uconst.0, 0x90, 0x01]);
        let expression = gimli::Expression(EndianArcSlice::new(bytes, RunTimeEndian::Little));
        assert_eq!(member_location(AttributeValue::Exprloc(expression)).unwrap(), Some(144));
    }
}
