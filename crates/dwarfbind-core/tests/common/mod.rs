//! Shared fixtures: small synthetic DIE forests standing in for compiled images.

#![allow(dead_code)]

use dwarfbind_core::die::ImageIndex;
use dwarfbind_core::{DieAttrs, DieForest, DieId, ForestBuilder, GenerateOptions, GeneratedModule, Tag, TypeRequest};

pub const SIGNED: u8 = gimli::constants::DW_ATE_signed.0;
pub const UNSIGNED: u8 = gimli::constants::DW_ATE_unsigned.0;
pub const SIGNED_CHAR: u8 = gimli::constants::DW_ATE_signed_char.0;

/// One image with one unit and the base types most fixtures need.
pub struct Fixture
{
    pub builder: ForestBuilder,
    pub image: ImageIndex,
    pub unit: DieId,
    pub int: DieId,
    pub uint: DieId,
    pub chr: DieId,
}

impl Fixture
{
    pub fn new(image_name: &str) -> Self
    {
        let mut builder = ForestBuilder::new();
        let image = builder.add_image(image_name);
        let unit = builder.add_unit(image, Some("GNU C17 12.2.0 -O2 -g"));
        let int = builder.base_type(unit, "int", 4, SIGNED);
        let uint = builder.base_type(unit, "unsigned int", 4, UNSIGNED);
        let chr = builder.base_type(unit, "char", 1, SIGNED_CHAR);
        Self {
            builder,
            image,
            unit,
            int,
            uint,
            chr,
        }
    }

    pub fn structure(&mut self, name: &str, byte_size: u64) -> DieId
    {
        self.builder
            .add(self.unit, Tag::Structure, DieAttrs::new().name(name).byte_size(byte_size))
    }

    pub fn finish(self) -> DieForest
    {
        self.builder.finish()
    }
}

/// `struct Foo { int a; unsigned b : 3; unsigned c : 8; }` with the
/// second bitfield starting at bit 40.
pub fn foo(fixture: &mut Fixture, byte_size: u64) -> DieId
{
    let foo = fixture.structure("Foo", byte_size);
    let (int, uint) = (fixture.int, fixture.uint);
    fixture.builder.member(foo, "a", int, 0);
    fixture.builder.bitfield(foo, "b", uint, 32, 3);
    fixture.builder.bitfield(foo, "c", uint, 40, 8);
    foo
}

/// Generate a module binding `names` and nothing else.
pub fn generate_types(forest: &DieForest, names: &[&str]) -> GeneratedModule
{
    let mut options = GenerateOptions::new("fixture");
    for name in names {
        options = options.with_type(TypeRequest::new(*name)).unwrap();
    }
    dwarfbind_core::generate(forest, &options).unwrap()
}

pub fn field_names(forest: &DieForest, record: DieId) -> Vec<String>
{
    let mut resolver = dwarfbind_core::TypeResolver::new(forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    assert!(resolver.define_type(id).unwrap());
    resolver
        .record_layout(id)
        .map(|layout| layout.fields.iter().map(|field| field.name.clone()).collect())
        .unwrap_or_default()
}
