//! Record layout reconstruction against hand-built debug info

mod common;

use common::{field_names, foo, generate_types, Fixture};
use dwarfbind_core::layout::{FieldRole, OffsetCheck};
use dwarfbind_core::{DieAttrs, Diagnostic, Tag, TypeResolver};

#[test]
fn test_bitfield_gap_gets_synthetic_pad()
{
    let mut fixture = Fixture::new("libfoo.so");
    let record = foo(&mut fixture, 8);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    assert!(resolver.define_type(id).unwrap());
    let layout = resolver.record_layout(id).unwrap();

    let names: Vec<&str> = layout.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c_prepad_64", "c"]);
    assert_eq!(layout.fields[1].bits, Some(3));
    assert_eq!(layout.fields[2].bits, Some(5));
    assert_eq!(layout.fields[2].role, FieldRole::Padding);
    assert_eq!(layout.fields[3].bits, Some(8));
    assert!(!layout.packed);
    assert_eq!(layout.alignment, 4);
}

#[test]
fn test_trailing_pad_after_last_unit()
{
    let mut fixture = Fixture::new("libfoo.so");
    let record = foo(&mut fixture, 12);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    resolver.define_type(id).unwrap();
    let layout = resolver.record_layout(id).unwrap();

    let trailing: Vec<_> = layout
        .fields
        .iter()
        .filter(|field| field.role == FieldRole::TrailingPad)
        .collect();
    assert_eq!(trailing.len(), 1);
    assert_eq!(trailing[0].ctype, "c_char * 4");
    assert_eq!(trailing[0].offset, None);
}

#[test]
fn test_one_byte_trailing_pad()
{
    let mut fixture = Fixture::new("libodd.so");
    let record = fixture.structure("Odd", 9);
    let int = fixture.int;
    fixture.builder.member(record, "a", int, 0);
    fixture.builder.member(record, "b", int, 4);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    resolver.define_type(id).unwrap();
    let layout = resolver.record_layout(id).unwrap();

    let last = layout.fields.last().unwrap();
    assert_eq!(last.role, FieldRole::TrailingPad);
    assert_eq!(last.ctype, "c_char * 1");
    // 9 is not a multiple of 4
    assert!(layout.packed);
    assert_eq!(resolver.alignment_of(id), 1);
}

#[test]
fn test_exactly_filled_unit_has_no_pads()
{
    let mut fixture = Fixture::new("libflags.so");
    let record = fixture.structure("Flags", 4);
    let uint = fixture.uint;
    fixture.builder.bitfield(record, "low", uint, 0, 16);
    fixture.builder.bitfield(record, "high", uint, 16, 16);
    let forest = fixture.finish();

    assert_eq!(field_names(&forest, record), ["low", "high"]);
}

#[test]
fn test_unused_unit_tail_is_padded_once()
{
    let mut fixture = Fixture::new("libflags.so");
    let record = fixture.structure("Split", 8);
    let uint = fixture.uint;
    fixture.builder.bitfield(record, "a", uint, 0, 16);
    fixture.builder.bitfield(record, "b", uint, 32, 8);
    let forest = fixture.finish();

    assert_eq!(field_names(&forest, record), ["a", "b_prepad_32", "b"]);
}

#[test]
fn test_empty_base_is_dropped()
{
    let mut fixture = Fixture::new("libshapes.so");
    let empty = fixture
        .builder
        .add(fixture.unit, Tag::Class, DieAttrs::new().name("Empty").byte_size(1));
    let derived = fixture
        .builder
        .add(fixture.unit, Tag::Class, DieAttrs::new().name("Derived").byte_size(4));
    fixture
        .builder
        .add(derived, Tag::Inheritance, DieAttrs::new().type_ref(empty).member_location(0));
    let int = fixture.int;
    fixture.builder.member(derived, "x", int, 0);
    let forest = fixture.finish();

    assert_eq!(field_names(&forest, derived), ["x"]);
}

#[test]
fn test_misaligned_member_packs_record()
{
    let mut fixture = Fixture::new("libwire.so");
    let record = fixture.structure("Wire", 5);
    let (chr, int) = (fixture.chr, fixture.int);
    fixture.builder.member(record, "tag", chr, 0);
    fixture.builder.member(record, "value", int, 1);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    resolver.define_type(id).unwrap();
    let layout = resolver.record_layout(id).unwrap();

    assert!(layout.packed);
    assert_eq!(layout.pack_reason.as_deref(), Some("field value, required alignment 4, offset 1"));
    assert_eq!(resolver.alignment_of(id), 1);
    assert!(layout.fields.iter().all(|field| field.role != FieldRole::TrailingPad));
}

#[test]
fn test_opaque_member_spans_to_next_location()
{
    let mut fixture = Fixture::new("libholder.so");
    let hidden = fixture
        .builder
        .add(fixture.unit, Tag::Structure, DieAttrs::new().name("Hidden").declaration());
    let record = fixture.structure("Holder", 24);
    let int = fixture.int;
    fixture.builder.member(record, "hidden", hidden, 0);
    fixture.builder.member(record, "after", int, 16);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    resolver.define_type(id).unwrap();
    let layout = resolver.record_layout(id).unwrap();

    assert_eq!(layout.fields[0].role, FieldRole::Opaque);
    assert_eq!(layout.fields[0].ctype, "c_char * 16");
    assert_eq!(layout.fields[1].offset, Some(OffsetCheck::Expected(16)));
    assert!(resolver
        .diagnostics()
        .iter()
        .any(|diagnostic| diagnostic.to_string().starts_with("incomplete type struct_Hidden")));
}

#[test]
fn test_packed_bitfield_crossing_unit_end()
{
    // struct __attribute__((packed)) Hdr { unsigned a : 30, b : 4, c : 1; }
    let mut fixture = Fixture::new("libhdr.so");
    let record = fixture.structure("Hdr", 5);
    let uint = fixture.uint;
    fixture.builder.bitfield(record, "a", uint, 0, 30);
    fixture.builder.bitfield(record, "b", uint, 30, 4);
    fixture.builder.bitfield(record, "c", uint, 34, 1);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let id = resolver.resolve(Some(record)).unwrap();
    resolver.define_type(id).unwrap();
    let layout = resolver.record_layout(id).unwrap();

    let names: Vec<&str> = layout.fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c"]);
    assert!(layout.packed);
}

#[test]
fn test_opaque_member_before_data_bit_offset_bitfield()
{
    let mut fixture = Fixture::new("libholder.so");
    let hidden = fixture
        .builder
        .add(fixture.unit, Tag::Structure, DieAttrs::new().name("Hidden").declaration());
    let record = fixture.structure("Holder", 20);
    let uint = fixture.uint;
    fixture.builder.member(record, "hidden", hidden, 0);
    fixture.builder.bitfield(record, "flag", uint, 128, 3);
    let forest = fixture.finish();

    let module = generate_types(&forest, &["Holder"]);
    assert!(module.source.contains("( \"hidden\", c_char * 16 )"), "{}", module.source);
    assert!(!module
        .diagnostics
        .iter()
        .any(|diagnostic| matches!(diagnostic, Diagnostic::LayoutMismatch { .. })));
}

#[test]
fn test_same_name_in_two_units_is_one_type()
{
    let mut fixture = Fixture::new("libpoint.so");
    let first = fixture.structure("Point", 8);
    let int = fixture.int;
    fixture.builder.member(first, "x", int, 0);
    fixture.builder.member(first, "y", int, 4);

    let unit = fixture.builder.add_unit(fixture.image, Some("GNU C17 12.2.0 -O0 -g"));
    let int = fixture.builder.base_type(unit, "int", 4, common::SIGNED);
    let second = fixture
        .builder
        .add(unit, Tag::Structure, DieAttrs::new().name("Point").byte_size(8));
    fixture.builder.member(second, "x", int, 0);
    fixture.builder.member(second, "y", int, 4);
    let forest = fixture.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let a = resolver.resolve(Some(first)).unwrap();
    let b = resolver.resolve(Some(second)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_anonymous_types_are_unique_per_image()
{
    let mut builder = dwarfbind_core::ForestBuilder::new();
    let mut anonymous = Vec::new();
    for image_name in ["liba.so", "libb.so"] {
        let image = builder.add_image(image_name);
        let unit = builder.add_unit(image, None);
        anonymous.push(builder.add(unit, Tag::Structure, DieAttrs::new().byte_size(4)));
    }
    let forest = builder.finish();

    let mut resolver = TypeResolver::new(&forest, &[]);
    let a = resolver.resolve(Some(anonymous[0])).unwrap();
    let b = resolver.resolve(Some(anonymous[1])).unwrap();
    assert_ne!(a, b);
    assert!(resolver.py_name(a).starts_with("struct_anon_0_"));
    assert!(resolver.py_name(b).starts_with("struct_anon_1_"));
}
