//! End-to-end generation over hand-built debug info

mod common;

use common::{foo, generate_types, Fixture};
use dwarfbind_core::{
    generate, inspect, BindError, Diagnostic, DieAttrs, FieldHint, GenerateOptions, MacroSource, ModuleManifest,
    NameSelection, Subject, SymbolPattern, Tag, TypeRequest,
};

fn widget_library() -> Fixture
{
    let mut fixture = Fixture::new("/usr/lib/libwidget.so");
    let (int, uint) = (fixture.int, fixture.uint);
    let open = fixture.builder.add(
        fixture.unit,
        Tag::Subprogram,
        DieAttrs::new().name("widget_open").type_ref(int).external().low_pc(0x1000),
    );
    fixture
        .builder
        .add(open, Tag::FormalParameter, DieAttrs::new().name("flags").type_ref(uint));
    fixture.builder.add(
        fixture.unit,
        Tag::Variable,
        DieAttrs::new().name("widget_count").type_ref(int).external(),
    );
    fixture.builder.add_symbol(fixture.image, "widget_open", 0x1000, 64);
    fixture.builder.add_symbol(fixture.image, "widget_open_v2", 0x1000, 64);
    fixture.builder.add_symbol(fixture.image, "widget_count", 0x2000, 4);
    fixture
}

#[test]
fn test_module_skeleton()
{
    let mut fixture = Fixture::new("/usr/lib/libfoo.so.1");
    foo(&mut fixture, 8);
    let forest = fixture.finish();

    let options = GenerateOptions {
        header: Some("# header\n".to_string()),
        trailer: Some("# trailer\n".to_string()),
        ..GenerateOptions::new("foo")
    }
    .with_type(TypeRequest::new("Foo"))
    .unwrap();
    let module = generate(&forest, &options).unwrap();
    let source = &module.source;

    assert!(source.starts_with("# DON'T EDIT THIS FILE. It was generated by dwarfbind.\n#\n# header\n"));
    assert!(source.ends_with("   test_classes( __ctypegen_failed_macros )\n# trailer\n"));
    assert!(source.contains("\nclass struct_Foo( Structure, TestableCtypeClass ):\n   pass\n"));
    assert!(source.contains("struct_Foo._ctypegen_native_size = 8\n"));
    assert!(source.contains("   ( \"c_prepad_64\", c_uint, 5 ),\n"));
    assert!(source.contains("struct_Foo._ctypegen_offsets = [ 0, None, -1, None ]\n"));
    assert!(source.contains("\nFoo = struct_Foo # python hint differs from ctype\n"));
    assert_eq!(source.matches("\nFoo = struct_Foo").count(), 1);
    assert!(source.contains("CTYPEGEN_SONAMES = [\n\t'libfoo.so.1',\n]\n"));
    assert!(source.contains("CTYPEGEN_producers__ = {\n\t\"GNU C17 12.2.0 -O2 -g\",\n}\n"));
    assert!(module.diagnostics.is_empty(), "{:?}", module.diagnostics);
}

#[test]
fn test_repeated_definitions_emit_once()
{
    let mut fixture = Fixture::new("libpoint.so");
    for _ in 0..2 {
        let unit = fixture.builder.add_unit(fixture.image, None);
        let int = fixture.builder.base_type(unit, "int", 4, common::SIGNED);
        let point = fixture
            .builder
            .add(unit, Tag::Structure, DieAttrs::new().name("Point").byte_size(8));
        fixture.builder.member(point, "x", int, 0);
        fixture.builder.member(point, "y", int, 4);
    }
    let forest = fixture.finish();

    let module = generate_types(&forest, &["Point"]);
    assert_eq!(module.source.matches("class struct_Point(").count(), 1);
    assert_eq!(module.source.matches("struct_Point._fields_ = ").count(), 1);
    assert_eq!(module.manifest.types.len(), 1);
}

#[test]
fn test_signature_on_every_alias()
{
    let forest = widget_library().finish();
    let options = GenerateOptions {
        functions: NameSelection::Names(vec!["widget_open".to_string()]),
        globals: NameSelection::Names(vec!["widget_count".to_string()]),
        ..GenerateOptions::new("widget")
    };
    let module = generate(&forest, &options).unwrap();
    let source = &module.source;

    assert_eq!(module.functions.len(), 1);
    assert_eq!(module.functions[0].linker_names, ["widget_open", "widget_open_v2"]);
    assert_eq!(source.matches("lib.widget_open.restype = c_int\n").count(), 1);
    assert_eq!(source.matches("lib.widget_open_v2.restype = c_int\n").count(), 1);
    assert!(source.contains("lib.widget_open_v2.argtypes = [\n         c_uint ]\n"));
    assert!(source.contains("   'widget_open': CFUNCTYPE( c_int, c_uint\n      ),\n"));
    assert!(source.contains("      self.widget_count = ( c_int ).in_dll( dll, 'widget_count' )\n"));
}

#[test]
fn test_missing_names_are_diagnostics()
{
    let forest = widget_library().finish();
    let options = GenerateOptions {
        functions: NameSelection::Names(vec!["widget_close".to_string()]),
        ..GenerateOptions::new("widget")
    }
    .with_type(TypeRequest::new("Gadget"))
    .unwrap();
    let module = generate(&forest, &options).unwrap();

    let diagnostics = module.diagnostics.into_vec();
    assert!(diagnostics.contains(&Diagnostic::MissingDefinition {
        subject: Subject::Type,
        name: "Gadget".to_string(),
    }));
    assert!(diagnostics.contains(&Diagnostic::MissingDefinition {
        subject: Subject::Function,
        name: "widget_close".to_string(),
    }));
}

#[test]
fn test_symbol_pattern_selects_one_function()
{
    let forest = widget_library().finish();
    let options = GenerateOptions {
        symbol_patterns: vec![SymbolPattern::function("widget_o.en")],
        ..GenerateOptions::new("widget")
    };
    let module = generate(&forest, &options).unwrap();
    assert_eq!(module.functions.len(), 1);
    assert_eq!(module.functions[0].name, "widget_open");
}

#[test]
fn test_ambiguous_symbol_pattern_is_fatal()
{
    let forest = widget_library().finish();
    let options = GenerateOptions {
        symbol_patterns: vec![SymbolPattern::function("widget_open.*")],
        ..GenerateOptions::new("widget")
    };
    match generate(&forest, &options) {
        Err(BindError::AmbiguousSymbol { candidates, .. }) => {
            assert_eq!(candidates, ["widget_open", "widget_open_v2"]);
        }
        other => panic!("expected AmbiguousSymbol, got {other:?}"),
    }
}

#[test]
fn test_hint_chain_takes_one_round_per_level()
{
    let mut fixture = Fixture::new("libnest.so");
    let int = fixture.int;
    let outer = fixture.structure("Outer", 8);
    let mid = fixture.builder.add(outer, Tag::Structure, DieAttrs::new().byte_size(8));
    let deep = fixture.builder.add(mid, Tag::Structure, DieAttrs::new().byte_size(4));
    fixture.builder.member(deep, "z", int, 0);
    fixture.builder.member(mid, "deep", deep, 0);
    fixture.builder.member(mid, "w", int, 4);
    fixture.builder.member(outer, "mid", mid, 0);
    let forest = fixture.finish();

    let request = TypeRequest::new("Outer").field(
        "mid",
        FieldHint::named_type(TypeRequest::new("Mid").field("deep", FieldHint::named_type("Deep"))),
    );
    let options = GenerateOptions::new("nest").with_type(request).unwrap();
    let module = generate(&forest, &options).unwrap();

    assert_eq!(module.hint_rounds, 3);
    assert!(module.source.contains("\nMid = struct_Outer"));
    assert!(module.source.contains("\nDeep = struct_Outer"));
    assert!(module.manifest.names.contains("Deep"));
}

#[test]
fn test_hint_for_unknown_field_is_skipped()
{
    let mut fixture = Fixture::new("libfoo.so");
    foo(&mut fixture, 8);
    let forest = fixture.finish();

    let request = TypeRequest::new("Foo").field("nope", FieldHint::rename("yes"));
    let options = GenerateOptions::new("foo").with_type(request).unwrap();
    let module = generate(&forest, &options).unwrap();

    assert!(module.diagnostics.iter().any(|diagnostic| matches!(
        diagnostic,
        Diagnostic::Skipped { subject, .. } if subject == "hint for field nope of struct_Foo"
    )));
}

#[test]
fn test_existing_module_types_are_imported()
{
    fn shared(fixture: &mut Fixture) -> dwarfbind_core::DieId
    {
        let int = fixture.int;
        let shared = fixture.structure("Shared", 4);
        fixture.builder.member(shared, "v", int, 0);
        shared
    }

    let mut first = Fixture::new("liba.so");
    shared(&mut first);
    let liba = generate_types(&first.finish(), &["Shared"]);
    assert!(liba.manifest.names.contains("struct_Shared"));

    let mut second = Fixture::new("libb.so");
    let shared_die = shared(&mut second);
    let pointer = second.builder.pointer_to(second.unit, Some(shared_die));
    let user = second.structure("User", 16);
    second.builder.member(user, "s", shared_die, 0);
    second.builder.member(user, "p", pointer, 8);
    let forest = second.finish();

    let mut manifest = ModuleManifest::from_json(&liba.manifest.to_json().unwrap()).unwrap();
    assert_eq!(manifest, liba.manifest);
    manifest.module = "liba".to_string();
    let options = GenerateOptions {
        existing: vec![manifest],
        ..GenerateOptions::new("libb")
    }
    .with_type(TypeRequest::new("User"))
    .unwrap();
    let module = generate(&forest, &options).unwrap();
    let source = &module.source;

    assert!(source.contains("\nimport liba\n"));
    assert!(!source.contains("class struct_Shared("));
    assert!(source.contains("   ( \"s\", liba.struct_Shared ),\n"));
    assert!(source.contains("   ( \"p\", POINTER( liba.struct_Shared ) ),\n"));
    assert!(module.diagnostics.is_empty(), "{:?}", module.diagnostics);
    assert!(module.manifest.types.iter().all(|entry| entry.python_name != "struct_Shared"));
}

#[test]
fn test_pointer_targets_follow_deep_inspect()
{
    let build = || {
        let mut fixture = Fixture::new("libholder.so");
        let int = fixture.int;
        let inner = fixture.structure("Inner", 4);
        fixture.builder.member(inner, "v", int, 0);
        let pointer = fixture.builder.pointer_to(fixture.unit, Some(inner));
        let holder = fixture.structure("Holder", 8);
        fixture.builder.member(holder, "p", pointer, 0);
        fixture.finish()
    };

    let shallow = generate_types(&build(), &["Holder"]);
    assert!(shallow.source.contains("\nclass struct_Inner( Structure, TestableCtypeClass ):\n"));
    assert!(!shallow.source.contains("struct_Inner._ctypegen_have_definition"));

    let forest = build();
    let options = GenerateOptions {
        deep_inspect: true,
        ..GenerateOptions::new("holder")
    }
    .with_type(TypeRequest::new("Holder"))
    .unwrap();
    let deep = generate(&forest, &options).unwrap();
    assert!(deep.source.contains("struct_Inner._ctypegen_have_definition = True\n"));
}

#[test]
fn test_typedef_and_enum()
{
    let mut fixture = Fixture::new("libcolor.so");
    let uint = fixture.uint;
    let color = fixture.builder.add(
        fixture.unit,
        Tag::Enumeration,
        DieAttrs::new().name("Color").byte_size(4).type_ref(uint),
    );
    fixture
        .builder
        .add(color, Tag::Enumerator, DieAttrs::new().name("RED").const_value(0));
    fixture
        .builder
        .add(color, Tag::Enumerator, DieAttrs::new().name("BLUE").const_value(2));
    let record = foo(&mut fixture, 8);
    fixture
        .builder
        .add(fixture.unit, Tag::Typedef, DieAttrs::new().name("Foo_t").type_ref(record));
    let forest = fixture.finish();

    let module = generate_types(&forest, &["Color", "Foo_t"]);
    let source = &module.source;

    assert!(source.contains("class enum_Color( c_uint ):\n   _ctypegen_have_definition = True\n"));
    assert!(source.contains("   BLUE = c_uint(2).value # 0x2\n"));
    assert!(source.contains("\nColor = enum_Color"));
    assert!(source.contains("\nFoo_t = struct_Foo # typedef\n"));
    assert!(source.contains("\nFoo = struct_Foo # unambiguous name for tagged type\n"));
    assert!(module.manifest.types.iter().any(|entry| entry.python_name == "Foo_t"));
}

#[test]
fn test_macros_reuse_module_names()
{
    let mut fixture = Fixture::new("libwidget.so");
    foo(&mut fixture, 8);
    let forest = fixture.finish();

    let header = "#define WIDGET_MAX 16U\n\
                  #define WIDGET_LIMIT (WIDGET_MAX * 2)\n\
                  #define WIDGET_UNKNOWN (missing + 1)\n\
                  #define FOO_SIZE sizeof(Foo)\n\
                  #define Foo Foo\n";
    let options = GenerateOptions {
        macro_sources: vec![MacroSource::new("widget.h", header)],
        ..GenerateOptions::new("widget")
    }
    .with_type(TypeRequest::new("Foo"))
    .unwrap();
    let module = generate(&forest, &options).unwrap();

    let names: Vec<&str> = module.macros.iter().map(|translated| translated.name.as_str()).collect();
    assert_eq!(names, ["WIDGET_MAX", "WIDGET_LIMIT"]);
    assert!(module.source.contains("try:\n   WIDGET_MAX = 16 # widget.h:1\nexcept:\n"));
    assert!(module.source.contains("   WIDGET_LIMIT = (WIDGET_MAX * 2) # widget.h:2\n"));
    assert!(module.manifest.names.contains("WIDGET_LIMIT"));
}

#[test]
fn test_self_check_reports_overridden_layout()
{
    let mut fixture = Fixture::new("libskew.so");
    let chr = fixture.chr;
    let record = fixture.structure("Skewed", 2);
    fixture.builder.member(record, "a", chr, 0);
    fixture.builder.member(record, "b", chr, 1);
    let forest = fixture.finish();

    let request = TypeRequest::new("Skewed").field("a", FieldHint::ctype("c_int"));
    let options = GenerateOptions::new("skew").with_type(request).unwrap();
    let module = generate(&forest, &options).unwrap();

    assert!(module.source.contains("   ( \"a\", c_int ),\n"));
    let details: Vec<String> = module
        .diagnostics
        .iter()
        .filter_map(|diagnostic| match diagnostic {
            Diagnostic::LayoutMismatch { detail, .. } => Some(detail.clone()),
            _ => None,
        })
        .collect();
    assert!(details.contains(&"field b of struct_Skewed has offset 4 in ctypes, 1 in DWARF".to_string()));
    assert!(details.contains(&"type struct_Skewed has mismatched size. 8 in ctypes, 2 in DWARF".to_string()));
}

#[test]
fn test_unaligned_pointer_unless_allowed()
{
    let build = || {
        let mut fixture = Fixture::new("libpacket.so");
        let chr = fixture.chr;
        let pointer = fixture.builder.pointer_to(fixture.unit, None);
        let record = fixture.structure("Packet", 9);
        fixture.builder.member(record, "c", chr, 0);
        fixture.builder.member(record, "p", pointer, 1);
        fixture.finish()
    };

    let module = generate_types(&build(), &["Packet"]);
    assert!(module.source.contains("struct_Packet._pack_ = 1 # field p, required alignment 8, offset 1\n"));
    assert!(module.diagnostics.iter().any(|diagnostic| diagnostic
        == &Diagnostic::UnalignedPointer {
            type_name: "struct_Packet".to_string(),
            field: "p".to_string(),
            offset: 1,
            misalignment: 1,
        }));

    let forest = build();
    let request = TypeRequest::new("Packet").field("p", FieldHint::allow_unaligned());
    let options = GenerateOptions::new("packet").with_type(request).unwrap();
    let allowed = generate(&forest, &options).unwrap();
    assert!(allowed.source.contains("struct_Packet.allow_unaligned = ['p']\n"));
    assert!(allowed.diagnostics.is_empty(), "{:?}", allowed.diagnostics);
}

#[test]
fn test_inspect()
{
    let mut fixture = Fixture::new("libfoo.so");
    foo(&mut fixture, 8);
    let forest = fixture.finish();

    let text = inspect(&forest, "Foo").unwrap();
    assert!(text.starts_with("struct Foo (struct_Foo)\n  size 8, align 4\n"));
    assert!(text.contains("c_prepad_64"));

    assert!(matches!(inspect(&forest, "Bar"), Err(BindError::InvalidRequest(_))));
}

#[test]
fn test_with_type_rejects_predicate_selection()
{
    let options = GenerateOptions::everything("all", Vec::new());
    assert!(matches!(
        options.with_type(TypeRequest::new("Foo")),
        Err(BindError::InvalidRequest(_))
    ));
}
