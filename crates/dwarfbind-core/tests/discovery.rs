//! Which types, functions and variables the discovery walk picks up

mod common;

use common::Fixture;
use dwarfbind_core::filter::discover;
use dwarfbind_core::{
    generate, DieAttrs, DieRef, GenerateOptions, NameSelection, QualifiedName, Tag, TypeMatch, TypeRequest,
    TypeResolver, TypeSelection,
};

fn named(name: &str) -> QualifiedName
{
    QualifiedName::parse(name)
}

#[test]
fn test_listed_request_descends_only_into_its_scopes()
{
    let mut fixture = Fixture::new("libgui.so");
    let unit = fixture.unit;
    let gui = fixture.builder.add(unit, Tag::Namespace, DieAttrs::new().name("gui"));
    let window = fixture
        .builder
        .add(gui, Tag::Class, DieAttrs::new().name("Window").byte_size(4));
    let part = fixture
        .builder
        .add(window, Tag::Structure, DieAttrs::new().name("Part").byte_size(4));
    let int = fixture.int;
    fixture.builder.member(part, "id", int, 0);
    let other = fixture.builder.add(unit, Tag::Namespace, DieAttrs::new().name("other"));
    fixture
        .builder
        .add(other, Tag::Structure, DieAttrs::new().name("Part").byte_size(4));
    let forest = fixture.finish();

    let options = GenerateOptions::new("gui")
        .with_type(TypeRequest::new("Part").c_name("gui::Window::Part"))
        .unwrap();
    let mut resolver = TypeResolver::new(&forest, &[]);
    discover(&forest, &options, &mut resolver).unwrap();

    assert_eq!(resolver.types_named(&named("gui::Window::Part")).len(), 1);
    assert!(resolver.types_named(&named("other::Part")).is_empty());
    assert!(resolver.diagnostics().is_empty());
}

#[test]
fn test_namespace_filter_limits_descent()
{
    let mut fixture = Fixture::new("libsplit.so");
    let unit = fixture.unit;
    let api = fixture.builder.add(unit, Tag::Namespace, DieAttrs::new().name("api"));
    fixture
        .builder
        .add(api, Tag::Structure, DieAttrs::new().name("Handle").byte_size(8));
    let detail = fixture.builder.add(unit, Tag::Namespace, DieAttrs::new().name("detail"));
    fixture
        .builder
        .add(detail, Tag::Structure, DieAttrs::new().name("Impl").byte_size(8));
    let forest = fixture.finish();

    let options = GenerateOptions {
        namespace_filter: Some(Box::new(|die: &DieRef<'_>| die.name() != Some("detail"))),
        ..GenerateOptions::everything("split", Vec::new())
    };
    let mut resolver = TypeResolver::new(&forest, &[]);
    discover(&forest, &options, &mut resolver).unwrap();

    assert_eq!(resolver.types_named(&named("api::Handle")).len(), 1);
    assert!(resolver.types_named(&named("detail::Impl")).is_empty());
}

#[test]
fn test_type_predicate_can_attach_hints()
{
    let mut fixture = Fixture::new("libfoo.so");
    common::foo(&mut fixture, 8);
    let forest = fixture.finish();

    let options = GenerateOptions {
        types: TypeSelection::Predicate(Box::new(|die: &DieRef<'_>| match die.name() {
            Some("Foo") => TypeMatch::Hinted(TypeRequest::new("FooRecord").pack()),
            _ => TypeMatch::Skip,
        })),
        ..GenerateOptions::new("foo")
    };
    let module = generate(&forest, &options).unwrap();

    assert!(module.source.contains("\nFooRecord = struct_Foo"), "{}", module.source);
    assert!(module
        .source
        .contains("struct_Foo._pack_ = 1 # explicitly requested by type hint\n"));
}

#[test]
fn test_first_definition_per_name_wins()
{
    let mut fixture = Fixture::new("libwidget.so");
    let image = fixture.image;
    let first_unit = fixture.unit;
    let int = fixture.int;
    let first_open = fixture.builder.add(
        first_unit,
        Tag::Subprogram,
        DieAttrs::new().name("widget_open").external().low_pc(0x1000),
    );
    let first_count = fixture.builder.add(
        first_unit,
        Tag::Variable,
        DieAttrs::new().name("widget_count").type_ref(int).external(),
    );

    let second_unit = fixture.builder.add_unit(image, Some("GNU C17 12.2.0 -O0 -g"));
    let int = fixture.builder.base_type(second_unit, "int", 4, common::SIGNED);
    fixture.builder.add(
        second_unit,
        Tag::Subprogram,
        DieAttrs::new().name("widget_open").external().low_pc(0x2000),
    );
    fixture.builder.add(
        second_unit,
        Tag::Variable,
        DieAttrs::new().name("widget_count").type_ref(int).external(),
    );
    let forest = fixture.finish();

    let options = GenerateOptions {
        functions: NameSelection::Names(vec!["widget_open".to_string()]),
        globals: NameSelection::Names(vec!["widget_count".to_string()]),
        ..GenerateOptions::new("widget")
    };
    let mut resolver = TypeResolver::new(&forest, &[]);
    let found = discover(&forest, &options, &mut resolver).unwrap();

    assert_eq!(found.functions[&named("widget_open")], Some(first_open));
    assert_eq!(found.variables[&named("widget_count")], Some(first_count));
    assert_eq!(found.producers.len(), 2);
}
