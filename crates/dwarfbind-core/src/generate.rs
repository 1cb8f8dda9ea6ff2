//! # Generation
//!
//! The library entry points. [`generate`] runs one session end to end:
//!
//! 1. discovery and hint application ([`crate::filter::discover`])
//! 2. definition of every variable type, function signature and queued type
//! 3. macro translation
//! 4. rendering ([`crate::emit`])
//! 5. the self-check ([`crate::verify`]) and the manifest for later reuse
//!
//! Diagnostics from every phase come back with the module.

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use serde::Serialize;
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics, Subject};
use crate::die::{DieForest, DieRef, QualifiedName};
use crate::emit::{aliases, render_module, ModuleParts};
use crate::error::{BindError, Result};
use crate::filter::discover;
use crate::macros::{translate, MacroSource, TranslatedMacro};
use crate::manifest::{ManifestType, ModuleManifest};
use crate::pyident::{as_python_id, is_python_keyword};
use crate::request::{NamePredicate, NameSelection, SymbolPattern, TypeMatch, TypeRequest, TypeSelection};
use crate::resolver::TypeResolver;
use crate::types::{Category, TypeId, TypeKind, TypeState};
use crate::verify::{self_check, LayoutModel};

/// What to generate and how.
#[derive(Default)]
pub struct GenerateOptions
{
    /// Python module name, recorded in the manifest
    pub module_name: String,
    pub types: TypeSelection,
    pub functions: NameSelection,
    pub globals: NameSelection,
    pub symbol_patterns: Vec<SymbolPattern>,
    /// Modules whose types are imported instead of redefined, in priority order
    pub existing: Vec<ModuleManifest>,
    /// Decides which namespaces and records are descended into
    pub namespace_filter: Option<NamePredicate>,
    pub macro_sources: Vec<MacroSource>,
    pub deep_inspect: bool,
    pub nameless_enums: bool,
    /// Text placed before the prelude
    pub header: Option<String>,
    /// Text placed at the very end
    pub trailer: Option<String>,
}

impl GenerateOptions
{
    pub fn new(module_name: impl Into<String>) -> Self
    {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    /// Every named type except `skip`, every function whose entry point is
    /// exported and every variable whose linker name is exported.
    pub fn everything(module_name: impl Into<String>, skip: Vec<String>) -> Self
    {
        let skip: BTreeSet<String> = skip.into_iter().collect();
        Self {
            types: TypeSelection::Predicate(Box::new(move |die: &DieRef<'_>| {
                if die.name().is_some_and(|name| skip.contains(name)) {
                    TypeMatch::Skip
                } else {
                    TypeMatch::Include
                }
            })),
            functions: NameSelection::Predicate(Box::new(|die: &DieRef<'_>| {
                die.attrs().low_pc.is_some_and(|pc| die.symbols().has_address(pc))
            })),
            globals: NameSelection::Predicate(Box::new(|die: &DieRef<'_>| {
                die.linker_name().is_some_and(|name| die.symbols().contains(name))
            })),
            ..Self::new(module_name)
        }
    }

    /// Request one type, by C++ name or with hints.
    pub fn with_type(mut self, request: TypeRequest) -> Result<Self>
    {
        match &mut self.types {
            TypeSelection::Requests(requests) => requests.push(request),
            TypeSelection::Predicate(_) => {
                return Err(BindError::InvalidRequest(format!(
                    "cannot add type {} to a predicate selection",
                    request.name
                )))
            }
        }
        Ok(self)
    }
}

impl fmt::Debug for GenerateOptions
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("GenerateOptions")
            .field("module_name", &self.module_name)
            .field("types", &self.types)
            .field("functions", &self.functions)
            .field("globals", &self.globals)
            .field("symbol_patterns", &self.symbol_patterns)
            .field("existing", &self.existing.len())
            .field("macro_sources", &self.macro_sources.len())
            .field("deep_inspect", &self.deep_inspect)
            .field("nameless_enums", &self.nameless_enums)
            .finish_non_exhaustive()
    }
}

/// Signature assignment for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionBinding
{
    /// Python name of the function's qualified name
    pub name: String,
    /// Every exported name at the function's address, sorted
    pub linker_names: Vec<String>,
    pub restype: String,
    pub argtypes: Vec<String>,
    /// `CFUNCTYPE( ... )` spelling
    pub prototype: String,
}

/// Typed view of one global variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalBinding
{
    pub name: String,
    pub ctype: String,
    /// Name looked up in the library
    pub symbol: String,
}

/// Result of one generation session.
#[derive(Debug)]
pub struct GeneratedModule
{
    pub source: String,
    pub manifest: ModuleManifest,
    pub functions: Vec<FunctionBinding>,
    pub globals: Vec<GlobalBinding>,
    pub macros: Vec<TranslatedMacro>,
    /// Rounds the hint fixed point took
    pub hint_rounds: usize,
    pub diagnostics: Diagnostics,
}

/// Generate a python module for `forest`.
///
/// ## Errors
///
/// Fatal errors only: unrepresentable types, ambiguous symbol patterns and
/// malformed requests. Everything else is a diagnostic on the result.
pub fn generate(forest: &DieForest, options: &GenerateOptions) -> Result<GeneratedModule>
{
    info!("Generating {} from {} images", options.module_name, forest.images().len());
    let mut resolver = TypeResolver::new(forest, &options.existing)
        .deep_inspect(options.deep_inspect)
        .nameless_enums(options.nameless_enums);
    let found = discover(forest, options, &mut resolver)?;

    let mut globals = Vec::new();
    for (name, die) in &found.variables {
        let Some(die) = *die else {
            resolver.report_missing(Subject::Variable, name.to_string());
            continue;
        };
        let die = forest.die(die);
        let ty = resolver.resolve(die.declared_type())?;
        resolver.define_type(ty)?;
        globals.push((name.clone(), die, ty));
    }

    let mut functions = Vec::new();
    for (name, die) in &found.functions {
        let Some(die) = *die else {
            resolver.report_missing(Subject::Function, name.to_string());
            continue;
        };
        let die = forest.die(die);
        let ty = resolver.resolve(Some(die.id()))?;
        resolver.define_type(ty)?;
        functions.push((name.clone(), die, ty));
    }

    resolver.drain_define_queue()?;

    let globals = bind_globals(&resolver, globals);
    let functions = bind_functions(&mut resolver, functions);

    let aliases = aliases(&resolver);
    let mut defined = resolver.defined_names().clone();
    defined.extend(aliases.iter().map(|alias| alias.name.clone()));
    let macros = translate(&options.macro_sources, &mut defined, &options.existing);

    let parts = ModuleParts {
        header: options.header.as_deref(),
        imports: options.existing.iter().map(|manifest| manifest.module.as_str()).collect(),
        aliases: &aliases,
        globals: &globals,
        functions: &functions,
        macros: &macros,
        sonames: forest.images().iter().map(|image| image.soname.as_str()).collect(),
        producers: Some(&found.producers),
        trailer: options.trailer.as_deref(),
    };
    let source = render_module(&resolver, &parts);

    let problems = self_check(&resolver);
    let manifest = build_manifest(&resolver, &options.module_name, defined);
    for problem in problems {
        resolver.report(problem);
    }

    let hint_rounds = resolver.hint_rounds();
    let diagnostics = resolver.into_diagnostics();
    info!(
        "Generated {}: {} bytes, {} functions, {} globals, {} macros, {} diagnostics",
        options.module_name,
        source.len(),
        functions.len(),
        globals.len(),
        macros.len(),
        diagnostics.len()
    );

    Ok(GeneratedModule {
        source,
        manifest,
        functions,
        globals,
        macros,
        hint_rounds,
        diagnostics,
    })
}

fn bind_globals(resolver: &TypeResolver<'_>, mut found: Vec<(QualifiedName, DieRef<'_>, TypeId)>) -> Vec<GlobalBinding>
{
    found.sort_by(|a, b| a.0.cmp(&b.0));
    found
        .into_iter()
        .filter_map(|(name, die, ty)| {
            Some(GlobalBinding {
                name: as_python_id(&name.to_string()),
                ctype: resolver.ctype(ty),
                symbol: die.linker_name()?.to_string(),
            })
        })
        .collect()
}

fn bind_functions(
    resolver: &mut TypeResolver<'_>,
    mut found: Vec<(QualifiedName, DieRef<'_>, TypeId)>,
) -> Vec<FunctionBinding>
{
    found.sort_by(|a, b| a.0.cmp(&b.0));
    let mut bindings = Vec::with_capacity(found.len());

    for (name, die, ty) in found {
        let Some(sig) = resolver.signature_of(ty) else {
            continue;
        };
        let restype = sig.ret.map_or_else(|| "None".to_string(), |ret| resolver.ctype(ret));
        let argtypes: Vec<String> = sig.params.iter().map(|param| resolver.ctype(*param)).collect();

        let mut linker_names = Vec::new();
        if let Some(pc) = die.attrs().low_pc {
            linker_names.extend(die.symbols().names_at(pc).iter().cloned());
        }
        // Inlined external functions may have no address of their own.
        if let Some(symbol) = die.linker_name() {
            if die.attrs().external && die.symbols().contains(symbol) {
                linker_names.push(symbol.to_string());
            }
        }
        linker_names.sort();
        linker_names.dedup();

        let mut usable = Vec::with_capacity(linker_names.len());
        for symbol in linker_names {
            if is_python_keyword(&symbol) {
                resolver.report(Diagnostic::Skipped {
                    subject: format!("function {name}"),
                    reason: format!("its dynamic name {symbol} is a python keyword"),
                });
            } else {
                usable.push(symbol);
            }
        }
        debug!("{name} is exported as {usable:?}");

        bindings.push(FunctionBinding {
            name: resolver.py_name(ty),
            linker_names: usable,
            restype,
            argtypes,
            prototype: resolver.ctype(ty),
        });
    }
    bindings
}

/// Every type a later module may import from this one.
fn build_manifest(resolver: &TypeResolver<'_>, module: &str, names: BTreeSet<String>) -> ModuleManifest
{
    let mut model = LayoutModel::new(resolver);
    let mut manifest = ModuleManifest::new(module);

    for (id, desc) in resolver.descriptors() {
        let Some(die) = desc.die else {
            continue;
        };
        if desc.is_external() || resolver.forest().die(die).name().is_none() {
            continue;
        }
        let exported = match &desc.kind {
            TypeKind::Record(_) | TypeKind::Enum(_) => desc.is_defined(),
            TypeKind::Typedef { target } => desc.state >= TypeState::Declared && !resolver.is_void(*target),
            _ => false,
        };
        if !exported || desc.key.category == Category::Void {
            continue;
        }
        manifest.types.push(ManifestType {
            key: desc.key.clone(),
            python_name: resolver.py_name(id),
            size: resolver.size_of(id),
            align: resolver.alignment_of(id),
            has_pointers: model.has_pointers(id),
        });
    }
    manifest.names = names;
    manifest
}

/// Describe the resolved layout of every type called `name`.
///
/// ## Errors
///
/// As for [`generate`]; an unknown name is an `InvalidRequest`.
pub fn inspect(forest: &DieForest, name: &str) -> Result<String>
{
    let options = GenerateOptions::new("inspect").with_type(TypeRequest::new(name))?;
    let mut resolver = TypeResolver::new(forest, &[]);
    discover(forest, &options, &mut resolver)?;
    resolver.drain_define_queue()?;

    let ids = resolver.types_named(&QualifiedName::parse(name)).to_vec();
    if ids.is_empty() {
        return Err(BindError::InvalidRequest(format!("no type named {name}")));
    }

    let mut out = String::new();
    for id in ids {
        describe(&resolver, id, &mut out).map_err(|err| BindError::InvalidRequest(err.to_string()))?;
    }
    Ok(out)
}

fn describe(resolver: &TypeResolver<'_>, id: TypeId, out: &mut String) -> fmt::Result
{
    let desc = resolver.descriptor(id);
    writeln!(out, "{} ({})", desc.key, resolver.py_name(id))?;
    writeln!(out, "  size {}, align {}", resolver.size_of(id), resolver.alignment_of(id))?;

    match &desc.kind {
        TypeKind::Record(record) => {
            let Some(layout) = &record.layout else {
                return writeln!(out, "  (no definition)");
            };
            if let Some(reason) = &layout.pack_reason {
                writeln!(out, "  packed: {reason}")?;
            }
            for field in &layout.fields {
                match field.bits {
                    Some(bits) => writeln!(out, "  {:<32} {} : {bits}", field.name, field.ctype)?,
                    None => writeln!(out, "  {:<32} {}", field.name, field.ctype)?,
                }
            }
        }
        TypeKind::Enum(info) => {
            for (enumerator, value) in &info.enumerators {
                writeln!(out, "  {enumerator} = {value}")?;
            }
        }
        TypeKind::Typedef { target } => {
            let ctype = target.map_or_else(|| "None".to_string(), |target| resolver.ctype(target));
            writeln!(out, "  = {ctype}")?;
        }
        _ => writeln!(out, "  = {}", resolver.ctype(id))?,
    }
    Ok(())
}
