//! # Discovery
//!
//! Depth-first walk over every unit of every image that finds the types,
//! functions and variables the caller asked for.
//!
//! Scopes are only entered when they can contain something wanted: with
//! plain name lists that is a precomputed set of enclosing scopes, while any
//! predicate forces a full walk because interesting scopes cannot be known
//! up front. Each translation unit repeats the types it uses, so the first
//! match per qualified name wins and later copies are ignored.

use std::collections::{BTreeSet, HashSet};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::diagnostics::Subject;
use crate::die::{DieForest, DieId, DieRef, QualifiedName, Tag};
use crate::error::Result;
use crate::generate::GenerateOptions;
use crate::request::{NamePredicate, SymbolKind, TypeMatch, TypeRequest, TypeSelection};
use crate::resolver::TypeResolver;
use crate::symbols::find_unique;
use crate::types::Category;

/// What the walk found.
#[derive(Debug, Default)]
pub struct Discovery
{
    /// Wanted functions by qualified name; `None` until found
    pub functions: IndexMap<QualifiedName, Option<DieId>>,
    pub variables: IndexMap<QualifiedName, Option<DieId>>,
    /// `DW_AT_producer` of every unit
    pub producers: BTreeSet<String>,
}

enum ScopeFilter<'o>
{
    Custom(&'o NamePredicate),
    Everything,
    Listed(HashSet<QualifiedName>),
}

impl ScopeFilter<'_>
{
    fn accepts(&self, die: &DieRef<'_>) -> bool
    {
        match self {
            ScopeFilter::Custom(predicate) => predicate(die),
            ScopeFilter::Everything => true,
            ScopeFilter::Listed(scopes) => scopes.contains(&die.fullname()),
        }
    }
}

struct Walker<'a, 'f>
{
    options: &'a GenerateOptions,
    resolver: &'a mut TypeResolver<'f>,
    requests: &'a IndexMap<QualifiedName, TypeRequest>,
    scopes: ScopeFilter<'a>,
    found: Discovery,
}

/// Walk `forest`, resolve every wanted type and queue it for definition,
/// then run hint application to its fixed point.
pub fn discover(forest: &DieForest, options: &GenerateOptions, resolver: &mut TypeResolver<'_>) -> Result<Discovery>
{
    let mut requests = IndexMap::new();
    let mut listed_scopes = HashSet::new();
    let mut wildcard = false;

    match &options.types {
        TypeSelection::Requests(list) => {
            for request in list {
                let name = request.source_name();
                listed_scopes.extend(name.scopes());
                requests.insert(name, request.clone());
            }
        }
        TypeSelection::Predicate(_) => wildcard = true,
    }

    let mut found = Discovery::default();
    for selection in [&options.functions, &options.globals] {
        wildcard |= selection.is_predicate();
        for name in selection.listed() {
            listed_scopes.extend(name.scopes());
        }
    }
    for name in options.functions.listed() {
        found.functions.insert(name, None);
    }
    for name in options.globals.listed() {
        found.variables.insert(name, None);
    }

    let scopes = match &options.namespace_filter {
        Some(predicate) => ScopeFilter::Custom(predicate),
        None if wildcard => ScopeFilter::Everything,
        None => ScopeFilter::Listed(listed_scopes),
    };

    let mut walker = Walker {
        options,
        resolver,
        requests: &requests,
        scopes,
        found,
    };
    for unit in forest.units() {
        walker.walk(unit)?;
    }
    walker.select_symbol_patterns(forest)?;
    let Walker { resolver, found, .. } = walker;

    // Requests by name apply to every category found under that name.
    for (name, request) in &requests {
        let ids = resolver.types_named(name).to_vec();
        if ids.is_empty() {
            resolver.report_missing(Subject::Type, name.to_string());
            continue;
        }
        for id in ids {
            if request.applies_to(resolver.descriptor(id).key.category) {
                resolver.apply_hint_to(id, request.clone());
            }
        }
    }
    resolver.apply_hints()?;

    info!(
        "Discovered {} functions, {} variables, {} producers",
        found.functions.values().filter(|die| die.is_some()).count(),
        found.variables.values().filter(|die| die.is_some()).count(),
        found.producers.len()
    );
    Ok(found)
}

impl<'a, 'f> Walker<'a, 'f>
{
    fn walk(&mut self, die: DieRef<'_>) -> Result<()>
    {
        if self.examine(die)? {
            for child in die.children() {
                self.walk(child)?;
            }
        }
        Ok(())
    }

    /// Handle one DIE; returns whether to descend into it.
    fn examine(&mut self, die: DieRef<'_>) -> Result<bool>
    {
        let tag = die.tag();
        if tag.is_unit() {
            if let Some(producer) = &die.attrs().producer {
                self.found.producers.insert(producer.clone());
            }
            return Ok(true);
        }

        // Unnamed types cannot be asked for by name; enumerators still can.
        if die.name().is_none() && tag != Tag::Enumeration {
            return Ok(false);
        }

        if tag == Tag::Variable {
            let name = die.fullname();
            let unseen = self.found.variables.get(&name).map_or(true, Option::is_none);
            if unseen && self.options.globals.accepts(&die) {
                self.found.variables.insert(name, Some(die.id()));
            }
            return Ok(false);
        }

        if die.attrs().declaration {
            return Ok(false);
        }

        if tag == Tag::Subprogram {
            let name = die.fullname();
            let unseen = self.found.functions.get(&name).map_or(true, Option::is_none);
            if unseen && self.options.functions.accepts(&die) {
                self.found.functions.insert(name, Some(die.id()));
            }
            return Ok(false);
        }

        if matches!(
            tag,
            Tag::Structure | Tag::Class | Tag::Union | Tag::Enumeration | Tag::Typedef | Tag::BaseType
        ) {
            self.examine_type(die)?;
        }

        if matches!(tag, Tag::Namespace | Tag::Structure | Tag::Class) {
            return Ok(self.scopes.accepts(&die));
        }
        Ok(false)
    }

    fn examine_type(&mut self, die: DieRef<'_>) -> Result<()>
    {
        let verdict = match &self.options.types {
            TypeSelection::Requests(_) => {
                if self.requests.contains_key(&die.fullname()) {
                    TypeMatch::Include
                } else {
                    TypeMatch::Skip
                }
            }
            TypeSelection::Predicate(predicate) => predicate(&die),
        };

        match verdict {
            TypeMatch::Skip => {}
            TypeMatch::Include => {
                let id = self.resolver.resolve(Some(die.id()))?;
                self.resolver.queue_define(id);
            }
            TypeMatch::Hinted(request) => {
                let id = self.resolver.resolve(Some(die.id()))?;
                let category = Category::from_tag(die.tag());
                if category.is_some_and(|category| request.applies_to(category)) {
                    self.resolver.apply_hint_to(id, request);
                }
                self.resolver.queue_define(id);
            }
        }
        Ok(())
    }

    /// Resolve every symbol pattern to exactly one exported name, then to
    /// the DIE with that linker name.
    fn select_symbol_patterns(&mut self, forest: &DieForest) -> Result<()>
    {
        for pattern in &self.options.symbol_patterns {
            let symbol = find_unique(&pattern.pattern, forest.images().iter().map(|image| &image.symbols))?;
            let wanted = match pattern.kind {
                SymbolKind::Function => Tag::Subprogram,
                SymbolKind::Variable => Tag::Variable,
            };
            let die = (0..forest.len()).map(|index| forest.die(DieId(index))).find(|die| {
                die.tag() == wanted
                    && die.linker_name() == Some(symbol.as_str())
                    && (wanted == Tag::Variable || !die.attrs().declaration)
            });

            let Some(die) = die else {
                self.resolver.report_missing(Subject::Symbol, symbol);
                continue;
            };
            debug!("Pattern {} selected {}", pattern.pattern, die.fullname());
            let table = match pattern.kind {
                SymbolKind::Function => &mut self.found.functions,
                SymbolKind::Variable => &mut self.found.variables,
            };
            let slot = table.entry(die.fullname()).or_insert(None);
            if slot.is_none() {
                *slot = Some(die.id());
            }
        }
        Ok(())
    }
}
