//! # Type Resolution
//!
//! The [`TypeResolver`] is the session object of one generation run. It owns
//! every piece of mutable state: the descriptor arena, the identity index,
//! pending hints, the define queue and the diagnostics sink.
//!
//! ## Identity
//!
//! Each DIE resolves to the descriptor of its `(Category, QualifiedName)`
//! key, so the copies of a type that every translation unit carries collapse
//! into one descriptor. A placeholder is registered before any referenced
//! type is resolved, which is what lets `struct Node { struct Node *next; }`
//! terminate.
//!
//! ## Ordering
//!
//! `declare_type` and `define_type` append [`Emission`]s in the order the
//! generated module must contain them. Value dependencies are defined before
//! the type that contains them; pointer dependencies are only declared.

use std::collections::{BTreeSet, HashMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::diagnostics::{Diagnostic, Diagnostics, Subject};
use crate::die::{DieForest, DieId, DieRef, QualifiedName, Tag};
use crate::error::{BindError, Result};
use crate::layout::{lay_out, MemberSlot, RecordLayout, RecordShape};
use crate::manifest::ModuleManifest;
use crate::pyident::as_python_id;
use crate::request::TypeRequest;
use crate::types::primitive::{self, PrimitiveInfo};
use crate::types::{
    Category, Emission, EnumInfo, ExternalInfo, FunctionSig, Member, Qualifier, RecordInfo, TypeDescriptor, TypeId,
    TypeKey, TypeKind, TypeState,
};

pub struct TypeResolver<'f>
{
    forest: &'f DieForest,
    manifests: &'f [ModuleManifest],
    types: Vec<TypeDescriptor>,
    by_key: HashMap<TypeKey, TypeId>,
    /// Every resolved identity, grouped by qualified name
    by_name: IndexMap<QualifiedName, Vec<TypeId>>,
    void: TypeId,
    diagnostics: Diagnostics,
    pending_hints: IndexMap<TypeId, TypeRequest>,
    applied_hints: HashSet<TypeId>,
    hinted: IndexMap<TypeId, TypeRequest>,
    hint_rounds: usize,
    emissions: Vec<Emission>,
    defined_names: BTreeSet<String>,
    define_queue: IndexSet<TypeId>,
    ever_queued: HashSet<TypeId>,
    defining: HashSet<TypeId>,
    deep_inspect: bool,
    nameless_enums: bool,
}

impl<'f> TypeResolver<'f>
{
    pub fn new(forest: &'f DieForest, manifests: &'f [ModuleManifest]) -> Self
    {
        let void = TypeDescriptor {
            key: TypeKey::void(),
            die: None,
            definition: None,
            state: TypeState::Defined,
            kind: TypeKind::Void,
            define_failed: false,
        };
        let mut by_key = HashMap::new();
        by_key.insert(TypeKey::void(), TypeId(0));

        Self {
            forest,
            manifests,
            types: vec![void],
            by_key,
            by_name: IndexMap::new(),
            void: TypeId(0),
            diagnostics: Diagnostics::new(),
            pending_hints: IndexMap::new(),
            applied_hints: HashSet::new(),
            hinted: IndexMap::new(),
            hint_rounds: 0,
            emissions: Vec::new(),
            defined_names: BTreeSet::new(),
            define_queue: IndexSet::new(),
            ever_queued: HashSet::new(),
            defining: HashSet::new(),
            deep_inspect: false,
            nameless_enums: false,
        }
    }

    /// Queue pointed-to types for definition when their pointers are defined.
    pub fn deep_inspect(mut self, enabled: bool) -> Self
    {
        self.deep_inspect = enabled;
        self
    }

    /// Default for whether enumerators are emitted at module level.
    pub fn nameless_enums(mut self, enabled: bool) -> Self
    {
        self.nameless_enums = enabled;
        self
    }

    pub fn forest(&self) -> &'f DieForest
    {
        self.forest
    }

    pub fn void(&self) -> TypeId
    {
        self.void
    }

    pub fn descriptor(&self, id: TypeId) -> &TypeDescriptor
    {
        &self.types[id.0]
    }

    pub fn descriptors(&self) -> impl Iterator<Item = (TypeId, &TypeDescriptor)>
    {
        self.types.iter().enumerate().map(|(index, desc)| (TypeId(index), desc))
    }

    /// Every descriptor resolved under `name`, one per category.
    pub fn types_named(&self, name: &QualifiedName) -> &[TypeId]
    {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// Resolved identities grouped by qualified name, in resolution order.
    pub fn identities(&self) -> impl Iterator<Item = (&QualifiedName, &[TypeId])>
    {
        self.by_name.iter().map(|(name, ids)| (name, ids.as_slice()))
    }

    pub fn lookup(&self, key: &TypeKey) -> Option<TypeId>
    {
        self.by_key.get(key).copied()
    }

    pub fn emissions(&self) -> &[Emission]
    {
        &self.emissions
    }

    pub fn hint_rounds(&self) -> usize
    {
        self.hint_rounds
    }

    pub fn diagnostics(&self) -> &Diagnostics
    {
        &self.diagnostics
    }

    pub fn report(&mut self, diagnostic: Diagnostic)
    {
        self.diagnostics.push(diagnostic);
    }

    pub fn into_diagnostics(self) -> Diagnostics
    {
        self.diagnostics
    }

    /// Python names bound at module level so far.
    pub fn defined_names(&self) -> &BTreeSet<String>
    {
        &self.defined_names
    }

    pub fn add_defined_name(&mut self, name: impl Into<String>)
    {
        self.defined_names.insert(name.into());
    }

    pub fn record_layout(&self, id: TypeId) -> Option<&RecordLayout>
    {
        self.types[id.0].record().and_then(|record| record.layout.as_ref())
    }

    // Resolution

    /// The descriptor for the type `die` describes; `None` is void.
    ///
    /// ## Errors
    ///
    /// `UnrepresentableType` for DIE tags that do not describe a type and for
    /// base types with no ctypes equivalent.
    pub fn resolve(&mut self, die: Option<DieId>) -> Result<TypeId>
    {
        let Some(id) = die else {
            return Ok(self.void);
        };
        let forest = self.forest;
        let entry = forest.die(id);
        let category = Category::from_tag(entry.tag()).ok_or_else(|| BindError::UnrepresentableType {
            name: entry.fullname().to_string(),
            reason: format!("DIE at {:#x} with tag {:?} is not a type", entry.offset(), entry.tag()),
        })?;
        let key = TypeKey::new(category, entry.fullname());
        if let Some(&existing) = self.by_key.get(&key) {
            return Ok(existing);
        }

        // Anonymous names are only unique within one image.
        if entry.name().is_some() {
            if let Some(external) = self.lookup_external(&key) {
                debug!("{key} comes from {}", external.module);
                return Ok(self.register(key, id, TypeState::Unresolved, TypeKind::External(external)));
            }
        }

        let placeholder = self.register(key, id, TypeState::Unresolved, TypeKind::Void);
        let kind = self.build_kind(entry, category)?;
        self.types[placeholder.0].kind = kind;
        Ok(placeholder)
    }

    fn register(&mut self, key: TypeKey, die: DieId, state: TypeState, kind: TypeKind) -> TypeId
    {
        let id = TypeId(self.types.len());
        self.by_key.insert(key.clone(), id);
        self.by_name.entry(key.name.clone()).or_default().push(id);
        self.types.push(TypeDescriptor {
            key,
            die: Some(die),
            definition: None,
            state,
            kind,
            define_failed: false,
        });
        id
    }

    fn lookup_external(&self, key: &TypeKey) -> Option<ExternalInfo>
    {
        self.manifests.iter().find_map(|manifest| {
            manifest.lookup(key).map(|entry| ExternalInfo {
                module: manifest.module.clone(),
                python_name: entry.python_name.clone(),
                size: entry.size,
                align: entry.align,
                has_pointers: entry.has_pointers,
            })
        })
    }

    fn build_kind(&mut self, entry: DieRef<'f>, category: Category) -> Result<TypeKind>
    {
        let attrs = entry.attrs();
        let kind = match category {
            Category::Void => TypeKind::Void,
            Category::Base => {
                let info = PrimitiveInfo {
                    name: entry.name().unwrap_or_default().to_string(),
                    encoding: attrs.encoding,
                    byte_size: attrs.byte_size,
                };
                let (ctype, align) = primitive::lookup(&info, self.forest.pointer_size())?;
                TypeKind::Primitive { info, ctype, align }
            }
            Category::Pointer => {
                let target = match attrs.type_ref {
                    Some(target) => Some(self.resolve(Some(target))?),
                    None => None,
                };
                TypeKind::Pointer {
                    target,
                    byte_size: attrs.byte_size.unwrap_or(self.forest.pointer_size()),
                }
            }
            Category::Array => TypeKind::Array {
                element: self.resolve(attrs.type_ref)?,
                dims: entry.array_dimensions(),
            },
            Category::Typedef => TypeKind::Typedef {
                target: self.resolve_optional(attrs.type_ref)?,
            },
            Category::Const | Category::Volatile | Category::Restrict => {
                let qualifier = match category {
                    Category::Const => Qualifier::Const,
                    Category::Volatile => Qualifier::Volatile,
                    _ => Qualifier::Restrict,
                };
                TypeKind::Qualified {
                    qualifier,
                    target: self.resolve_optional(attrs.type_ref)?,
                }
            }
            Category::Enum => TypeKind::Enum(EnumInfo {
                nameless: self.nameless_enums,
                enumerators: Vec::new(),
                underlying: self.resolve_optional(attrs.type_ref)?,
            }),
            Category::Struct | Category::Class => TypeKind::Record(RecordInfo::new(false)),
            Category::Union => TypeKind::Record(RecordInfo::new(true)),
            Category::Subroutine => TypeKind::Function(self.signature(entry)?),
            Category::Subprogram => TypeKind::FunctionDef(self.signature(entry)?),
        };
        Ok(kind)
    }

    fn resolve_optional(&mut self, die: Option<DieId>) -> Result<Option<TypeId>>
    {
        die.map(|die| self.resolve(Some(die))).transpose()
    }

    fn signature(&mut self, entry: DieRef<'f>) -> Result<FunctionSig>
    {
        let ret = self.resolve_optional(entry.declared_type())?;

        // Out-of-line definitions may leave the parameters on the declaration.
        let mut source = entry;
        let has_params = |die: &DieRef<'_>| die.children().any(|child| child.tag() == Tag::FormalParameter);
        if !has_params(&entry) {
            if let Some(spec) = entry.attrs().specification {
                source = self.forest.die(spec);
            }
        }

        let mut params = Vec::new();
        for param in source.children().filter(|child| child.tag() == Tag::FormalParameter) {
            params.push(self.resolve(param.declared_type())?);
        }
        Ok(FunctionSig { ret, params })
    }

    /// Defining DIE of `id`, looked up once.
    ///
    /// A declaration with no definition in any image is used as is, with an
    /// `IncompleteType` diagnostic.
    pub fn definition(&mut self, id: TypeId) -> Option<DieId>
    {
        let desc = &self.types[id.0];
        if desc.definition.is_some() {
            return desc.definition;
        }
        let die = desc.die?;
        let definition = if !self.forest.die(die).attrs().declaration {
            die
        } else if let Some(found) = self.forest.find_definition(die) {
            found
        } else {
            let name = self.name(id);
            self.diagnostics.push(Diagnostic::IncompleteType {
                name,
                detail: "no definition in any image, falling back to the declaration".to_string(),
            });
            die
        };
        self.types[id.0].definition = Some(definition);
        Some(definition)
    }

    // Naming

    /// Debug-info name with the tag prefix, as used in comments.
    pub fn name(&self, id: TypeId) -> String
    {
        let desc = &self.types[id.0];
        match &desc.kind {
            TypeKind::Primitive { ctype, .. } => ctype.clone(),
            _ => desc.key.flat_name(true),
        }
    }

    /// Name of the python object that stands for this type.
    pub fn py_name(&self, id: TypeId) -> String
    {
        let desc = &self.types[id.0];
        match &desc.kind {
            TypeKind::External(external) => format!("{}.{}", external.module, external.python_name),
            TypeKind::Primitive { ctype, .. } => ctype.clone(),
            _ => as_python_id(&desc.key.flat_name(true)),
        }
    }

    /// `py_name` without the `struct_`/`union_`/`enum_` prefix.
    pub fn untagged_py_name(&self, id: TypeId) -> String
    {
        as_python_id(&self.types[id.0].key.flat_name(false))
    }

    /// `# DIE ...` when the python name differs from the debug-info name.
    pub fn die_comment(&self, id: TypeId) -> Option<String>
    {
        let name = self.name(id);
        (self.py_name(id) != name).then(|| format!("# DIE {name}"))
    }

    /// Whether `target` is void once typedefs and qualifiers are stripped.
    pub fn is_void(&self, target: Option<TypeId>) -> bool
    {
        self.strip(target).is_none()
    }

    /// Follow typedefs and qualifiers down to the underlying type.
    pub fn strip(&self, mut target: Option<TypeId>) -> Option<TypeId>
    {
        while let Some(id) = target {
            match &self.types[id.0].kind {
                TypeKind::Void => return None,
                TypeKind::Typedef { target: next } | TypeKind::Qualified { target: next, .. } => target = *next,
                _ => return Some(id),
            }
        }
        None
    }

    /// The ctypes spelling that refers to this type.
    pub fn ctype(&self, id: TypeId) -> String
    {
        let desc = &self.types[id.0];
        match &desc.kind {
            TypeKind::Void => "None".to_string(),
            TypeKind::Primitive { ctype, .. } => ctype.clone(),
            TypeKind::Pointer { target, .. } => self.pointer_ctype(*target),
            TypeKind::Array { element, dims } => {
                let mut text = self.ctype(*element);
                if dims.is_empty() {
                    text.push_str(" * 0");
                }
                for dim in dims.iter().rev() {
                    text = format!("{text} * {dim}");
                }
                text
            }
            TypeKind::Typedef { target } => {
                if self.is_void(*target) {
                    "None".to_string()
                } else {
                    self.py_name(id)
                }
            }
            TypeKind::Qualified { qualifier, target } => {
                let inner = match target {
                    Some(target) if !self.is_void(Some(*target)) => self.ctype(*target),
                    _ => "c_void_p".to_string(),
                };
                format!("{}( {inner} )", qualifier.wrapper())
            }
            TypeKind::Enum(_) | TypeKind::Record(_) | TypeKind::External(_) => self.py_name(id),
            TypeKind::Function(sig) | TypeKind::FunctionDef(sig) => self.function_ctype(sig),
        }
    }

    fn pointer_ctype(&self, target: Option<TypeId>) -> String
    {
        let Some(target) = target else {
            return "c_void_p".to_string();
        };
        match self.strip(Some(target)) {
            None => return "c_void_p".to_string(),
            // ctypes function types are already pointers.
            Some(stripped) if matches!(self.types[stripped.0].kind, TypeKind::Function(_)) => {
                return self.ctype(target);
            }
            _ => {}
        }
        let inner = self.ctype(target);
        if inner == "c_char" || inner == "CONST( c_char )" {
            return "c_char_p".to_string();
        }
        format!("POINTER( {inner} )")
    }

    fn function_ctype(&self, sig: &FunctionSig) -> String
    {
        let mut text = String::from("CFUNCTYPE( ");
        text.push_str(&sig.ret.map_or_else(|| "None".to_string(), |ret| self.ctype(ret)));
        for param in &sig.params {
            text.push_str(&format!(", {}\n      ", self.ctype(*param)));
        }
        text.push(')');
        text
    }

    pub fn signature_of(&self, id: TypeId) -> Option<&FunctionSig>
    {
        match &self.types[id.0].kind {
            TypeKind::Function(sig) | TypeKind::FunctionDef(sig) => Some(sig),
            _ => None,
        }
    }

    // Size and alignment

    /// Size in bytes as the compiler recorded it.
    pub fn size_of(&self, id: TypeId) -> u64
    {
        let desc = &self.types[id.0];
        match &desc.kind {
            TypeKind::Void | TypeKind::Function(_) | TypeKind::FunctionDef(_) => 0,
            TypeKind::External(external) => external.size,
            TypeKind::Pointer { byte_size, .. } => *byte_size,
            TypeKind::Primitive { info, ctype, .. } => info.byte_size.unwrap_or_else(|| {
                primitive::ctype_layout(ctype, self.forest.pointer_size()).map_or(0, |(size, _)| size)
            }),
            TypeKind::Array { element, dims } => dims.iter().product::<u64>() * self.size_of(*element),
            TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } => {
                target.map_or(0, |target| self.size_of(target))
            }
            TypeKind::Enum(_) | TypeKind::Record(_) => desc
                .definition
                .or(desc.die)
                .and_then(|die| self.forest.die(die).attrs().byte_size)
                .unwrap_or(0),
        }
    }

    /// Natural alignment. Records report their computed alignment, 1 until
    /// they are laid out.
    pub fn alignment_of(&self, id: TypeId) -> u64
    {
        let desc = &self.types[id.0];
        match &desc.kind {
            TypeKind::Void | TypeKind::Function(_) | TypeKind::FunctionDef(_) => 1,
            TypeKind::Primitive { align, .. } => *align,
            TypeKind::Pointer { byte_size, .. } => *byte_size,
            TypeKind::External(external) => external.align,
            TypeKind::Record(record) => record.layout.as_ref().map_or(1, |layout| layout.alignment),
            TypeKind::Array { element, .. } => self.alignment_of(*element),
            TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } => {
                target.map_or(1, |target| self.alignment_of(target))
            }
            TypeKind::Enum(info) => match info.underlying {
                Some(underlying) => self.alignment_of(underlying),
                None => self.size_of(id).clamp(1, 8),
            },
        }
    }

    // Declaration and definition

    fn raise_state(&mut self, id: TypeId, state: TypeState)
    {
        let desc = &mut self.types[id.0];
        if state > desc.state {
            desc.state = state;
        }
    }

    /// Make `id` referable by name. Idempotent.
    pub fn declare_type(&mut self, id: TypeId) -> Result<()>
    {
        let desc = &self.types[id.0];
        if desc.state >= TypeState::Declared || desc.is_external() {
            return Ok(());
        }

        match desc.kind.clone() {
            TypeKind::Record(_) => {
                self.raise_state(id, TypeState::Declared);
                self.emissions.push(Emission::Declare(id));
            }
            TypeKind::Typedef { target } => {
                self.raise_state(id, TypeState::Declared);
                if let Some(target) = target {
                    self.declare_type(target)?;
                }
                self.emissions.push(Emission::Declare(id));
            }
            TypeKind::Pointer { target, .. } | TypeKind::Qualified { target, .. } => {
                self.raise_state(id, TypeState::Declared);
                if let Some(target) = target {
                    self.declare_type(target)?;
                }
            }
            _ => {
                self.define_type(id)?;
                self.raise_state(id, TypeState::Declared);
            }
        }
        Ok(())
    }

    /// Emit everything needed to instantiate `id`. Idempotent.
    ///
    /// Returns whether the type ended up defined. A record whose only DIE is
    /// a declaration cannot be.
    pub fn define_type(&mut self, id: TypeId) -> Result<bool>
    {
        let desc = &self.types[id.0];
        if desc.is_defined() || desc.is_external() {
            return Ok(true);
        }
        if desc.define_failed || self.defining.contains(&id) {
            return Ok(false);
        }

        if let TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } = desc.kind {
            if self.is_void(target) {
                let name = self.name(id);
                self.diagnostics.push(Diagnostic::Skipped {
                    subject: name,
                    reason: "type is void, no definition to output".to_string(),
                });
                return Ok(true);
            }
        }

        self.defining.insert(id);
        let defined = self.define_kind(id);
        self.defining.remove(&id);

        if defined? {
            self.raise_state(id, TypeState::Defined);
            let name = self.py_name(id);
            self.defined_names.insert(name);
            Ok(true)
        } else {
            self.types[id.0].define_failed = true;
            Ok(false)
        }
    }

    fn define_kind(&mut self, id: TypeId) -> Result<bool>
    {
        match self.types[id.0].kind.clone() {
            TypeKind::Void | TypeKind::Primitive { .. } | TypeKind::External(_) => Ok(true),
            TypeKind::Pointer { target, .. } => {
                let Some(target) = target else {
                    return Ok(true);
                };
                if self.is_void(Some(target)) {
                    return Ok(true);
                }
                self.declare_type(target)?;
                if self.deep_inspect {
                    let declared_only = self
                        .definition(target)
                        .is_some_and(|die| self.forest.die(die).attrs().declaration);
                    if !declared_only {
                        self.queue_define(target);
                    }
                }
                Ok(true)
            }
            TypeKind::Array { element, .. } => self.define_type(element),
            TypeKind::Typedef { target } => {
                let Some(target) = target else {
                    return Ok(true);
                };
                // The base may use this typedef in its own definition.
                self.declare_type(target)?;
                self.declare_type(id)?;
                self.define_type(target)
            }
            TypeKind::Qualified { target, .. } => match target {
                Some(target) => self.define_type(target),
                None => Ok(true),
            },
            TypeKind::Function(sig) | TypeKind::FunctionDef(sig) => {
                if let Some(ret) = sig.ret {
                    self.define_type(ret)?;
                }
                for param in sig.params {
                    self.define_type(param)?;
                }
                Ok(true)
            }
            TypeKind::Enum(_) => self.define_enum(id),
            TypeKind::Record(_) => self.define_record(id),
        }
    }

    fn define_enum(&mut self, id: TypeId) -> Result<bool>
    {
        let underlying = match &self.types[id.0].kind {
            TypeKind::Enum(info) => info.underlying,
            _ => None,
        };
        if let Some(underlying) = underlying {
            self.define_type(underlying)?;
        }

        let Some(definition) = self.definition(id) else {
            return Ok(false);
        };
        let enumerators: Vec<(String, i64)> = self
            .forest
            .die(definition)
            .children()
            .filter(|child| child.tag() == Tag::Enumerator)
            .map(|child| (child.name().unwrap_or_default().to_string(), child.attrs().const_value.unwrap_or(0)))
            .collect();

        let mut nameless = false;
        if let TypeKind::Enum(info) = &mut self.types[id.0].kind {
            info.enumerators = enumerators;
            nameless = info.nameless;
        }
        if nameless {
            let names: Vec<String> = match &self.types[id.0].kind {
                TypeKind::Enum(info) => info.enumerators.iter().map(|(name, _)| as_python_id(name)).collect(),
                _ => Vec::new(),
            };
            self.defined_names.extend(names);
        }
        self.emissions.push(Emission::Define(id));
        Ok(true)
    }

    fn define_record(&mut self, id: TypeId) -> Result<bool>
    {
        let Some(definition) = self.definition(id) else {
            return Ok(false);
        };
        if self.forest.die(definition).attrs().declaration {
            return Ok(false);
        }
        self.find_members(id)?;
        self.declare_type(id)?;

        let members = match &self.types[id.0].kind {
            TypeKind::Record(record) => record.members.clone(),
            _ => Vec::new(),
        };
        for member in &members {
            self.define_type(member.ty)?;
        }

        let layout = self.lay_out_record(id, definition, &members)?;
        if let Some(record) = self.types[id.0].record_mut() {
            record.layout = Some(layout);
        }
        self.emissions.push(Emission::Define(id));
        Ok(true)
    }

    fn lay_out_record(&mut self, id: TypeId, definition: DieId, members: &[Member]) -> Result<RecordLayout>
    {
        let forest = self.forest;
        let py_name = self.py_name(id);
        let (is_union, super_count, pack_requested) = match &self.types[id.0].kind {
            TypeKind::Record(record) => (record.union, record.super_count, record.pack_requested),
            _ => (false, 0, false),
        };

        let mut slots = Vec::with_capacity(members.len());
        let mut anonymous = Vec::new();
        for member in members {
            let die = forest.die(member.die);
            let attrs = die.attrs();
            let empty_base = member.inheritance && self.is_empty_base(member.ty)?;
            let member_type = &self.types[member.ty.0];
            slots.push(MemberSlot {
                name: member.name.clone(),
                py_name: as_python_id(&member.name),
                ty: member.ty,
                ctype: member.ctype_override.clone().unwrap_or_else(|| self.ctype(member.ty)),
                type_name: self.name(member.ty),
                defined: member_type.is_defined() || member_type.is_external(),
                align: self.alignment_of(member.ty),
                storage_bytes: attrs.byte_size.unwrap_or_else(|| self.size_of(member.ty)),
                member_location: attrs.member_location,
                bit_size: attrs.bit_size,
                bit_offset: attrs.bit_size.and_then(|_| die.bit_position()),
                overridden: member.ctype_override.is_some(),
                empty_base,
            });
            if member.anonymous {
                anonymous.push(as_python_id(&member.name));
            }
        }
        anonymous.sort();

        let shape = RecordShape {
            name: &py_name,
            is_union,
            byte_size: forest.die(definition).attrs().byte_size,
            super_count,
            pack_requested,
        };
        let (layout, diagnostics) = lay_out(&shape, &slots, anonymous);
        self.diagnostics.extend(diagnostics);
        debug!(
            "Laid out {py_name}: {} fields, alignment {}, packed {}",
            layout.fields.len(),
            layout.alignment,
            layout.packed
        );
        Ok(layout)
    }

    /// A base with no data of its own, transitively.
    fn is_empty_base(&mut self, id: TypeId) -> Result<bool>
    {
        match self.types[id.0].kind.clone() {
            TypeKind::External(_) => Ok(false),
            TypeKind::Typedef { target: Some(target) } => self.is_empty_base(target),
            TypeKind::Record(_) => {
                self.find_members(id)?;
                let members = self.types[id.0].record().map(|record| record.members.clone()).unwrap_or_default();
                for member in members {
                    if !member.inheritance || !self.is_empty_base(member.ty)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Collect the data members of a record from its definition.
    pub fn find_members(&mut self, id: TypeId) -> Result<()>
    {
        match self.types[id.0].record() {
            Some(record) if !record.members_found => {}
            _ => return Ok(()),
        }
        let forest = self.forest;
        let definition = self.definition(id);

        let mut members = Vec::new();
        let mut super_count = 0;
        let mut anon_count = 0;
        if let Some(definition) = definition {
            for child in forest.die(definition).children() {
                let attrs = child.attrs();
                if attrs.external {
                    continue;
                }
                match child.tag() {
                    Tag::Inheritance => {
                        members.push(Member {
                            name: format!("__super__{super_count}"),
                            die: child.id(),
                            ty: self.resolve(attrs.type_ref)?,
                            inheritance: true,
                            anonymous: false,
                            ctype_override: None,
                            allow_unaligned: false,
                        });
                        super_count += 1;
                    }
                    Tag::Member => {
                        let (name, anonymous) = match child.name() {
                            Some(name) => (name.to_string(), false),
                            None => {
                                anon_count += 1;
                                (format!("__anon__member__{anon_count}"), true)
                            }
                        };
                        members.push(Member {
                            name,
                            die: child.id(),
                            ty: self.resolve(attrs.type_ref)?,
                            inheritance: false,
                            anonymous,
                            ctype_override: None,
                            allow_unaligned: false,
                        });
                    }
                    Tag::Structure
                    | Tag::Class
                    | Tag::Union
                    | Tag::Typedef
                    | Tag::Enumeration
                    | Tag::Subprogram
                    | Tag::TemplateTypeParam
                    | Tag::TemplateValueParam
                    | Tag::Const
                    | Tag::ImportedDeclaration
                    | Tag::GNU_TEMPLATE_PARAMETER_PACK => {}
                    other => debug!("Ignoring {other:?} inside {}", self.name(id)),
                }
            }
        }

        if let Some(record) = self.types[id.0].record_mut() {
            record.members = members;
            record.super_count = super_count;
            record.members_found = true;
        }
        Ok(())
    }

    /// Define `id` later, when the define queue is drained.
    pub fn queue_define(&mut self, id: TypeId)
    {
        if self.ever_queued.insert(id) {
            self.define_queue.insert(id);
        }
    }

    /// Define queued types until no more are added.
    pub fn drain_define_queue(&mut self) -> Result<()>
    {
        loop {
            let batch: Vec<TypeId> = self.define_queue.drain(..).collect();
            if batch.is_empty() {
                return Ok(());
            }
            for id in batch {
                self.define_type(id)?;
            }
        }
    }

    // Hints

    /// Record that `request` applies to `id`, to be applied in the next round.
    ///
    /// A type whose hints were already applied is never queued again.
    pub fn apply_hint_to(&mut self, id: TypeId, request: TypeRequest)
    {
        self.hinted.insert(id, request.clone());
        if self.applied_hints.contains(&id) {
            debug!("{} already hinted, ignoring request {}", self.name(id), request.name);
            return;
        }
        self.pending_hints.insert(id, request);
    }

    /// Apply pending hints in rounds until a round queues nothing new.
    /// Returns the number of rounds this call ran.
    pub fn apply_hints(&mut self) -> Result<usize>
    {
        let mut rounds = 0;
        while !self.pending_hints.is_empty() {
            rounds += 1;
            let batch = std::mem::take(&mut self.pending_hints);
            for (id, request) in batch {
                self.applied_hints.insert(id);
                self.apply_request(id, &request)?;
            }
        }
        self.hint_rounds += rounds;
        if rounds > 0 {
            info!("Applied type hints in {rounds} rounds");
        }
        Ok(rounds)
    }

    fn apply_request(&mut self, id: TypeId, request: &TypeRequest) -> Result<()>
    {
        match self.types[id.0].kind.clone() {
            TypeKind::Record(_) => self.apply_record_request(id, request),
            TypeKind::Enum(_) => {
                if let (Some(nameless), TypeKind::Enum(info)) = (request.nameless_enum, &mut self.types[id.0].kind) {
                    info.nameless = nameless;
                }
                Ok(())
            }
            TypeKind::Typedef { target: Some(target) } => self.apply_request(target, request),
            _ => Ok(()),
        }
    }

    fn apply_record_request(&mut self, id: TypeId, request: &TypeRequest) -> Result<()>
    {
        self.find_members(id)?;
        let type_name = self.name(id);
        let mut members = match self.types[id.0].record_mut() {
            Some(record) => {
                record.pack_requested = request.pack;
                if let Some(base) = &request.base {
                    record.base = base.clone();
                }
                if let Some(mixins) = &request.mixins {
                    record.mixins = mixins.clone();
                }
                record.unaligned_ptrs = request.unaligned_ptrs;
                std::mem::take(&mut record.members)
            }
            None => return Ok(()),
        };

        for (field, hint) in &request.fields {
            let Some(member) = members.iter_mut().find(|member| &member.name == field) else {
                self.diagnostics.push(Diagnostic::Skipped {
                    subject: format!("hint for field {field} of {type_name}"),
                    reason: "no such member".to_string(),
                });
                continue;
            };

            if let Some(nested) = &hint.nested {
                let mut nested = nested.clone().into_request();
                nested.c_name = Some(self.types[member.ty.0].key.name.to_string());
                self.apply_hint_to(member.ty, nested);
            }
            if let Some(name) = &hint.rename {
                member.name = name.clone();
            }
            if let Some(ctype) = &hint.ctype {
                member.ctype_override = Some(ctype.clone());
            }
            member.allow_unaligned = hint.allow_unaligned;
        }

        if let Some(record) = self.types[id.0].record_mut() {
            record.members = members;
        }
        Ok(())
    }

    /// Every hinted type with its request, ordered by qualified name.
    pub fn hinted_types(&self) -> Vec<(TypeId, &TypeRequest)>
    {
        let mut hinted: Vec<(TypeId, &TypeRequest)> = self.hinted.iter().map(|(id, request)| (*id, request)).collect();
        hinted.sort_by(|(a, _), (b, _)| self.types[a.0].key.cmp(&self.types[b.0].key));
        hinted
    }

    /// Requested names that matched nothing get a `MissingDefinition`.
    pub fn report_missing(&mut self, subject: Subject, name: impl Into<String>)
    {
        self.diagnostics.push(Diagnostic::MissingDefinition {
            subject,
            name: name.into(),
        });
    }
}
