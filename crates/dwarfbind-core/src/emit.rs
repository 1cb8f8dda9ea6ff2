//! # Python Emitter
//!
//! Renders a resolver session as a python module. The layout of the module:
//!
//! ```text
//! header + prelude        self-contained CONST/VOLATILE/RESTRICT and checks
//! imports                 one per existing module
//! declarations and        in resolver emission order
//! definitions
//! aliases                 hint names and tagless names
//! Globals                 typed views of global variables
//! decorateFunctions       restype/argtypes for every exported alias
//! functionTypes           CFUNCTYPE prototypes by function name
//! macros                  each in try/except
//! CTYPEGEN_SONAMES, decoratedLib, CTYPEGEN_producers__
//! __main__                runs the layout checks
//! trailer
//! ```

use std::collections::BTreeSet;

use crate::generate::{FunctionBinding, GlobalBinding};
use crate::layout::{FieldRole, OffsetCheck, RecordLayout};
use crate::macros::TranslatedMacro;
use crate::resolver::TypeResolver;
use crate::types::{Emission, TypeId, TypeKind};

/// Python run at import: identity wrappers for qualifiers and the checks
/// the module runs on itself when executed directly.
const PRELUDE: &str = r#"# pylint: disable=wildcard-import,unnecessary-pass,protected-access
import ctypes
from ctypes import *

class TestableCtypeClass:
   pass

def CONST( t ):
   return t

def VOLATILE( t ):
   return t

def RESTRICT( t ):
   return t

__ctypegen_errors = []
__ctypegen_has_pointers = {}

def __ctypegen_pointers( t ):
   if t in __ctypegen_has_pointers:
      return __ctypegen_has_pointers[ t ]
   rv = False
   if isinstance( t, ctypes._Pointer.__class__ ) or t == ctypes.c_void_p:
      rv = True
   elif hasattr( t, "_fields_" ):
      rv = any( __ctypegen_pointers( info[ 1 ] ) for info in t._fields_ )
   __ctypegen_has_pointers[ t ] = rv
   return rv

def __ctypegen_check( cls ):
   if hasattr( cls, "_fields_" ) and hasattr( cls, "_ctypegen_offsets" ):
      for field, offset in zip( cls._fields_, cls._ctypegen_offsets ):
         actual = getattr( cls, field[ 0 ] ).offset
         if offset is not None and offset != -1 and actual != offset:
            __ctypegen_errors.append( "field %s of %s has offset %d in ctypes, %d in DWARF" %
                                      ( field[ 0 ], cls.__name__, actual, offset ) )
   if hasattr( cls, "_ctypegen_have_definition" ):
      size = ctypes.sizeof( cls )
      native = cls._ctypegen_native_size
      if size != native and not ( size == 0 and native == 1 ):
         __ctypegen_errors.append( "type %s has mismatched size. %d in ctypes, %d in DWARF" %
                                   ( cls.__name__, size, native ) )
   allowed = getattr( cls, "allow_unaligned", [] )
   if allowed is True or not hasattr( cls, "_fields_" ):
      return
   for info in cls._fields_:
      alignment = ctypes.alignment( info[ 1 ] )
      offset = getattr( cls, info[ 0 ] ).offset
      if alignment == 0 or offset % alignment == 0 or not __ctypegen_pointers( info[ 1 ] ):
         continue
      if info[ 0 ] not in allowed:
         __ctypegen_errors.append( "unaligned ptr field %s in %s: offset=%d [%d]" %
                                   ( info[ 0 ], cls.__name__, offset, offset % alignment ) )

def test_classes( failed_macros=None ):
   for cls in TestableCtypeClass.__subclasses__():
      __ctypegen_check( cls )
   if __ctypegen_errors:
      print( "Discrepancies between ctypes data and DWARF:\n\t" + "\n\t".join( __ctypegen_errors ) )
   if failed_macros:
      print( "unusable macros for this module: %s" % ",".join( failed_macros ) )

"#;

const DECORATED_LIB: &str = "
# Use this to return a CDLL handle that has functions decorate with type info.
def decoratedLib( idx = 0 ):
      lib = ctypes.CDLL( CTYPEGEN_SONAMES[ idx ] )
      if lib:
         decorateFunctions( lib )
      return lib

";

/// A module-level `name = target` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias
{
    pub name: String,
    pub target: String,
    pub comment: &'static str,
}

/// Everything besides the resolver's types that goes into a module.
#[derive(Debug, Default)]
pub struct ModuleParts<'a>
{
    pub header: Option<&'a str>,
    /// Python modules holding reused types
    pub imports: Vec<&'a str>,
    pub aliases: &'a [Alias],
    pub globals: &'a [GlobalBinding],
    pub functions: &'a [FunctionBinding],
    pub macros: &'a [TranslatedMacro],
    pub sonames: Vec<&'a str>,
    pub producers: Option<&'a BTreeSet<String>>,
    pub trailer: Option<&'a str>,
}

fn pad(indent: usize) -> String
{
    " ".repeat(indent)
}

/// Render the complete module.
pub fn render_module(resolver: &TypeResolver<'_>, parts: &ModuleParts<'_>) -> String
{
    let mut out = String::from("# DON'T EDIT THIS FILE. It was generated by dwarfbind.\n#\n");
    if let Some(header) = parts.header {
        out.push_str(header);
    }
    out.push_str(PRELUDE);
    out.push('\n');
    for module in &parts.imports {
        out.push_str(&format!("import {module}\n"));
    }
    out.push('\n');

    render_types(resolver, &mut out);
    for alias in parts.aliases {
        out.push_str(&format!("{} = {} # {}\n", alias.name, alias.target, alias.comment));
    }
    render_globals(parts.globals, &mut out);
    render_functions(parts.functions, &mut out);
    render_macros(parts.macros, &mut out);

    out.push_str("CTYPEGEN_SONAMES = [\n");
    for soname in &parts.sonames {
        out.push_str(&format!("\t'{soname}',\n"));
    }
    out.push_str("]\n");
    out.push_str(DECORATED_LIB);

    out.push_str("CTYPEGEN_producers__ = {\n");
    for producer in parts.producers.into_iter().flatten() {
        out.push_str(&format!("\t\"{}\",\n", producer.replace('\\', "\\\\").replace('"', "\\\"")));
    }
    out.push_str("}\n");

    out.push_str("\nif __name__ == \"__main__\":\n   test_classes( __ctypegen_failed_macros )\n");
    if let Some(trailer) = parts.trailer {
        out.push_str(trailer);
    }
    out
}

/// Every declaration and definition, in emission order.
pub fn render_types(resolver: &TypeResolver<'_>, out: &mut String)
{
    for emission in resolver.emissions() {
        match *emission {
            Emission::Declare(id) => declare(resolver, id, out),
            Emission::Define(id) => define(resolver, id, out),
        }
    }
}

fn declare(resolver: &TypeResolver<'_>, id: TypeId, out: &mut String)
{
    let desc = resolver.descriptor(id);
    match &desc.kind {
        TypeKind::Record(record) => {
            out.push_str(&format!("\nclass {}( {}, TestableCtypeClass", resolver.py_name(id), record.base));
            for mixin in &record.mixins {
                out.push_str(&format!(", {mixin}"));
            }
            out.push_str(" ):\n");
            if let Some(comment) = resolver.die_comment(id) {
                out.push_str(&format!("   {comment}\n"));
            }
            out.push_str("   pass\n\n");
        }
        TypeKind::Typedef { target } => {
            let name = resolver.py_name(id);
            let ctype = target.map_or_else(|| "None".to_string(), |target| resolver.ctype(target));
            if name == ctype {
                return;
            }
            let sep = if name.len() + ctype.len() > 80 { " \\\n   " } else { " " };
            let comment = resolver.die_comment(id).map(|comment| format!(" {comment}")).unwrap_or_default();
            out.push_str(&format!("{name} ={sep}{ctype}{comment} # typedef\n"));
        }
        _ => {}
    }
}

fn define(resolver: &TypeResolver<'_>, id: TypeId, out: &mut String)
{
    match &resolver.descriptor(id).kind {
        TypeKind::Enum(_) => define_enum(resolver, id, out),
        TypeKind::Record(record) => {
            let Some(layout) = record.layout.as_ref() else {
                return;
            };
            define_record(resolver, id, layout, out);
            let name = resolver.py_name(id);
            if !record.union {
                render_offsets(&name, layout, out);
            } else if layout.transparent_union {
                out.push_str(&format!("{name}._fields_ = [('__broken_transparent_union', c_void_p)]\n"));
            }
        }
        _ => {}
    }
}

fn define_record(resolver: &TypeResolver<'_>, id: TypeId, layout: &RecordLayout, out: &mut String)
{
    let name = resolver.py_name(id);
    let Some(record) = resolver.descriptor(id).record() else {
        return;
    };

    out.push('\n');
    out.push_str(&format!("{name}._ctypegen_native_size = {}\n", resolver.size_of(id)));
    out.push_str(&format!("{name}._ctypegen_have_definition = True\n"));

    if record.unaligned_ptrs {
        out.push_str(&format!("{name}.allow_unaligned = True\n"));
    } else {
        let allowed: Vec<String> = record
            .members
            .iter()
            .filter(|member| member.allow_unaligned)
            .map(|member| format!("'{}'", crate::pyident::as_python_id(&member.name)))
            .collect();
        if !allowed.is_empty() {
            out.push_str(&format!("{name}.allow_unaligned = [{}]\n", allowed.join(", ")));
        }
    }

    if layout.has_members {
        out.push_str(&format!("{name}._fields_pre = [ # pylint: disable=protected-access\n"));
        for field in &layout.fields {
            match (field.role, field.bits) {
                (FieldRole::TrailingPad, _) => {
                    out.push_str(&format!("   ( \"{}\", ({})),\n", field.name, field.ctype));
                }
                (_, Some(bits)) => {
                    out.push_str(&format!("   ( \"{}\", {}, {bits} ),\n", field.name, field.ctype));
                }
                (_, None) => out.push_str(&format!("   ( \"{}\", {} ),\n", field.name, field.ctype)),
            }
        }
        out.push_str("]\n");

        if layout.packed {
            let reason = layout.pack_reason.as_deref().unwrap_or_default();
            out.push_str(&format!("{name}._pack_ = 1 # {reason}\n"));
        }
        if !layout.anonymous.is_empty() {
            out.push_str(&format!("{name}._anonymous_ = (\n"));
            for anonymous in &layout.anonymous {
                out.push_str(&format!("   \"{anonymous}\",\n"));
            }
            out.push_str("   )\n");
        }
        out.push_str(&format!("{name}._fields_ = {name}._fields_pre\n"));
    }
    out.push('\n');
}

/// `_ctypegen_offsets`, ten entries per line.
fn render_offsets(name: &str, layout: &RecordLayout, out: &mut String)
{
    out.push_str(&format!("{name}._ctypegen_offsets = [ "));
    let mut sep = "";
    for (count, (_, check)) in layout.checked_fields().enumerate() {
        let entry = match check {
            OffsetCheck::Expected(offset) => offset.to_string(),
            OffsetCheck::Unchecked => "None".to_string(),
            OffsetCheck::Padding => "-1".to_string(),
        };
        out.push_str(sep);
        out.push_str(&entry);
        sep = if (count + 1) % 10 != 0 { ", " } else { ",\n    " };
    }
    out.push_str(" ]\n\n");
}

fn define_enum(resolver: &TypeResolver<'_>, id: TypeId, out: &mut String)
{
    let TypeKind::Enum(info) = &resolver.descriptor(id).kind else {
        return;
    };
    let name = resolver.py_name(id);
    let int_type = info
        .underlying
        .map_or_else(|| "c_uint".to_string(), |underlying| resolver.py_name(underlying));
    let comment = resolver.die_comment(id);

    out.push_str(&format!("class {name}( {int_type} ):\n"));
    out.push_str("   _ctypegen_have_definition = True\n");
    let indent = if info.nameless {
        out.push_str(&format!("# Values of {name} (nameless enum)\n"));
        ""
    } else {
        "   "
    };

    for (enumerator, value) in &info.enumerators {
        if let Some(comment) = &comment {
            out.push_str(&format!("{indent}{comment}\n"));
        }
        let hex = if *value < 0 {
            format!("-{:#x}", value.unsigned_abs())
        } else {
            format!("{value:#x}")
        };
        out.push_str(&format!(
            "{indent}{} = {int_type}({value}).value # {hex}\n",
            crate::pyident::as_python_id(enumerator)
        ));
    }
    if info.enumerators.is_empty() {
        out.push_str(&format!("{indent}pass\n"));
    }
    out.push_str("\n\n");
}

/// `Hint = ctype` for every hinted type whose requested name is not its
/// ctype, then `Foo = struct_Foo` for tagged types with no namesake.
pub fn aliases(resolver: &TypeResolver<'_>) -> Vec<Alias>
{
    let mut aliases = Vec::new();
    let mut taken = BTreeSet::new();
    for (id, request) in resolver.hinted_types() {
        let target = resolver.ctype(id);
        let name = request.python_name();
        if name != target && taken.insert(name.clone()) {
            aliases.push(Alias {
                name,
                target,
                comment: "python hint differs from ctype",
            });
        }
    }

    for (_, ids) in resolver.identities() {
        let [id] = ids else {
            continue;
        };
        let desc = resolver.descriptor(*id);
        let named = desc.die.is_some_and(|die| resolver.forest().die(die).name().is_some());
        if !named || desc.is_external() || !desc.is_defined() || !desc.key.category.is_tagged() {
            continue;
        }
        let name = resolver.untagged_py_name(*id);
        if !taken.insert(name.clone()) {
            continue;
        }
        aliases.push(Alias {
            name,
            target: resolver.py_name(*id),
            comment: "unambiguous name for tagged type",
        });
    }
    aliases
}

fn render_globals(globals: &[GlobalBinding], out: &mut String)
{
    out.push_str("class Globals(object):\n");
    out.push_str(&format!("{}def __init__(self, dll):\n", pad(3)));
    for global in globals {
        out.push_str(&format!(
            "{}self.{} = ( {} ).in_dll( dll, '{}' )\n",
            pad(6),
            global.name,
            global.ctype,
            global.symbol
        ));
    }
    out.push_str(&format!("{}pass", pad(6)));
}

fn render_functions(functions: &[FunctionBinding], out: &mut String)
{
    out.push_str("\ndef decorateFunctions( lib ):\n");
    for function in functions {
        render_lib_updates(function, 3, out);
    }
    out.push_str("   pass\n");

    if !functions.is_empty() {
        out.push_str("\nfunctionTypes = {\n");
        let mut seen = BTreeSet::new();
        for function in functions {
            if seen.insert(function.name.as_str()) {
                out.push_str(&format!("   '{}': {},\n", function.name, function.prototype));
            }
        }
        out.push('}');
    }
    out.push_str("\n\n");
}

/// Assign the signature to every linker name at the function's address.
fn render_lib_updates(function: &FunctionBinding, indent: usize, out: &mut String)
{
    for symbol in &function.linker_names {
        out.push_str(&format!("{}if hasattr(lib, '{symbol}'):\n", pad(indent)));
        let inner = indent + 3;
        out.push_str(&format!("{}lib.{symbol}.restype = {}\n", pad(inner), function.restype));
        out.push_str(&format!("{}lib.{symbol}.argtypes = ", pad(inner)));
        if function.argtypes.is_empty() {
            out.push_str("[]\n\n");
            continue;
        }
        let mut sep = "[";
        for arg in &function.argtypes {
            out.push_str(&format!("{sep}\n{}{arg}", pad(inner + 3)));
            sep = ",";
        }
        out.push_str(" ]\n\n");
    }
}

fn render_macros(macros: &[TranslatedMacro], out: &mut String)
{
    out.push_str("__ctypegen_failed_macros = []\n");
    out.push_str("# Macro definitions:\n");
    for translated in macros {
        out.push_str(&translated.render());
    }
    out.push_str("# (end Macro definitions)\n\n");
}
