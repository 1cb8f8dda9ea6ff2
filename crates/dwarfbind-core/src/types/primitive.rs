//! Mapping of C base types onto `ctypes` primitives.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{BindError, Result};

/// `DW_ATE_complex_float`
const ENCODING_COMPLEX_FLOAT: u8 = 0x03;

/// ctypes name plus alignment on 32-bit and 64-bit targets. `None` means the
/// type does not exist on that word size.
#[derive(Debug, Clone, Copy)]
struct Primitive
{
    ctype: &'static str,
    align32: Option<u64>,
    align64: Option<u64>,
}

const fn prim(ctype: &'static str, align32: Option<u64>, align64: Option<u64>) -> Primitive
{
    Primitive { ctype, align32, align64 }
}

static PRIMITIVES: Lazy<HashMap<&'static str, Primitive>> = Lazy::new(|| {
    HashMap::from([
        ("long long unsigned int", prim("c_ulonglong", Some(4), Some(8))),
        ("unsigned long long", prim("c_ulonglong", Some(4), Some(8))),
        ("long long int", prim("c_longlong", Some(4), Some(8))),
        ("long long", prim("c_longlong", Some(4), Some(8))),
        ("long unsigned int", prim("c_ulong", Some(4), Some(8))),
        ("unsigned long", prim("c_ulong", Some(4), Some(8))),
        ("sizetype", prim("c_ulong", Some(4), Some(8))),
        ("__ARRAY_SIZE_TYPE__", prim("c_ulong", Some(4), Some(8))),
        ("short unsigned int", prim("c_ushort", Some(2), Some(2))),
        ("unsigned short", prim("c_ushort", Some(2), Some(2))),
        ("unsigned int", prim("c_uint", Some(4), Some(4))),
        ("unsigned char", prim("c_ubyte", Some(1), Some(1))),
        ("char16_t", prim("c_short", Some(2), Some(2))),
        ("signed char", prim("c_byte", Some(1), Some(1))),
        ("char", prim("c_char", Some(1), Some(1))),
        ("long int", prim("c_long", Some(4), Some(8))),
        ("long", prim("c_long", Some(4), Some(8))),
        ("int", prim("c_int", Some(4), Some(4))),
        ("short int", prim("c_short", Some(2), Some(2))),
        ("short", prim("c_short", Some(2), Some(2))),
        ("float", prim("c_float", Some(4), Some(4))),
        ("_Bool", prim("c_bool", Some(1), Some(1))),
        ("bool", prim("c_bool", Some(1), Some(1))),
        ("double", prim("c_double", Some(4), Some(8))),
        ("long double", prim("c_longdouble", Some(4), Some(16))),
        ("_Float128", prim("c_longdouble", Some(16), Some(16))),
        ("__float128", prim("c_longdouble", Some(16), Some(16))),
        ("__int128", prim("(c_longlong * 2)", None, Some(16))),
        ("__int128 unsigned", prim("(c_ulonglong * 2)", None, Some(16))),
        ("wchar_t", prim("c_wchar", Some(4), Some(4))),
        ("char32_t", prim("c_int", Some(4), Some(4))),
    ])
});

/// What the debug info says about a base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveInfo
{
    pub name: String,
    pub encoding: Option<u8>,
    pub byte_size: Option<u64>,
}

/// ctypes spelling and alignment of a base type on a target with
/// `pointer_size`-byte pointers.
///
/// ## Errors
///
/// `UnrepresentableType` when the name is unknown and the encoding is not a
/// complex float, or when the type does not exist on this word size.
pub fn lookup(info: &PrimitiveInfo, pointer_size: u64) -> Result<(String, u64)>
{
    if let Some(primitive) = PRIMITIVES.get(info.name.as_str()) {
        let align = if pointer_size == 4 {
            primitive.align32
        } else {
            primitive.align64
        };
        return match align {
            Some(align) => Ok((primitive.ctype.to_string(), align)),
            None => Err(BindError::UnrepresentableType {
                name: info.name.clone(),
                reason: format!("not available with {pointer_size}-byte pointers"),
            }),
        };
    }

    if info.encoding == Some(ENCODING_COMPLEX_FLOAT) {
        let size = info.byte_size.unwrap_or(8);
        let ctype = match size {
            32 => "(c_longdouble * 2 )",
            16 => "(c_double * 2 )",
            _ => "(c_float * 2 )",
        };
        return Ok((ctype.to_string(), (size / 2).max(1)));
    }

    Err(BindError::UnrepresentableType {
        name: info.name.clone(),
        reason: "no ctypes primitive for this base type".to_string(),
    })
}

static ARRAY_SPELLING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(?\s*(\w+)\s*((?:\*\s*\d+\s*)+)\)?$").expect("array spelling regex is valid"));

/// Size and alignment of a literal ctypes spelling such as `c_uint`,
/// `c_char * 4` or `POINTER( struct_Foo )`, when it can be worked out
/// without the surrounding module.
pub fn ctype_layout(spelling: &str, pointer_size: u64) -> Option<(u64, u64)>
{
    let spelling = spelling.trim();
    if spelling.starts_with("POINTER(") || spelling.starts_with("CFUNCTYPE(") {
        return Some((pointer_size, pointer_size));
    }
    if let Some(layout) = scalar_layout(spelling, pointer_size) {
        return Some(layout);
    }
    let captures = ARRAY_SPELLING.captures(spelling)?;
    let (size, align) = scalar_layout(captures.get(1)?.as_str(), pointer_size)?;
    let count = captures
        .get(2)?
        .as_str()
        .split('*')
        .filter_map(|dim| dim.trim().parse::<u64>().ok())
        .product::<u64>();
    Some((size * count, align))
}

fn scalar_layout(name: &str, pointer_size: u64) -> Option<(u64, u64)>
{
    let long = if pointer_size == 4 { 4 } else { 8 };
    let layout = match name {
        "c_char" | "c_byte" | "c_ubyte" | "c_bool" | "c_int8" | "c_uint8" => (1, 1),
        "c_short" | "c_ushort" | "c_int16" | "c_uint16" => (2, 2),
        "c_int" | "c_uint" | "c_float" | "c_wchar" | "c_int32" | "c_uint32" => (4, 4),
        "c_long" | "c_ulong" | "c_size_t" | "c_ssize_t" => (long, long),
        "c_longlong" | "c_ulonglong" | "c_int64" | "c_uint64" | "c_double" => (8, long),
        "c_longdouble" => {
            if pointer_size == 4 {
                (12, 4)
            } else {
                (16, 16)
            }
        }
        "c_void_p" | "c_char_p" | "c_wchar_p" => (pointer_size, pointer_size),
        _ => return None,
    };
    Some(layout)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn base(name: &str, encoding: u8, size: u64) -> PrimitiveInfo
    {
        PrimitiveInfo {
            name: name.to_string(),
            encoding: Some(encoding),
            byte_size: Some(size),
        }
    }

    #[test]
    fn test_alignment_depends_on_word_size()
    {
        let double = base("double", 0x04, 8);
        assert_eq!(lookup(&double, 8).unwrap(), ("c_double".to_string(), 8));
        assert_eq!(lookup(&double, 4).unwrap(), ("c_double".to_string(), 4));
    }

    #[test]
    fn test_int128_needs_64_bit()
    {
        let wide = base("__int128", 0x05, 16);
        assert_eq!(lookup(&wide, 8).unwrap().0, "(c_longlong * 2)");
        assert!(matches!(lookup(&wide, 4), Err(BindError::UnrepresentableType { .. })));
    }

    #[test]
    fn test_complex_float_by_size()
    {
        assert_eq!(lookup(&base("complex double", 0x03, 16), 8).unwrap(), ("(c_double * 2 )".to_string(), 8));
        assert_eq!(lookup(&base("complex float", 0x03, 8), 8).unwrap().0, "(c_float * 2 )");
        assert!(lookup(&base("_Decimal32", 0x0f, 4), 8).is_err());
    }

    #[test]
    fn test_literal_layouts()
    {
        assert_eq!(ctype_layout("c_uint", 8), Some((4, 4)));
        assert_eq!(ctype_layout("c_char * 12", 8), Some((12, 1)));
        assert_eq!(ctype_layout("c_uint * 2 * 3", 8), Some((24, 4)));
        assert_eq!(ctype_layout("POINTER( struct_Node )", 4), Some((4, 4)));
        assert_eq!(ctype_layout("struct_Unknown", 8), None);
    }
}
