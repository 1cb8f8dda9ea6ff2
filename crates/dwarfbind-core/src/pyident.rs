//! Conversion of debug-info names into Python identifiers.

/// Python's hard keywords. Soft keywords (`match`, `case`, `type`, `_`) are
/// valid identifiers and are not listed.
const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda", "nonlocal", "not", "or",
    "pass", "raise", "return", "try", "while", "with", "yield",
];

pub fn is_python_keyword(name: &str) -> bool
{
    PYTHON_KEYWORDS.contains(&name)
}

fn escape(c: char) -> Option<&'static str>
{
    Some(match c {
        ':' => "_cn",
        '<' => "_lt",
        '>' => "_gt",
        '(' => "_lp",
        ')' => "_rp",
        '-' => "_dash",
        '=' => "_eq",
        '*' => "_ptr",
        ' ' => "_sp",
        ',' => "_comma",
        '&' => "_amp",
        '[' => "_lbrack",
        ']' => "_rbrack",
        '\'' => "_quot",
        _ => return None,
    })
}

/// Turn a C/C++ name such as `ns::Foo<int>` into a usable Python identifier.
///
/// Each punctuation character is replaced by a mnemonic (`::` becomes
/// `_cn_cn`). A run of escapes is separated from the following ordinary
/// character by `_`, and a trailing `_` is added to Python keywords.
///
/// ```rust
/// use dwarfbind_core::pyident::as_python_id;
///
/// assert_eq!(as_python_id("ns::Foo"), "ns_cn_cn_Foo");
/// assert_eq!(as_python_id("pass"), "pass_");
/// ```
pub fn as_python_id(name: &str) -> String
{
    let mut out = String::with_capacity(name.len());
    let mut prev_escaped = false;
    for c in name.chars() {
        if let Some(replacement) = escape(c) {
            out.push_str(replacement);
            prev_escaped = true;
        } else {
            if prev_escaped {
                out.push('_');
            }
            out.push(c);
            prev_escaped = false;
        }
    }
    if is_python_keyword(&out) {
        out.push('_');
    }
    out
}
