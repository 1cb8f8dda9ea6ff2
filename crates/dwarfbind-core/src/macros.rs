//! # Macro Translation
//!
//! Best-effort translation of object-like and function-like `#define`s from
//! C headers into python. A macro survives only if its body cleans into a
//! single expression and every identifier in it is already bound in the
//! generated module, or is one of the macro's own arguments.
//!
//! Each survivor is wrapped in `try`/`except` in the output: `(T) -1` reads
//! as arithmetic when `T` is an integer type alias and fails at import when
//! `T` is a class.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::Result;
use crate::expression::clean;
use crate::manifest::ModuleManifest;

/// Text of one header to scan for macros.
#[derive(Debug, Clone)]
pub struct MacroSource
{
    /// Label used in `# file:line` comments
    pub file: String,
    pub text: String,
}

impl MacroSource
{
    pub fn new(file: impl Into<String>, text: impl Into<String>) -> Self
    {
        Self {
            file: file.into(),
            text: text.into(),
        }
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        Ok(Self::new(path.display().to_string(), text))
    }
}

/// One `#define` as found in a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroDefinition
{
    pub name: String,
    /// Argument names of a function-like macro
    pub args: Option<Vec<String>>,
    pub body: String,
    pub file: String,
    pub line: usize,
}

/// A macro that made it into the generated module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedMacro
{
    pub name: String,
    pub args: Option<Vec<String>>,
    /// Python expression
    pub value: String,
    pub file: String,
    pub line: usize,
}

impl TranslatedMacro
{
    /// The guarded python definition.
    pub fn render(&self) -> String
    {
        let binding = match &self.args {
            Some(args) => format!("   def {}({}): return {}", self.name, args.join(", "), self.value),
            None => format!("   {} = {}", self.name, self.value),
        };
        format!(
            "try:\n{binding} # {}:{}\nexcept:\n   __ctypegen_failed_macros.append('{}')\n",
            self.file, self.line, self.name
        )
    }
}

/// Every `#define` in `source`, in order.
///
/// Continuation lines are joined and comments removed first; the line
/// number is that of the `#` that starts the directive.
pub fn parse_defines(source: &MacroSource) -> Vec<MacroDefinition>
{
    let text = strip_comments(&source.text);
    let mut defines = Vec::new();
    let mut lines = text.lines().enumerate();

    while let Some((index, line)) = lines.next() {
        let mut logical = line.to_string();
        while logical.ends_with('\\') {
            logical.pop();
            match lines.next() {
                Some((_, next)) => logical.push_str(next),
                None => break,
            }
        }

        let Some(directive) = logical.trim_start().strip_prefix('#') else {
            continue;
        };
        let Some(rest) = directive.trim_start().strip_prefix("define") else {
            continue;
        };
        if !rest.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        if let Some(define) = split_define(rest.trim(), &source.file, index + 1) {
            defines.push(define);
        }
    }
    defines
}

/// Split `NAME body` or `NAME(args) body`. A parenthesis only starts an
/// argument list when it comes before the first space.
fn split_define(data: &str, file: &str, line: usize) -> Option<MacroDefinition>
{
    let first_space = data.find(char::is_whitespace);
    let open = data.find('(');

    let (name, args, body) = match open {
        Some(open) if first_space.map_or(true, |space| open < space) => {
            let close = open + data[open..].find(')')?;
            let args = data[open + 1..close]
                .split(',')
                .map(str::trim)
                .filter(|arg| !arg.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            if !args.iter().all(|arg| is_identifier(arg)) {
                debug!("Skipping macro with unusable arguments: {data}");
                return None;
            }
            (&data[..open], Some(args), &data[close + 1..])
        }
        _ => match first_space {
            Some(space) => (&data[..space], None, &data[space + 1..]),
            None => (data, None, ""),
        },
    };

    if !is_identifier(name) {
        return None;
    }
    Some(MacroDefinition {
        name: name.to_string(),
        args,
        body: body.trim().to_string(),
        file: file.to_string(),
        line,
    })
}

fn is_identifier(text: &str) -> bool
{
    let mut chars = text.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Remove `/* */` and `//` comments, keeping line structure and literals.
fn strip_comments(text: &str) -> String
{
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == c || inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                while chars.peek().is_some_and(|&next| next != '\n') {
                    chars.next();
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push(' ');
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Translate every usable macro of `sources`, in source order.
///
/// `defined` holds the names the module already binds; each translated
/// macro is added to it so later macros can refer to earlier ones.
pub fn translate(
    sources: &[MacroSource],
    defined: &mut BTreeSet<String>,
    manifests: &[ModuleManifest],
) -> Vec<TranslatedMacro>
{
    let mut translated = Vec::new();

    for source in sources {
        for define in parse_defines(source) {
            if let Some(found) = translate_one(define, defined, manifests) {
                defined.insert(found.name.clone());
                translated.push(found);
            }
        }
    }

    info!("Translated {} macros", translated.len());
    translated
}

fn translate_one(
    define: MacroDefinition,
    defined: &BTreeSet<String>,
    manifests: &[ModuleManifest],
) -> Option<TranslatedMacro>
{
    if defined.contains(&define.name) || manifests.iter().any(|manifest| manifest.defines_name(&define.name)) {
        return None;
    }

    let value = if define.body.is_empty() {
        "None".to_string()
    } else {
        let expression = clean(&define.body)?;
        if expression.text == define.name {
            return None;
        }
        let is_arg = |name: &String| define.args.as_ref().is_some_and(|args| args.contains(name));
        if let Some(unknown) = expression
            .identifiers
            .iter()
            .find(|name| !defined.contains(*name) && !is_arg(name))
        {
            debug!("Skipping macro {}: {unknown} is not defined", define.name);
            return None;
        }
        expression.text
    };

    Some(TranslatedMacro {
        name: define.name,
        args: define.args,
        value,
        file: define.file,
        line: define.line,
    })
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_defines()
    {
        let source = MacroSource::new(
            "flags.h",
            "/* header */\n#define A 1 // one\n#  define  B(x, y) ((x) + \\\n    (y))\n#define EMPTY\n#ifdef A\n",
        );
        let defines = parse_defines(&source);
        assert_eq!(defines.len(), 3);

        assert_eq!(defines[0].name, "A");
        assert_eq!(defines[0].body, "1");
        assert_eq!(defines[0].line, 2);

        assert_eq!(defines[1].name, "B");
        assert_eq!(defines[1].args, Some(vec!["x".to_string(), "y".to_string()]));
        assert_eq!(defines[1].body, "((x) +     (y))");
        assert_eq!(defines[1].line, 3);

        assert_eq!(defines[2].name, "EMPTY");
        assert_eq!(defines[2].body, "");
    }

    #[test]
    fn test_object_like_is_not_function_like()
    {
        let source = MacroSource::new("m.h", "#define NEG (-1)\n");
        let defines = parse_defines(&source);
        assert_eq!(defines[0].args, None);
        assert_eq!(defines[0].body, "(-1)");
    }

    #[test]
    fn test_render()
    {
        let constant = TranslatedMacro {
            name: "MAX".to_string(),
            args: None,
            value: "16".to_string(),
            file: "limits.h".to_string(),
            line: 4,
        };
        assert_eq!(
            constant.render(),
            "try:\n   MAX = 16 # limits.h:4\nexcept:\n   __ctypegen_failed_macros.append('MAX')\n"
        );

        let function = TranslatedMacro {
            args: Some(vec!["a".to_string(), "b".to_string()]),
            value: "a * b".to_string(),
            name: "MUL".to_string(),
            ..constant
        };
        assert!(function.render().contains("   def MUL(a, b): return a * b # limits.h:4\n"));
    }
}
