//! # Macro Expressions
//!
//! Turns the body of a C preprocessor macro into python source when it is a
//! single self-contained expression.
//!
//! The body is parsed with the `pest` grammar in `expression.pest`, which is
//! python's expression grammar with C-flavoured literals allowed. Brace
//! initialisers, statements and C-only operators (`->`, `&&`, `?:`) do not
//! parse. The parse tree is then walked to rewrite literals: integer suffixes
//! are dropped (`10UL` becomes `10`), C octal gains the python prefix (`0755`
//! becomes `0o755`) and one-character literals become their code point
//! (`'A'` becomes `65`).

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use tracing::trace;

#[derive(Parser)]
#[grammar = "expression.pest"]
struct MacroExpressionParser;

/// A macro body rewritten as python.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanExpression
{
    pub text: String,
    /// Every identifier the expression uses, in order of appearance
    pub identifiers: Vec<String>,
}

/// Rewrite `input` as a python expression, or `None` when it is not one.
pub fn clean(input: &str) -> Option<CleanExpression>
{
    let body = match MacroExpressionParser::parse(Rule::body, input) {
        Ok(mut pairs) => pairs.next()?,
        Err(err) => {
            trace!("Not a python expression: {input}: {err}");
            return None;
        }
    };

    let mut text = String::with_capacity(input.len());
    let mut identifiers = Vec::new();
    let mut copied = 0;

    for pair in body.into_inner().flatten() {
        let replacement = match pair.as_rule() {
            Rule::number => Some(number_text(pair.clone())?),
            Rule::char_literal => Some(char_code(pair.as_str())),
            Rule::name => {
                identifiers.push(pair.as_str().to_string());
                None
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            let span = pair.as_span();
            text.push_str(&input[copied..span.start()]);
            text.push_str(&replacement);
            copied = span.end();
        }
    }
    text.push_str(&input[copied..]);

    Some(CleanExpression {
        text: text.trim().to_string(),
        identifiers,
    })
}

/// The literal without its C suffix, with octal converted.
fn number_text(number: Pair<'_, Rule>) -> Option<String>
{
    let literal = number
        .into_inner()
        .find(|part| matches!(part.as_rule(), Rule::radix | Rule::decimal))?;
    convert_octal(literal.as_str())
}

fn char_code(literal: &str) -> String
{
    literal.chars().nth(1).map_or(0, u32::from).to_string()
}

/// `0123` is octal in C and a syntax error in python.
fn convert_octal(number: &str) -> Option<String>
{
    let bytes = number.as_bytes();
    if bytes.len() < 2 || bytes[0] != b'0' || !bytes.iter().all(u8::is_ascii_digit) {
        return Some(number.to_string());
    }
    if !bytes.iter().all(|digit| (b'0'..=b'7').contains(digit)) {
        return None;
    }
    Some(format!("0o{}", &number[1..]))
}
