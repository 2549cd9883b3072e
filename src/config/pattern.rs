//! Brace-expansion grammar for configuration keys.
//!
//! ```text
//! pattern ::= [preamble] [ "{" list "}" ] [postscript]
//! preamble ::= word (no "{", "}", ",")
//! list ::= pattern ("," pattern)*
//! postscript ::= pattern
//! ```
//!
//! Expansion is the cartesian concatenation of alternatives, left-to-right,
//! order preserved. Expanded strings are matched against metric names with
//! shell globs (`*`, `?`, `[...]`).

use crate::core::{HandyError, Result};
use glob::Pattern;

const LIST_START: u8 = b'{';
const LIST_END: u8 = b'}';
const LIST_DELIM: u8 = b',';

/// Expand a brace pattern into its full list of alternatives.
///
/// Unbalanced braces and stray `,`/`}` fail with the offending position.
pub fn expand_pattern(pattern: &str) -> Result<Vec<String>> {
    let mut pos = 0;
    let expansion = expand(pattern, &mut pos, false)?;
    if pos == pattern.len() {
        Ok(expansion)
    } else {
        Err(HandyError::pattern(
            pos,
            format!("parsing stopped early in pattern '{pattern}'"),
        ))
    }
}

fn expand(pattern: &str, pos: &mut usize, nested: bool) -> Result<Vec<String>> {
    let bytes = pattern.as_bytes();

    let mut preamble_end = *pos;
    while preamble_end < bytes.len() {
        let byte = bytes[preamble_end];
        if byte == LIST_START || byte == LIST_END || byte == LIST_DELIM {
            break;
        }
        preamble_end += 1;
    }
    let preamble = &pattern[*pos..preamble_end];

    match bytes.get(preamble_end) {
        Some(&LIST_START) => {},
        Some(&(LIST_END | LIST_DELIM)) if !nested => {
            return Err(HandyError::pattern(
                preamble_end,
                format!("stray symbol in pattern '{pattern}'"),
            ));
        },
        // end of input, or a delimiter closing the enclosing list
        _ => {
            *pos = preamble_end;
            return Ok(vec![preamble.to_string()]);
        },
    }

    let mut list_expansion = Vec::new();
    let mut list_end = preamble_end + 1;
    loop {
        list_expansion.extend(expand(pattern, &mut list_end, true)?);
        match bytes.get(list_end) {
            Some(&LIST_DELIM) => list_end += 1,
            Some(&LIST_END) => break,
            _ => {
                return Err(HandyError::pattern(
                    list_end,
                    format!("unbalanced brace in pattern '{pattern}'"),
                ));
            },
        }
    }

    let mut postscript_start = list_end + 1;
    let postscript_expansion = expand(pattern, &mut postscript_start, nested)?;

    let mut expansion = Vec::with_capacity(list_expansion.len() * postscript_expansion.len());
    for list_item in &list_expansion {
        for postscript in &postscript_expansion {
            expansion.push(format!("{preamble}{list_item}{postscript}"));
        }
    }
    *pos = postscript_start;
    Ok(expansion)
}

/// Compile an expansion into glob matchers.
pub fn compile_globs(expansion: &[String]) -> Result<Vec<Pattern>> {
    expansion
        .iter()
        .map(|alternative| {
            Pattern::new(alternative)
                .map_err(|e| HandyError::config(format!("bad glob '{alternative}': {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_word() {
        assert_eq!(expand_pattern("requests").unwrap(), vec!["requests"]);
        assert_eq!(expand_pattern("").unwrap(), vec![""]);
    }

    #[test]
    fn test_single_list() {
        assert_eq!(
            expand_pattern("req.{a,b}").unwrap(),
            vec!["req.a", "req.b"]
        );
    }

    #[test]
    fn test_postscript_concatenation() {
        assert_eq!(
            expand_pattern("req.{a,b}.time").unwrap(),
            vec!["req.a.time", "req.b.time"]
        );
    }

    #[test]
    fn test_nested_lists() {
        assert_eq!(
            expand_pattern("a{b,c{d,e}}f").unwrap(),
            vec!["abf", "acdf", "acef"]
        );
    }

    #[test]
    fn test_cartesian_order_is_left_to_right() {
        assert_eq!(
            expand_pattern("{a,b}.{x,y}").unwrap(),
            vec!["a.x", "a.y", "b.x", "b.y"]
        );
    }

    #[test]
    fn test_empty_alternative() {
        assert_eq!(expand_pattern("a{,b}").unwrap(), vec!["a", "ab"]);
    }

    #[test]
    fn test_expansion_is_deterministic() {
        let first = expand_pattern("svc.{get,put}.{ok,err}").unwrap();
        let second = expand_pattern("svc.{get,put}.{ok,err}").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec!["svc.get.ok", "svc.get.err", "svc.put.ok", "svc.put.err"]);
    }

    #[test]
    fn test_unbalanced_open_brace() {
        let err = expand_pattern("req.{a,b").unwrap_err();
        assert!(matches!(err, HandyError::Pattern { .. }));
    }

    #[test]
    fn test_stray_close_brace() {
        assert!(expand_pattern("req.a}").is_err());
        assert!(expand_pattern("req.a,b").is_err());
    }

    #[test]
    fn test_glob_compile_and_match() {
        let expansion = expand_pattern("req.{a,b}.*").unwrap();
        let globs = compile_globs(&expansion).unwrap();
        assert!(globs.iter().any(|g| g.matches("req.a.time")));
        assert!(globs.iter().any(|g| g.matches("req.b.count")));
        assert!(!globs.iter().any(|g| g.matches("req.c.time")));
    }
}
