//! `{VAR}` token expansion
//!
//! Tokens are substituted from the recipe environment merged with
//! caller overrides. Unresolved tokens stay literal; callers report
//! them as warnings.

use std::collections::BTreeMap;

/// Expand `{VAR}` tokens in `input`
///
/// Returns the expanded string plus the names of tokens that had no
/// binding and were left literal.
#[must_use]
pub fn expand_tokens(input: &str, env: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(input.len());
    let mut unresolved = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        match tail.find('}') {
            Some(close) if is_var_name(&tail[..close]) => {
                let name = &tail[..close];
                if let Some(value) = env.get(name) {
                    out.push_str(value);
                } else {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                    if !unresolved.iter().any(|u| u == name) {
                        unresolved.push(name.to_string());
                    }
                }
                rest = &tail[close + 1..];
            }
            _ => {
                // not a token, keep the brace literal
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);

    (out, unresolved)
}

fn is_var_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Expand every string in a command list, accumulating unresolved names
#[must_use]
pub fn expand_all(
    commands: &[String],
    env: &BTreeMap<String, String>,
) -> (Vec<String>, Vec<String>) {
    let mut out = Vec::with_capacity(commands.len());
    let mut unresolved = Vec::new();
    for command in commands {
        let (expanded, mut missing) = expand_tokens(command, env);
        out.push(expanded);
        missing.retain(|m| !unresolved.contains(m));
        unresolved.append(&mut missing);
    }
    (out, unresolved)
}
