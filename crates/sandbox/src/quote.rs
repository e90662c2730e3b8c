//! Shell quoting for path interpolation
//!
//! Single quoting helper used everywhere a path or argument is spliced
//! into an `sh -c` string, so chroot invocations cannot be injected.

/// Quote one word for POSIX `sh`
#[must_use]
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | '+' | ',' | '@' | '%')
        })
    {
        return s.to_string();
    }
    // wrap in single quotes; embedded single quotes become '"'"'
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\"'\"'");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Join pre-tokenized argv into one safely quoted command line
#[must_use]
pub fn join_quoted(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}
