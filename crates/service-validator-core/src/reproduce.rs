//! Reproduction commands for failing cases

use crate::http::Request;

/// Headers the client adds on its own; leaving them out keeps the command short.
const IMPLICIT_HEADERS: &[&str] = &["host", "content-length", "accept-encoding", "connection"];

/// Render a sent request as a `curl` command line.
///
/// Uses the headers and body actually sent, so augmented cases reproduce
/// with their injected header values.
#[must_use]
pub fn to_curl(request: &Request) -> String {
    let mut parts = vec!["curl".to_string(), "-X".to_string(), request.method.clone()];

    for (name, value) in request.headers.iter() {
        if IMPLICIT_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        parts.push("-H".to_string());
        parts.push(shell_quote(&format!("{name}: {value}")));
    }

    if let Some(body) = &request.body {
        parts.push("-d".to_string());
        parts.push(shell_quote(body));
    }

    parts.push(shell_quote(&request.url));
    parts.join(" ")
}

/// Single-quote `value` for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}
