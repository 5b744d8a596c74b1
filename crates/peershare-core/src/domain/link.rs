//! Share links: `https://example.app/?join=<code>`.

use thiserror::Error;

/// Errors from [`parse_join_target`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinTargetError {
    /// The input was empty or only whitespace.
    #[error("no session code or link was given")]
    Empty,

    /// The input contained `join=` with nothing after it.
    #[error("share link does not contain a session code")]
    MissingCode,
}

/// Extracts the session code from a bare code or a share link.
///
/// Accepts `?join=<code>` and `&join=<code>` anywhere in the input; anything
/// after the next `&` is ignored.  Input without `join=` is taken as the code.
pub fn parse_join_target(input: &str) -> Result<String, JoinTargetError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(JoinTargetError::Empty);
    }

    let code = match input.split_once("?join=").or_else(|| input.split_once("join=")) {
        Some((_, rest)) => rest.split('&').next().unwrap_or_default().trim(),
        None => input,
    };

    if code.is_empty() {
        return Err(JoinTargetError::MissingCode);
    }
    Ok(code.to_string())
}

/// Builds the share link for `code` under `base_url`.
pub fn share_link(base_url: &str, code: &str) -> String {
    let base = base_url.trim_end_matches(['?', '&']);
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}join={code}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
