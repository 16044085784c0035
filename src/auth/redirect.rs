//! Redirect target validation
//!
//! Post-login and post-logout targets must be same-origin relative paths;
//! CLI callbacks must point at a plain-http loopback listener.

/// Accept `candidate` only if it is a relative path starting with exactly
/// one `/`. Anything else (empty, absolute, protocol-relative `//host`,
/// or the backslash variant browsers normalise to `//`) yields `fallback`.
pub fn sanitize_relative_redirect(candidate: &str, fallback: &str) -> String {
    if is_relative_path(candidate) {
        candidate.to_string()
    } else {
        if !candidate.is_empty() {
            tracing::warn!(redirect_url = %candidate, "Blocked potential open redirect");
        }
        fallback.to_string()
    }
}

fn is_relative_path(candidate: &str) -> bool {
    candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.starts_with("/\\")
        && !candidate.chars().any(char::is_control)
}

/// Paths served by this backend are left as-is; everything else belongs
/// to the frontend.
pub fn is_backend_path(path: &str) -> bool {
    path.starts_with("/auth") || path.starts_with("/device")
}

/// Sanitize a post-login target and make it absolute when it belongs to the
/// frontend.
pub fn resolve_redirect(candidate: &str, frontend_url: &str) -> String {
    let path = sanitize_relative_redirect(candidate, "/");
    if is_backend_path(&path) {
        path
    } else {
        format!("{}{}", frontend_url.trim_end_matches('/'), path)
    }
}

/// Logout only treats `/auth…` as backend; `/device` goes through the
/// frontend. Unsafe targets fall back to the frontend root.
pub fn resolve_logout_redirect(candidate: Option<&str>, frontend_url: &str) -> String {
    let frontend = frontend_url.trim_end_matches('/');
    match candidate {
        Some(target) if is_relative_path(target) => {
            if target.starts_with("/auth") {
                target.to_string()
            } else {
                format!("{frontend}{target}")
            }
        }
        Some(target) if !target.is_empty() => {
            tracing::warn!(redirect_url = %target, "Blocked potential open redirect in logout");
            frontend.to_string()
        }
        _ => frontend.to_string(),
    }
}

/// Accept only `cli_redirect` values that return to the CLI authorize page.
pub fn is_cli_redirect(candidate: &str) -> bool {
    is_relative_path(candidate) && candidate.starts_with("/auth/cli/")
}

/// Append the share-link email mismatch hint.
pub fn append_email_mismatch(target: &str, expected: &str, actual: &str) -> String {
    let separator = if target.contains('?') { '&' } else { '?' };
    format!(
        "{target}{separator}email_mismatch=1&expected={}&actual={}",
        urlencoding::encode(expected),
        urlencoding::encode(actual)
    )
}

/// Validate a CLI callback URL.
///
/// Requirements, all checked against the raw string so URL normalisation
/// cannot launder a bad value:
/// - scheme exactly `http`
/// - host exactly `localhost` or `127.0.0.1` (case-sensitive, no trailing
///   dot, no IPv6 literal)
/// - no userinfo
/// - optional port in 1..=65535
pub fn is_localhost_callback(raw: &str) -> bool {
    if url::Url::parse(raw).is_err() {
        return false;
    }

    let Some(rest) = raw.strip_prefix("http://") else {
        return false;
    };

    let authority_end = rest
        .find(|c| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    if authority.is_empty() || authority.contains('@') || authority.starts_with('[') {
        return false;
    }

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (authority, None),
    };

    if host != "localhost" && host != "127.0.0.1" {
        return false;
    }

    match port {
        None => true,
        Some(port) => {
            !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && port
                    .parse::<u32>()
                    .is_ok_and(|p| (1..=65535).contains(&p))
        }
    }
}

/// Build `{callback}?{param}={value}` respecting an existing query string.
pub fn with_query_param(callback: &str, param: &str, value: &str) -> String {
    let separator = if callback.contains('?') { '&' } else { '?' };
    format!("{callback}{separator}{param}={}", urlencoding::encode(value))
}
