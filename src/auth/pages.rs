//! Server-rendered HTML for the browser-facing auth flows
//!
//! Every interpolated value goes through `html_escape`.

use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

const STYLE: &str = r#"<style>
  body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; display: flex; justify-content: center; align-items: center; min-height: 100vh; margin: 0; background: #fafafa; color: #1a1a1a; }
  .container { background: #fff; padding: 2.5rem; border-radius: 6px; border: 1px solid #e5e5e5; text-align: center; max-width: 420px; width: 100%; }
  .btn { display: block; padding: 0.75rem; margin: 0.5rem 0; border-radius: 4px; border: 1px solid #d4d4d4; color: #1a1a1a; text-decoration: none; }
  .divider { margin: 1rem 0; color: #999; font-size: 0.75rem; }
  input { width: 100%; padding: 0.6rem; margin: 0.25rem 0; box-sizing: border-box; }
  .code { font-family: monospace; font-size: 1.5rem; letter-spacing: 0.2em; text-align: center; text-transform: uppercase; }
  .error { color: #dc2626; }
</style>"#;

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>{} - Confab</title>\n{STYLE}\n</head>\n<body>\n<div class=\"container\">\n{body}\n</div>\n</body>\n</html>\n",
        text(title)
    )
}

/// One provider button on the selector
pub struct ProviderLink<'a> {
    pub name: &'a str,
    pub display_name: &'a str,
}

/// Provider selector.
///
/// `query` is the already-encoded `?redirect=…&email=…` suffix (may be empty).
pub fn login_selector(
    providers: &[ProviderLink<'_>],
    password_enabled: bool,
    query: &str,
    expected_email: Option<&str>,
    error: Option<&str>,
    redirect: Option<&str>,
) -> String {
    let mut body = String::from("<h1>Sign in</h1>\n");

    match expected_email {
        Some(email) => body.push_str(&format!(
            "<p>Sign in with <strong>{}</strong> to view this shared session</p>\n",
            text(email)
        )),
        None => body.push_str("<p>Choose your authentication method</p>\n"),
    }

    if let Some(error) = error {
        body.push_str(&format!("<p class=\"error\">{}</p>\n", text(error)));
    }

    for provider in providers {
        body.push_str(&format!(
            "<a class=\"btn btn-{name}\" href=\"/auth/{name}/login{query}\">Continue with {label}</a>\n",
            name = attr(provider.name),
            query = attr(query),
            label = text(provider.display_name),
        ));
    }

    if password_enabled {
        if !providers.is_empty() {
            body.push_str("<div class=\"divider\">or</div>\n");
        }
        body.push_str(&format!(
            "<form method=\"POST\" action=\"/auth/password/login\">\n\
             <input type=\"email\" name=\"email\" placeholder=\"Email\" value=\"{}\" required>\n\
             <input type=\"password\" name=\"password\" placeholder=\"Password\" required>\n\
             <input type=\"hidden\" name=\"redirect\" value=\"{}\">\n\
             <button class=\"btn\" type=\"submit\">Sign in</button>\n</form>\n",
            attr(expected_email.unwrap_or_default()),
            attr(redirect.unwrap_or_default()),
        ));
    }

    page("Sign In", &body)
}

/// Code entry form for the device flow.
pub fn device_form(prefilled_code: &str) -> String {
    let body = format!(
        "<h1>Authorize Device</h1>\n\
         <p>Enter the code shown in your terminal</p>\n\
         <form method=\"POST\" action=\"/auth/device/verify\">\n\
         <input class=\"code\" type=\"text\" name=\"code\" placeholder=\"XXXX-XXXX\" maxlength=\"9\" value=\"{}\" autofocus required>\n\
         <button class=\"btn\" type=\"submit\">Authorize</button>\n</form>\n",
        attr(prefilled_code)
    );
    page("Authorize Device", &body)
}

pub fn device_result(success: bool, message: &str) -> String {
    let heading = if success {
        "<h1>Device Authorized</h1>"
    } else {
        "<h1 class=\"error\">Authorization Failed</h1>"
    };
    let retry = if success {
        ""
    } else {
        "<p><a href=\"/auth/device\">Try again</a></p>\n"
    };
    page(
        "Authorize Device",
        &format!("{heading}\n<p>{}</p>\n{retry}", text(message)),
    )
}

/// Shown when CLI key issuance hits the per-user limit; refreshes to the CLI.
pub fn key_limit(limit: i64, cli_redirect: &str, frontend_url: &str) -> String {
    let body = format!(
        "<meta http-equiv=\"refresh\" content=\"5;url={redirect}\">\n\
         <h1 class=\"error\">API Key Limit Reached</h1>\n\
         <p>You have reached the maximum of {limit} API keys. Please delete some unused keys before creating new ones.</p>\n\
         <p><a href=\"{frontend}/settings/api-keys\">Manage your API keys</a></p>\n\
         <p>Redirecting to CLI in 5 seconds...</p>\n",
        redirect = attr(cli_redirect),
        frontend = attr(frontend_url),
    );
    page("API Key Limit Reached", &body)
}
