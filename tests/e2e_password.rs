//! E2E tests for the login selector, password login and logout

mod common;

use common::{FRONTEND_URL, TestServer, location, set_cookie};

async fn post_login(server: &TestServer, email: &str, password: &str, redirect: &str) -> reqwest::Response {
    server
        .client
        .post(server.url("/auth/password/login"))
        .form(&[("email", email), ("password", password), ("redirect", redirect)])
        .send()
        .await
        .expect("request succeeds")
}

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::new().await;

    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_login_selector_shows_password_form() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/login?redirect=/sessions/42&email=Alice@Example.com"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("action=\"/auth/password/login\""));
    assert!(body.contains("alice@example.com"));
    assert!(body.contains("/sessions/42"));
}

#[tokio::test]
async fn test_password_login_sets_session_and_redirects_to_frontend() {
    let server = TestServer::new().await;
    server.create_password_user("alice@example.com", "correct horse").await;

    let response = post_login(&server, "Alice@Example.com", "correct horse", "").await;

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), FRONTEND_URL);
    let token = set_cookie(&response, "confab_session").expect("session cookie");
    assert!(!token.is_empty());

    let me = server
        .client
        .get(server.url("/api/v1/me"))
        .header("cookie", format!("confab_session={token}"))
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), 200);
    let body: serde_json::Value = me.json().await.unwrap();
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["auth_method"], "session");
}

#[tokio::test]
async fn test_password_login_honors_relative_redirect() {
    let server = TestServer::new().await;
    server.create_password_user("alice@example.com", "correct horse").await;

    let response = post_login(&server, "alice@example.com", "correct horse", "/sessions/42").await;

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), format!("{FRONTEND_URL}/sessions/42"));
}

#[tokio::test]
async fn test_wrong_password_redirects_with_generic_error() {
    let server = TestServer::new().await;
    server.create_password_user("alice@example.com", "correct horse").await;

    let response = post_login(&server, "alice@example.com", "wrong", "/sessions/42").await;

    assert_eq!(response.status(), 303);
    let target = location(&response);
    assert!(target.starts_with("/login?error=Invalid%20email%20or%20password"));
    assert!(target.contains("&redirect=%2Fsessions%2F42"));
    assert!(set_cookie(&response, "confab_session").is_none());
}

#[tokio::test]
async fn test_unknown_user_gets_same_message_as_wrong_password() {
    let server = TestServer::new().await;
    server.create_password_user("alice@example.com", "correct horse").await;

    let unknown = post_login(&server, "nobody@example.com", "whatever", "").await;
    let wrong = post_login(&server, "alice@example.com", "whatever", "").await;

    assert_eq!(location(&unknown), location(&wrong));
}

#[tokio::test]
async fn test_user_cap_does_not_reveal_unknown_emails() {
    let server = TestServer::with_config(|config| {
        config.auth.max_users = Some("1".to_string());
    })
    .await;
    server.create_password_user("known@example.com", "correct horse").await;

    let known = post_login(&server, "known@example.com", "wrong", "").await;
    let unknown = post_login(&server, "nobody@example.com", "wrong", "").await;

    assert_eq!(known.status(), 303);
    assert_eq!(unknown.status(), 303);
    assert_eq!(location(&known), location(&unknown));
    assert!(location(&unknown).starts_with("/login?error=Invalid%20email%20or%20password"));

    // Existing accounts still sign in at the cap
    let ok = post_login(&server, "known@example.com", "correct horse", "").await;
    assert!(set_cookie(&ok, "confab_session").is_some());
}

#[tokio::test]
async fn test_lockout_after_repeated_failures() {
    let server = TestServer::new().await;
    server.create_password_user("alice@example.com", "correct horse").await;

    for _ in 0..5 {
        post_login(&server, "alice@example.com", "wrong", "").await;
    }

    // Correct password is refused while locked, with the same generic message
    let response = post_login(&server, "alice@example.com", "correct horse", "").await;
    assert_eq!(response.status(), 303);
    assert!(location(&response).starts_with("/login?error=Invalid%20email%20or%20password"));
    assert!(set_cookie(&response, "confab_session").is_none());
}

#[tokio::test]
async fn test_password_login_rejects_disallowed_domain() {
    let server = TestServer::with_config(|config| {
        config.auth.allowed_email_domains = vec!["corp.example".to_string()];
    })
    .await;
    server.create_password_user("alice@example.com", "correct horse").await;

    let response = post_login(&server, "alice@example.com", "correct horse", "").await;

    assert_eq!(response.status(), 303);
    assert!(location(&response).contains("email%20domain%20is%20not%20permitted"));
}

#[tokio::test]
async fn test_password_login_disabled_returns_not_found() {
    let server = TestServer::with_config(|config| {
        config.providers.password_enabled = false;
    })
    .await;

    let response = post_login(&server, "alice@example.com", "correct horse", "").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_logout_destroys_session() {
    let server = TestServer::new().await;
    let user = server.create_password_user("alice@example.com", "correct horse").await;
    let cookie = server.session_cookie(&user.id).await;

    let response = server
        .client
        .post(server.url("/auth/logout?redirect=/goodbye"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    assert_eq!(location(&response), format!("{FRONTEND_URL}/goodbye"));
    assert_eq!(set_cookie(&response, "confab_session").as_deref(), Some(""));

    let me = server
        .client
        .get(server.url("/api/v1/me"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(me.status(), 401);
}

#[tokio::test]
async fn test_logout_rejects_absolute_redirect() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/logout?redirect=https://evil.example"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), FRONTEND_URL);
}
