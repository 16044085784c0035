//! E2E tests for the device authorization flow

mod common;

use common::{TestServer, location};
use serde_json::{Value, json};

async fn request_code(server: &TestServer, body: Value) -> Value {
    let response = server
        .client
        .post(server.url("/auth/device/code"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

async fn poll(server: &TestServer, device_code: &str) -> reqwest::Response {
    server
        .client
        .post(server.url("/auth/device/token"))
        .json(&json!({ "device_code": device_code }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_device_code_response_shape() {
    let server = TestServer::new().await;

    let body = request_code(&server, json!({ "key_name": "laptop" })).await;

    let user_code = body["user_code"].as_str().unwrap();
    assert_eq!(user_code.len(), 9);
    assert_eq!(&user_code[4..5], "-");
    assert_eq!(body["device_code"].as_str().unwrap().len(), 64);
    assert_eq!(body["verification_uri"], server.url("/auth/device"));
    assert_eq!(body["expires_in"], 300);
    assert_eq!(body["interval"], 5);
}

#[tokio::test]
async fn test_device_code_accepts_empty_body() {
    let server = TestServer::new().await;

    let response = server
        .client
        .post(server.url("/auth/device/code"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_full_device_flow_issues_key_once() {
    let server = TestServer::new().await;
    let user = server.create_password_user("dev@example.com", "correct horse").await;
    let cookie = server.session_cookie(&user.id).await;

    let code = request_code(&server, json!({ "key_name": "laptop" })).await;
    let device_code = code["device_code"].as_str().unwrap();
    let user_code = code["user_code"].as_str().unwrap();

    // Pending until a user approves
    let pending = poll(&server, device_code).await;
    assert_eq!(pending.status(), 401);
    let body: Value = pending.json().await.unwrap();
    assert_eq!(body["error"], "authorization_pending");

    // Lowercase with an en dash, as pasted from a rich-text terminal
    let typed = format!("{}\u{2013}{}", &user_code[..4], &user_code[5..]).to_lowercase();
    let verify = server
        .client
        .post(server.url("/auth/device/verify"))
        .header("cookie", &cookie)
        .form(&[("code", typed.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(verify.status(), 200);
    assert!(verify.text().await.unwrap().contains("Device authorized!"));

    let granted = poll(&server, device_code).await;
    assert_eq!(granted.status(), 200);
    let body: Value = granted.json().await.unwrap();
    assert_eq!(body["token_type"], "Bearer");
    let key = body["access_token"].as_str().unwrap().to_string();
    assert!(key.starts_with("cfb_"));
    assert_eq!(key.len(), 44);

    // Second exchange of the same code
    let replay = poll(&server, device_code).await;
    assert_eq!(replay.status(), 400);
    let body: Value = replay.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");

    // The issued key authenticates as the approving user
    let validate = server
        .client
        .get(server.url("/api/v1/auth/validate"))
        .bearer_auth(&key)
        .send()
        .await
        .unwrap();
    assert_eq!(validate.status(), 200);
    let body: Value = validate.json().await.unwrap();
    assert_eq!(body["email"], "dev@example.com");

    let keys = server.state.api_keys.list(&user.id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, "laptop");
}

#[tokio::test]
async fn test_unknown_device_code_is_invalid_grant() {
    let server = TestServer::new().await;

    let response = poll(&server, "0123456789abcdef").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_expired_device_code() {
    let server = TestServer::with_config(|config| {
        config.auth.device_code_ttl = 1;
    })
    .await;

    let code = request_code(&server, json!({})).await;
    tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

    let response = poll(&server, code["device_code"].as_str().unwrap()).await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "expired_token");
}

#[tokio::test]
async fn test_device_page_requires_session() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/auth/device?code=ABCD-EFGH"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    assert_eq!(
        location(&response),
        "/auth/login?redirect=%2Fauth%2Fdevice%3Fcode%3DABCD-EFGH"
    );
}

#[tokio::test]
async fn test_device_page_prefills_code_for_signed_in_user() {
    let server = TestServer::new().await;
    let user = server.create_password_user("dev@example.com", "correct horse").await;
    let cookie = server.session_cookie(&user.id).await;

    let response = server
        .client
        .get(server.url("/auth/device?code=ABCD-EFGH"))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("value=\"ABCD-EFGH\""));
}

#[tokio::test]
async fn test_verify_with_bad_code_shows_error_page() {
    let server = TestServer::new().await;
    let user = server.create_password_user("dev@example.com", "correct horse").await;
    let cookie = server.session_cookie(&user.id).await;

    let response = server
        .client
        .post(server.url("/auth/device/verify"))
        .header("cookie", &cookie)
        .form(&[("code", "ZZZZ-ZZZZ")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert!(response.text().await.unwrap().contains("Invalid or expired code"));
}

#[tokio::test]
async fn test_key_limit_keeps_device_code_redeemable() {
    let server = TestServer::with_config(|config| {
        config.auth.api_key_limit = 1;
    })
    .await;
    let user = server.create_password_user("dev@example.com", "correct horse").await;
    let old_key = server.api_key(&user.id).await;
    let old_id = server.state.api_keys.list(&user.id).await.unwrap()[0].id.clone();

    let code = request_code(&server, json!({ "key_name": "laptop" })).await;
    let device_code = code["device_code"].as_str().unwrap();
    server
        .state
        .device
        .authorize(code["user_code"].as_str().unwrap(), &user.id)
        .await
        .unwrap();

    let full = poll(&server, device_code).await;
    assert_eq!(full.status(), 409);
    let body: Value = full.json().await.unwrap();
    assert_eq!(body["error"], "api_key_limit_exceeded");

    server.state.api_keys.revoke(&user.id, &old_id).await.unwrap();

    let granted = poll(&server, device_code).await;
    assert_eq!(granted.status(), 200);
    let body: Value = granted.json().await.unwrap();
    let key = body["access_token"].as_str().unwrap();
    assert!(key.starts_with("cfb_"));
    assert_ne!(key, old_key);

    let keys = server.state.api_keys.list(&user.id).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].name, "laptop");
}
