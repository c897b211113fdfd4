//! End-to-end requests through the mock CONNECT proxy.

use std::sync::Arc;

use persistent_tunnel::http::HeaderValue;
use persistent_tunnel::{Body, ConnectionState, RequestOptions, TunnelConnection, TunnelError};
use serde::Deserialize;
use serde_json::json;

mod common;

#[derive(Debug, Deserialize)]
struct Echo {
    method: String,
    path: String,
    args: std::collections::BTreeMap<String, String>,
    headers: std::collections::BTreeMap<String, String>,
    body: String,
}

#[tokio::test]
async fn test_connect_handshake_targets_host_and_port() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    conn.ready().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Connected);

    let authorities = env.proxy.authorities.lock().unwrap().clone();
    assert_eq!(authorities, vec![format!("localhost:{}", env.target_addr.port())]);
    assert_eq!(env.proxy.auth_headers.lock().unwrap()[0], None);
    conn.destroy();
}

#[tokio::test]
async fn test_proxy_authorization_header() {
    // base64("alice:s3cret")
    let env = common::start_env(Some("Basic YWxpY2U6czNjcmV0")).await;
    let mut config = env.config();
    config.tunnel_url = env.tunnel_url_with_auth("alice", "s3cret");

    let conn = TunnelConnection::new(&config).unwrap();
    let response = conn.request("/get", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(
        env.proxy.auth_headers.lock().unwrap()[0].as_deref(),
        Some("Basic YWxpY2U6czNjcmV0")
    );
    conn.destroy();
}

#[tokio::test]
async fn test_echo_request_framing() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let response = conn
        .request(
            "/anything?a=1&b=url",
            RequestOptions::new()
                .method("post")
                .header("X-Test", "123")
                .query("b", "explicit")
                .json(json!({"hello": "world"})),
        )
        .await
        .unwrap();

    let echo: Echo = response.json().unwrap();
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.path, "/anything");
    assert_eq!(echo.args.get("a").map(String::as_str), Some("1"));
    assert_eq!(echo.args.get("b").map(String::as_str), Some("explicit"));
    assert_eq!(echo.headers.get("x-test").map(String::as_str), Some("123"));
    assert_eq!(
        echo.headers.get("host").cloned(),
        Some(format!("localhost:{}", env.target_addr.port()))
    );
    assert_eq!(
        echo.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(echo.body, r#"{"hello":"world"}"#);
    conn.destroy();
}

#[tokio::test]
async fn test_form_body_is_urlencoded() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let response = conn
        .request(
            "/post",
            RequestOptions::new()
                .method("POST")
                .form("name", "a b")
                .form("n", 2),
        )
        .await
        .unwrap();

    let echo: Echo = response.json().unwrap();
    assert_eq!(echo.body, "name=a+b&n=2");
    assert_eq!(
        echo.headers.get("content-type").map(String::as_str),
        Some("application/x-www-form-urlencoded")
    );
    conn.destroy();
}

#[tokio::test]
async fn test_content_encodings_decode_to_plaintext() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let plain = conn.request("/plain", RequestOptions::new()).await.unwrap();
    assert_eq!(plain.text(), common::PAYLOAD);

    for path in ["/gzip", "/deflate", "/br", "/chunked"] {
        let response = conn.request(path, RequestOptions::new()).await.unwrap();
        assert_eq!(response.status, 200, "{}", path);
        assert_eq!(response.body, plain.body, "{}", path);
    }
    conn.destroy();
}

#[tokio::test]
async fn test_json_content_type_is_parsed() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let response = conn.request("/get?i=7", RequestOptions::new()).await.unwrap();
    match &response.body {
        Body::Json(value) => assert_eq!(value["args"]["i"], "7"),
        Body::Text(text) => panic!("expected parsed JSON, got {:?}", text),
    }
    conn.destroy();
}

#[tokio::test]
async fn test_malformed_json_rejects_and_connection_survives() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let err = conn.request("/bad-json", RequestOptions::new()).await.unwrap_err();
    assert!(matches!(err, TunnelError::Decode(_)));

    let response = conn.request("/get", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(env.proxy.connects(), 1);
    conn.destroy();
}

#[tokio::test]
async fn test_non_2xx_is_a_response() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let response = conn.request("/missing", RequestOptions::new()).await.unwrap();
    assert_eq!(response.status, 404);
    assert!(!response.is_success());
    assert_eq!(response.text(), "not here");
    conn.destroy();
}

#[tokio::test]
async fn test_header_literal_coercion() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let response = conn.request("/headers", RequestOptions::new()).await.unwrap();
    assert_eq!(response.header("X-Count"), Some(&HeaderValue::Integer(42)));
    assert_eq!(response.header("x-ratio"), Some(&HeaderValue::Float(1.5)));
    assert_eq!(response.header("x-flag"), Some(&HeaderValue::Bool(true)));
    assert_eq!(response.header("x-name"), Some(&HeaderValue::Text("alpha".into())));
    // Expressions stay text.
    assert_eq!(response.header("x-expr"), Some(&HeaderValue::Text("1+1".into())));

    let raw = conn
        .request("/headers", RequestOptions::new().evaluate_headers(false))
        .await
        .unwrap();
    assert_eq!(raw.header("x-count"), Some(&HeaderValue::Text("42".into())));
    conn.destroy();
}

#[tokio::test]
async fn test_head_request_has_no_body() {
    let env = common::start_env(None).await;
    let conn = TunnelConnection::new(&env.config()).unwrap();

    let head = conn
        .request("/get", RequestOptions::new().method("HEAD"))
        .await
        .unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.text(), "");

    // The stream is still aligned after the bodyless response.
    let next = conn.request("/get?after=head", RequestOptions::new()).await.unwrap();
    let echo: Echo = next.json().unwrap();
    assert_eq!(echo.args.get("after").map(String::as_str), Some("head"));
    conn.destroy();
}

#[tokio::test]
async fn test_concurrent_requests_are_paired() {
    let env = common::start_env(None).await;

    for pipelining in [1, 4] {
        let mut config = env.config();
        config.pool.pipelining = pipelining;
        let conn = Arc::new(TunnelConnection::new(&config).unwrap());

        let handles: Vec<_> = (0..25)
            .map(|i| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    let response = conn
                        .request("/get", RequestOptions::new().query("i", i))
                        .await
                        .unwrap();
                    (i, response.json::<Echo>().unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (i, echo) = handle.await.unwrap();
            assert_eq!(echo.args.get("i"), Some(&i.to_string()), "pipelining {}", pipelining);
        }
        assert_eq!(conn.queue_len(), 0);
        conn.destroy();
    }
}
