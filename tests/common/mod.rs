// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, Request, Response},
    Router,
};
use broker_auth::config::Config;
use broker_auth::db::{IdentityStore, MemoryIdentityStore};
use broker_auth::models::{Identity, ProviderProfile};
use broker_auth::routes::create_router;
use broker_auth::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{body_string_contains, header as header_matcher, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN_PATH: &str = "/auth/realms/test/protocol/openid-connect/token";
pub const PROFILE_PATH: &str = "/auth/realms/test/protocol/openid-connect/userinfo";

/// Router plus handles on its state, identity store and mock broker.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryIdentityStore>,
    pub broker: MockServer,
}

#[allow(dead_code)]
impl TestApp {
    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn get_with_token(&self, uri: &str, token: &str) -> Response<Body> {
        self.request(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        self.request(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Run `/login` and return the `state` it handed to the broker.
    pub async fn login_state(&self, query: &str) -> String {
        let response = self.get(&format!("/login?{query}")).await;
        assert_eq!(response.status(), 307, "login should redirect to broker");
        query_param(&location(&response), "state").expect("missing state")
    }

    /// Existing active identity for `subject`, plus an access token for it.
    pub async fn signed_in(&self, subject: &str) -> (Identity, String) {
        let (identity, _) = self
            .store
            .create_or_update("keycloak", subject, &profile(subject))
            .await
            .unwrap();
        let issued = self.state.tokens.issue_tokens(&identity, &[]).unwrap();
        (identity, issued.access_token)
    }
}

/// Test app whose broker is a fresh mock server.
#[allow(dead_code)]
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Like [`spawn_app`], with config adjustments.
#[allow(dead_code)]
pub async fn spawn_app_with(adjust: impl FnOnce(&mut Config)) -> TestApp {
    let broker = MockServer::start().await;
    let mut config = Config::test_default_with_broker(&broker.uri());
    adjust(&mut config);

    let store = Arc::new(MemoryIdentityStore::new());
    let state = Arc::new(AppState::new(config, store.clone()).unwrap());

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        broker,
    }
}

#[allow(dead_code)]
pub fn profile(subject: &str) -> ProviderProfile {
    ProviderProfile {
        subject: subject.to_string(),
        preferred_username: Some(format!("user-{subject}")),
        name: Some("Test User".to_string()),
        given_name: None,
        family_name: None,
        email: Some(format!("{subject}@example.com")),
        email_verified: Some(true),
        picture: None,
    }
}

/// Token endpoint answering `code` with `access_token`.
#[allow(dead_code)]
pub async fn mount_exchange(server: &MockServer, code: &str, access_token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={code}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 300
        })))
        .mount(server)
        .await;
}

/// Userinfo endpoint answering `access_token` with `subject`'s profile.
#[allow(dead_code)]
pub async fn mount_profile(server: &MockServer, access_token: &str, subject: &str) {
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .and(header_matcher("Authorization", format!("Bearer {access_token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sub": subject,
            "preferred_username": format!("user-{subject}"),
            "name": "Test User",
            "email": format!("{subject}@example.com"),
            "email_verified": true
        })))
        .mount(server)
        .await;
}

/// Slow userinfo endpoint (for timeout tests).
#[allow(dead_code)]
pub async fn mount_slow_profile(server: &MockServer, delay: Duration, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(PROFILE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(delay)
                .set_body_json(serde_json::json!({ "sub": "slow" })),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn location(response: &Response<Body>) -> Url {
    let value = response
        .headers()
        .get(header::LOCATION)
        .expect("missing Location header")
        .to_str()
        .unwrap();
    Url::parse(value).unwrap()
}

#[allow(dead_code)]
pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[allow(dead_code)]
pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
