#![allow(dead_code)]

use serde_json::Value;
use std::net::TcpListener;
use std::sync::Arc;

use authgate::auth::{Role, TokenIssuer};
use authgate::configuration::JwtSettings;
use authgate::email_client::RecordingMailer;
use authgate::startup::{run, AppState};
use authgate::store::{InMemoryRefreshTokenStore, InMemoryUserStore, User, UserStore};

pub const PASSWORD: &str = "Secret123";

pub struct TestApp {
    pub address: String,
    pub issuer: Arc<TokenIssuer>,
    pub users: Arc<InMemoryUserStore>,
    pub refresh_tokens: Arc<InMemoryRefreshTokenStore>,
    pub mailer: Arc<RecordingMailer>,
    pub client: reqwest::Client,
}

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        issuer: "authgate-test".to_string(),
        access_token_secret: "integration-access-token-secret".to_string(),
        access_token_expiration: "15m".to_string(),
        refresh_token_secret: "integration-refresh-token-secret".to_string(),
        refresh_token_expiration: "7d".to_string(),
        reset_password_token_secret: "integration-reset-password-secret".to_string(),
        reset_password_token_expiration: "15m".to_string(),
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_mailer(RecordingMailer::new()).await
}

pub async fn spawn_app_with_mailer(mailer: RecordingMailer) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let issuer = Arc::new(TokenIssuer::new(&jwt_settings()).expect("valid JWT settings"));
    let users = Arc::new(InMemoryUserStore::new());
    let refresh_tokens = Arc::new(InMemoryRefreshTokenStore::new());
    let mailer = Arc::new(mailer);

    let state = AppState {
        issuer: issuer.clone(),
        users: users.clone(),
        refresh_tokens: refresh_tokens.clone(),
        mailer: mailer.clone(),
        api_host_url: address.clone(),
    };

    let server = run(listener, state).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        issuer,
        users,
        refresh_tokens,
        mailer,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Inserts a user directly into the store.
    pub async fn seed_user(&self, email: &str, role: Role, verified: bool) -> User {
        let hash = bcrypt::hash(PASSWORD, 4).expect("bcrypt hash");
        let mut user = User::new(
            email.to_string(),
            hash,
            "Test".to_string(),
            "User".to_string(),
            role,
        );
        user.email_verified = verified;
        self.users.insert(&user).await.expect("Failed to seed user");
        user
    }

    pub async fn signin(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/signin"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    /// Signs in and returns `(body, refresh cookie)`.
    pub async fn signin_ok(&self, email: &str) -> (Value, String) {
        let response = self.signin(email, PASSWORD).await;
        assert_eq!(200, response.status().as_u16());
        let cookie = refresh_cookie(&response).expect("refresh cookie set");
        (response.json().await.expect("json body"), cookie)
    }

    pub async fn post_with_cookie(&self, path: &str, cookie: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("Cookie", cookie)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn get_with_bearer(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("Failed to execute request.")
    }
}

/// The `refreshToken=<value>` pair from `Set-Cookie`, ready for a `Cookie` header.
pub fn refresh_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("refreshToken="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn set_cookie_header(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("set-cookie")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn error_message(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("error body");
    body["message"].as_str().unwrap_or_default().to_string()
}
