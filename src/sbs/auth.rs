//! SBS account login.
//!
//! The website hands out a PHP session on any request. Logging in binds a
//! user to that session, and the session can then be exchanged for a chat
//! token that the websocket `bind` frame carries.
//!
//! Use `Authenticator::http()` for production, `Authenticator::static_map()`
//! for tests.

use std::collections::HashMap;

use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::Value;

const SESSION_COOKIE: &str = "PHPSESSID";

/// A logged-in chat identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub uid: u64,
    pub username: String,
    /// Chat auth key, sent with `bind` and every message.
    pub token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("request to SBS failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("SBS did not hand out a session")]
    MissingSession,
    #[error("SBS rejected the login for {0}")]
    Rejected(String),
    #[error("SBS did not return a chat token")]
    MissingToken,
}

pub enum Authenticator {
    Http(HttpAuthenticator),
    Static(StaticAuthenticator),
}

impl Authenticator {
    /// Log in against the SBS query API at `endpoint`.
    pub fn http(endpoint: impl Into<String>) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder().cookie_store(true).build()?;
        Ok(Authenticator::Http(HttpAuthenticator {
            client,
            endpoint: endpoint.into(),
        }))
    }

    /// Accept only the given `username -> (password, account)` pairs (for testing).
    pub fn static_map(accounts: HashMap<String, (String, Account)>) -> Self {
        Authenticator::Static(StaticAuthenticator { accounts })
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        match self {
            Authenticator::Http(a) => a.login(username, password).await,
            Authenticator::Static(a) => a.login(username, password),
        }
    }
}

pub struct HttpAuthenticator {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct LoginReply {
    #[serde(default)]
    requester: Option<Requester>,
}

#[derive(Deserialize)]
struct Requester {
    uid: u64,
    username: String,
}

#[derive(Deserialize)]
struct ChatAuthReply {
    #[serde(default)]
    result: Value,
}

impl HttpAuthenticator {
    async fn login(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        // Any page hands out a session; the query root is enough.
        let response = self.client.get(&self.endpoint).send().await?;
        let session = response
            .cookies()
            .find(|c| c.name() == SESSION_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(AuthError::MissingSession)?;

        let digest = password_digest(password);
        let reply: LoginReply = self
            .client
            .post(format!("{}/submit/login", self.endpoint))
            .query(&[("session", session.as_str())])
            .form(&[("username", username), ("password", digest.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let requester = reply
            .requester
            .filter(|r| r.uid != 0)
            .ok_or_else(|| AuthError::Rejected(username.to_string()))?;
        tracing::debug!(uid = requester.uid, "SBS login accepted for {}", requester.username);

        let reply: ChatAuthReply = self
            .client
            .post(format!("{}/request/chatauth", self.endpoint))
            .query(&[("session", session.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let token = reply
            .result
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        Ok(Account {
            uid: requester.uid,
            username: requester.username,
            token: token.to_string(),
        })
    }
}

/// SBS expects the password as lowercase hex MD5.
fn password_digest(password: &str) -> String {
    hex::encode(Md5::digest(password.as_bytes()))
}

pub struct StaticAuthenticator {
    accounts: HashMap<String, (String, Account)>,
}

impl StaticAuthenticator {
    fn login(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        match self.accounts.get(username) {
            Some((expected, account)) if expected == password => Ok(account.clone()),
            _ => Err(AuthError::Rejected(username.to_string())),
        }
    }
}
