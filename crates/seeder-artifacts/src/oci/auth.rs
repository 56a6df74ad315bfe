//! Registry authentication
//!
//! Handles the `WWW-Authenticate` dance of the OCI distribution API: static
//! bearer tokens, basic auth, and token exchange (password or refresh
//! token) against the realm named in a `Bearer` challenge.

use crate::error::{ArtifactError, Result};
use serde::Deserialize;
use std::fmt;

/// Client id sent with refresh-token grants
const CLIENT_ID: &str = "seeder";

/// Credentials for one registry host
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.password.is_none()
            && self.access_token.is_none()
            && self.refresh_token.is_none()
    }

    fn basic(&self) -> Option<(&str, Option<&str>)> {
        self.username
            .as_deref()
            .map(|user| (user, self.password.as_deref()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = match header.split_once(char::is_whitespace) {
            Some((scheme, rest)) => (scheme, rest),
            None => (header, ""),
        };

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let params = parse_params(rest);
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        Some(Challenge::Bearer {
            realm: get("realm")?,
            service: get("service"),
            scope: get("scope"),
        })
    }
}

/// Split `k1="v1", k2=v2` into pairs, honouring commas inside quotes
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let key = key.trim().to_string();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.peek() {
                if *c == ',' {
                    break;
                }
                value.push(*c);
                chars.next();
            }
            value = value.trim().to_string();
        }
        params.push((key, value));
    }

    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Exchange credentials for a bearer token at the challenge realm
pub(crate) async fn fetch_token(
    client: &reqwest::Client,
    credentials: &Credentials,
    realm: &str,
    service: Option<&str>,
    scope: &str,
) -> Result<String> {
    let request = if let Some(refresh_token) = credentials.refresh_token.as_deref() {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", CLIENT_ID),
            ("scope", scope),
        ];
        if let Some(service) = service {
            form.push(("service", service));
        }
        client.post(realm).form(&form)
    } else {
        let mut query = vec![("scope", scope)];
        if let Some(service) = service {
            query.push(("service", service));
        }
        let request = client.get(realm).query(&query);
        match credentials.basic() {
            Some((user, password)) => request.basic_auth(user, password),
            None => request,
        }
    };

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ArtifactError::Auth(format!("token endpoint {realm} returned {status}")));
    }

    let body: TokenResponse = response.json().await?;
    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ArtifactError::Auth(format!("token endpoint {realm} returned no token")))
}

/// Authorization to attach to registry requests within one lookup
#[derive(Debug, Clone, Default)]
pub(crate) enum Authorization {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: Option<String>,
    },
    Bearer(String),
}

impl Authorization {
    /// What to send before the registry has challenged us
    pub(crate) fn initial(credentials: &Credentials) -> Self {
        match credentials.access_token.as_deref() {
            Some(token) => Authorization::Bearer(token.to_string()),
            None => Authorization::Anonymous,
        }
    }

    pub(crate) fn basic(credentials: &Credentials) -> Option<Self> {
        credentials.basic().map(|(user, password)| Authorization::Basic {
            username: user.to_string(),
            password: password.map(str::to_string),
        })
    }

    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            Authorization::Anonymous => request,
            Authorization::Basic { username, password } => request.basic_auth(username, password.as_deref()),
            Authorization::Bearer(token) => request.bearer_auth(token),
        }
    }
}
