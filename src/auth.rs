//! Authentication: credential configuration and session-token state
//!
//! Basic credentials are attached directly. JWT mode performs a login
//! exchange on first use, caches the token, renews it proactively inside a
//! leeway window before expiry, and is invalidated by the dispatcher when
//! the server reports an expired token.

use serde::Deserialize;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{SanchayaError, SanchayaResult, ServerError};
use crate::request::{Method, Request};
use crate::transport::HttpTransport;

/// Renew this long before the server-reported expiry.
const TOKEN_LEEWAY: Duration = Duration::from_secs(30);

/// Credential configuration. Default is unauthenticated.
#[derive(Debug, Clone, Default)]
pub enum Authentication {
    /// No credentials attached.
    #[default]
    None,
    /// HTTP basic authentication on every call.
    Basic { username: String, password: String },
    /// Login exchange for a session token, renewed automatically.
    Jwt { username: String, password: String },
    /// Externally obtained bearer token, attached as-is.
    BearerToken(String),
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    jwt: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<u64>,
}

#[derive(Debug, Clone)]
struct Token {
    jwt: String,
    expires_at: Option<SystemTime>,
}

impl Token {
    fn is_fresh(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now + TOKEN_LEEWAY < expires_at,
            None => true,
        }
    }
}

/// Attaches credentials to outgoing calls and manages JWT session state.
pub(crate) struct Authenticator {
    auth: Authentication,
    token: RwLock<Option<Token>>,
}

impl Authenticator {
    pub fn new(auth: Authentication) -> Self {
        Self {
            auth,
            token: RwLock::new(None),
        }
    }

    /// Whether reactive renewal applies (only token-based sessions can
    /// expire server-side).
    pub fn renews(&self) -> bool {
        matches!(self.auth, Authentication::Jwt { .. })
    }

    /// The `Authorization` header value for the next call, if any.
    /// For JWT mode this performs the login exchange when no fresh token
    /// is cached.
    pub async fn authorization(
        &self,
        transport: &HttpTransport,
        endpoint: &Endpoint,
    ) -> SanchayaResult<Option<String>> {
        match &self.auth {
            Authentication::None => Ok(None),
            Authentication::Basic { username, password } => Ok(Some(format!(
                "Basic {}",
                base64_encode(format!("{username}:{password}").as_bytes())
            ))),
            Authentication::BearerToken(token) => Ok(Some(format!("Bearer {token}"))),
            Authentication::Jwt { username, password } => {
                let now = SystemTime::now();
                if let Some(token) = self.token.read().unwrap().as_ref() {
                    if token.is_fresh(now) {
                        return Ok(Some(format!("Bearer {}", token.jwt)));
                    }
                    debug!("session token inside expiry leeway, renewing");
                }
                let token = login(transport, endpoint, username, password).await?;
                let header = format!("Bearer {}", token.jwt);
                *self.token.write().unwrap() = Some(token);
                Ok(Some(header))
            }
        }
    }

    /// Drop the cached token so the next call performs a fresh login.
    pub fn invalidate(&self) {
        self.token.write().unwrap().take();
    }
}

async fn login(
    transport: &HttpTransport,
    endpoint: &Endpoint,
    username: &str,
    password: &str,
) -> SanchayaResult<Token> {
    let encoding = transport.encoding();
    let body = encoding.encode(&serde_json::json!({
        "username": username,
        "password": password,
    }))?;
    let request = Request::new(Method::POST, ["api", "auth"]).body_bytes(body);

    let response = transport.execute(endpoint, &request, None).await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if !(200..300).contains(&status) {
        let detail = encoding
            .decode::<ServerError>(&bytes)
            .map(|e| e.error_message)
            .unwrap_or_else(|_| format!("status {status}"));
        return Err(SanchayaError::Auth(format!("login rejected: {detail}")));
    }

    let login: LoginResponse = encoding.decode(&bytes)?;
    info!(%endpoint, "obtained session token");
    Ok(Token {
        jwt: login.jwt,
        expires_at: login
            .expires_at
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
    })
}

// RFC 4648 standard alphabet with padding. Small enough that pulling in a
// crate for one header is not worth it.
fn base64_encode(input: &[u8]) -> String {
    const ALPHABET: &[u8; 64] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(input.len().div_ceil(3) * 4);
    for chunk in input.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(ALPHABET[(triple >> 18) as usize & 0x3f] as char);
        out.push(ALPHABET[(triple >> 12) as usize & 0x3f] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(triple >> 6) as usize & 0x3f] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[triple as usize & 0x3f] as char
        } else {
            '='
        });
    }
    out
}
