//! Login and session exchange
//!
//! 1. POST the credentials to the login endpoint; a successful reply carries
//!    a session cookie in `json.data.cookie`
//! 2. GET the session page presenting that cookie; the response sets a
//!    `token_v2` cookie holding a JWT
//! 3. The JWT's `sub` claim is the bearer token for GraphQL calls

use crate::config::EndpointConfig;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, REFERER};
use serde::Deserialize;
use std::sync::Arc;
use tessera_core::{AuthError, Authenticator, Credentials, SessionToken};

/// Fixed cookies the session page expects next to the session cookie
const SESSION_COOKIES: [(&str, &str); 3] = [("edgebucket", "mMmdHtW5Hk0Ir6cSCL"), ("pc", "rg"), ("csv", "2")];

#[derive(Deserialize)]
struct LoginReply {
    json: LoginBody,
}

#[derive(Deserialize)]
struct LoginBody {
    #[serde(default)]
    data: Option<LoginData>,
    #[serde(default)]
    errors: serde_json::Value,
}

#[derive(Deserialize)]
struct LoginData {
    cookie: String,
}

#[derive(Deserialize)]
struct Claims {
    sub: String,
}

/// [`Authenticator`] backed by the cookie login flow
#[derive(Debug, Clone)]
pub struct CookieAuthenticator {
    http: reqwest::Client,
    endpoints: Arc<EndpointConfig>,
}

impl CookieAuthenticator {
    /// Create with a shared HTTP client
    ///
    /// The client must not keep a cookie store; cookies are carried by hand
    /// so identities never see each other's sessions.
    #[must_use]
    pub fn new(http: reqwest::Client, endpoints: Arc<EndpointConfig>) -> Self {
        Self { http, endpoints }
    }

    async fn session_cookie(
        &self,
        credentials: &Credentials,
    ) -> Result<(String, Vec<String>), AuthError> {
        let url = format!(
            "{}{}",
            self.endpoints.login_url,
            urlencoding::encode(&credentials.username)
        );
        let response = self
            .http
            .post(url)
            .timeout(self.endpoints.timeout())
            .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=UTF-8")
            .header("X-Requested-With", "XMLHttpRequest")
            .header(REFERER, &self.endpoints.login_referer)
            .body(login_form(credentials))
            .send()
            .await
            .map_err(transport)?;

        let cookies: Vec<String> = response
            .cookies()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect();
        let reply: LoginReply = response.json().await.map_err(transport)?;

        match reply.json.data {
            Some(data) => Ok((data.cookie, cookies)),
            None => {
                tracing::debug!(account = %credentials.username, errors = %reply.json.errors, "login refused");
                Err(AuthError::Rejected(credentials.username.clone()))
            }
        }
    }

    fn session_request(&self, session: &str, login_cookies: &[String]) -> reqwest::RequestBuilder {
        self.http
            .get(&self.endpoints.session_url)
            .timeout(self.endpoints.timeout())
            .header(COOKIE, cookie_header(session, login_cookies))
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            )
            .header(REFERER, &self.endpoints.login_referer)
    }
}

#[async_trait::async_trait]
impl Authenticator for CookieAuthenticator {
    async fn login(&self, credentials: &Credentials) -> Result<SessionToken, AuthError> {
        let (session, login_cookies) = self.session_cookie(credentials).await?;

        let response = self
            .session_request(&session, &login_cookies)
            .send()
            .await
            .map_err(transport)?;

        let jwt = response
            .cookies()
            .find(|c| c.name() == "token_v2")
            .map(|c| c.value().to_string())
            .ok_or_else(|| AuthError::SessionExchange("no token_v2 cookie".to_string()))?;

        bearer_from_jwt(&jwt)
    }
}

fn login_form(credentials: &Credentials) -> String {
    format!(
        "op=login-main&api_type=json&user={}&passwd={}",
        urlencoding::encode(&credentials.username),
        urlencoding::encode(&credentials.password)
    )
}

fn cookie_header(session: &str, login_cookies: &[String]) -> String {
    let mut parts = login_cookies.to_vec();
    parts.push(format!("reddit_session={}", urlencoding::encode(session)));
    parts.extend(SESSION_COOKIES.iter().map(|(k, v)| format!("{k}={v}")));
    parts.join("; ")
}

/// Extract the `sub` claim of a JWT without verifying it
fn bearer_from_jwt(jwt: &str) -> Result<SessionToken, AuthError> {
    let payload = jwt
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::SessionExchange("token_v2 is not a JWT".to_string()))?;
    let bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))
        .map_err(|e| AuthError::SessionExchange(format!("token_v2 payload: {e}")))?;
    let claims: Claims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::SessionExchange(format!("token_v2 claims: {e}")))?;
    Ok(SessionToken::new(claims.sub))
}

fn transport(e: reqwest::Error) -> AuthError {
    AuthError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn jwt(claims: &str) -> String {
        format!(
            "eyJhbGciOiJSUzI1NiJ9.{}.signature",
            general_purpose::URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn bearer_is_sub_claim() {
        let token = bearer_from_jwt(&jwt(r#"{"sub":"abc-123","exp":1648800000}"#)).unwrap();
        assert_eq!(token.expose(), "abc-123");
    }

    #[test]
    fn malformed_jwt_is_session_error() {
        assert!(matches!(
            bearer_from_jwt("no-dots-here"),
            Err(AuthError::SessionExchange(_))
        ));
        assert!(matches!(
            bearer_from_jwt(&jwt(r#"{"iss":"x"}"#)),
            Err(AuthError::SessionExchange(_))
        ));
    }

    #[test]
    fn form_is_url_encoded() {
        let form = login_form(&Credentials::new("al ice", "p&ss=1"));
        assert_eq!(form, "op=login-main&api_type=json&user=al%20ice&passwd=p%26ss%3D1");
    }

    #[test]
    fn cookie_header_carries_session() {
        let header = cookie_header("a,b", &["loid=1".to_string()]);
        assert_eq!(
            header,
            "loid=1; reddit_session=a%2Cb; edgebucket=mMmdHtW5Hk0Ir6cSCL; pc=rg; csv=2"
        );
    }

    #[test]
    fn session_exchange_times_out() {
        let endpoints = EndpointConfig {
            timeout_secs: 12,
            ..EndpointConfig::default()
        };
        let auth = CookieAuthenticator::new(reqwest::Client::new(), Arc::new(endpoints));
        let request = auth
            .session_request("abc", &["loid=1".to_string()])
            .build()
            .unwrap();
        assert_eq!(request.timeout(), Some(&std::time::Duration::from_secs(12)));
        assert!(request.headers()[COOKIE]
            .to_str()
            .unwrap()
            .contains("reddit_session=abc"));
    }
}
