//! Login state and token lifecycle.
//!
//! The login token is fetched and consumed inside [`Wiki::login`]; only the
//! edit token outlives a call, cached until the server rejects it.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::TokenKind;
use crate::error::{Result, WikiError};
use crate::response::decode;
use crate::transport::{Transport, params};
use crate::wiki::Wiki;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    User(String),
}

#[derive(Debug, Default)]
pub struct Session {
    identity: Identity,
    edit_token: Option<String>,
    token_kind: Option<TokenKind>,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.identity, Identity::User(_))
    }

    pub fn has_edit_token(&self) -> bool {
        self.edit_token.is_some()
    }

    /// Token family detected at login or on the first token fetch.
    pub fn token_kind(&self) -> Option<TokenKind> {
        self.token_kind
    }

    fn reset(&mut self) {
        self.identity = Identity::Anonymous;
        self.edit_token = None;
    }
}

impl<T: Transport> Wiki<T> {
    /// Authenticate with `action=login`.
    ///
    /// A `NeedToken` answer is replayed once with the token it carries; a
    /// second one, or any result other than `Success`, is an
    /// [`WikiError::Authentication`].
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.session.reset();

        let login_token = self.fetch_login_token()?;
        if self.config.token_kind.is_none() {
            // Servers that hand out login tokens through meta=tokens also hand out csrf tokens.
            self.session.token_kind = Some(if login_token.is_some() {
                TokenKind::Csrf
            } else {
                TokenKind::Edit
            });
        }

        let mut token = login_token;
        let mut replayed = false;
        loop {
            let mut request = params([
                ("action", "login"),
                ("lgname", username),
                ("lgpassword", password),
            ]);
            if let Some(token) = &token {
                request.insert("lgtoken".to_string(), token.clone());
            }
            let payload: LoginResponse = decode(self.api.post(&request)?, "login")?;
            let login = payload
                .login
                .ok_or_else(|| WikiError::protocol("missing login payload in API response"))?;

            match login.result.as_str() {
                "Success" => {
                    let name = login.lgusername.unwrap_or_else(|| username.to_string());
                    info!(user = %name, "logged in to MediaWiki");
                    self.session.identity = Identity::User(name);
                    self.session.edit_token = None;
                    return Ok(());
                }
                "NeedToken" if !replayed => {
                    let next = login.token.ok_or_else(|| {
                        WikiError::protocol("NeedToken login result carried no token")
                    })?;
                    debug!("login requested a token replay");
                    token = Some(next);
                    replayed = true;
                }
                "NeedToken" => {
                    return Err(WikiError::Authentication {
                        result: login.result.clone(),
                        reason: "server requested a second token replay".to_string(),
                    });
                }
                _ => {
                    let reason = login
                        .reason
                        .as_ref()
                        .map(render_reason)
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(WikiError::Authentication {
                        result: login.result.clone(),
                        reason,
                    });
                }
            }
        }
    }

    /// End the server session and forget identity and tokens.
    pub fn logout(&mut self) -> Result<()> {
        let token = self.edit_token()?;
        let response = self
            .api
            .post(&params([("action", "logout"), ("token", token.as_str())]));
        if let Err(error) = response {
            if error.is_bad_token() {
                self.invalidate_edit_token();
            }
            return Err(error);
        }
        info!("logged out of MediaWiki");
        self.session.reset();
        Ok(())
    }

    /// Cached edit token, fetched on first use.
    ///
    /// Anonymous sessions get whatever token the server hands anonymous users.
    pub fn edit_token(&mut self) -> Result<String> {
        if let Some(token) = &self.session.edit_token {
            return Ok(token.clone());
        }

        let known_kind = self.config.token_kind.or(self.session.token_kind);
        let (token, kind) = match known_kind {
            Some(kind) => (self.fetch_edit_token(kind)?.ok_or_else(|| missing_token(kind))?, kind),
            None => match self.fetch_edit_token(TokenKind::Csrf)? {
                Some(token) => (token, TokenKind::Csrf),
                None => {
                    debug!("no csrf token advertised; probing legacy edit token");
                    let token = self
                        .fetch_edit_token(TokenKind::Edit)?
                        .ok_or_else(|| missing_token(TokenKind::Edit))?;
                    (token, TokenKind::Edit)
                }
            },
        };

        self.session.token_kind = Some(kind);
        self.session.edit_token = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached edit token so the next mutating call fetches a fresh one.
    pub fn invalidate_edit_token(&mut self) {
        self.session.edit_token = None;
    }

    fn fetch_login_token(&mut self) -> Result<Option<String>> {
        let response = self.api.get(&params([
            ("action", "query"),
            ("meta", "tokens"),
            ("type", "login"),
        ]))?;
        let parsed: TokenQueryResponse = decode(response, "login token")?;
        Ok(parsed
            .query
            .and_then(|query| query.tokens)
            .and_then(|tokens| tokens.logintoken))
    }

    fn fetch_edit_token(&mut self, kind: TokenKind) -> Result<Option<String>> {
        match kind {
            TokenKind::Csrf => {
                let response = self.api.get(&params([
                    ("action", "query"),
                    ("meta", "tokens"),
                    ("type", "csrf"),
                ]))?;
                let parsed: TokenQueryResponse = decode(response, "csrf token")?;
                Ok(parsed
                    .query
                    .and_then(|query| query.tokens)
                    .and_then(|tokens| tokens.csrftoken))
            }
            TokenKind::Edit => {
                let response = self
                    .api
                    .get(&params([("action", "tokens"), ("type", "edit")]))?;
                let parsed: LegacyTokenResponse = decode(response, "edit token")?;
                Ok(parsed.tokens.and_then(|tokens| tokens.edittoken))
            }
        }
    }
}

fn missing_token(kind: TokenKind) -> WikiError {
    WikiError::protocol(format!("server did not return a {} token", kind.as_str()))
}

fn render_reason(reason: &Value) -> String {
    match reason {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("code"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| reason.to_string()),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    query: Option<TokenQueryPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LegacyTokenResponse {
    tokens: Option<LegacyTokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct LegacyTokenPayload {
    edittoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    login: Option<LoginPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: String,
    reason: Option<Value>,
    lgusername: Option<String>,
    token: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::Identity;
    use crate::config::{TokenKind, WikiClientConfig};
    use crate::error::WikiError;
    use crate::testing::ScriptedTransport;
    use crate::transport::Method;
    use crate::wiki::Wiki;

    fn wiki_with(transport: ScriptedTransport) -> Wiki<ScriptedTransport> {
        Wiki::with_transport(
            WikiClientConfig::new("https://wiki.example.org/api.php"),
            transport,
        )
    }

    fn login_token() -> serde_json::Value {
        json!({"batchcomplete": true, "query": {"tokens": {"logintoken": "abc+\\"}}})
    }

    #[test]
    fn login_fetches_one_token_then_posts_credentials() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(login_token());
        transport.push_json(json!({"login": {"result": "Success", "lguserid": 7, "lgusername": "Bot"}}));
        let mut wiki = wiki_with(transport);

        wiki.login("bot", "hunter2").expect("login");

        let requests = wiki.api().transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::Get);
        assert_eq!(requests[0].param("meta"), Some("tokens"));
        assert_eq!(requests[0].param("type"), Some("login"));
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].param("action"), Some("login"));
        assert_eq!(requests[1].param("lgname"), Some("bot"));
        assert_eq!(requests[1].param("lgpassword"), Some("hunter2"));
        assert_eq!(requests[1].param("lgtoken"), Some("abc+\\"));

        assert_eq!(wiki.session().identity(), &Identity::User("Bot".to_string()));
        assert!(!wiki.session().has_edit_token());
        assert_eq!(wiki.session().token_kind(), Some(TokenKind::Csrf));
    }

    #[test]
    fn need_token_is_replayed_exactly_once() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {}}));
        transport.push_json(json!({"login": {"result": "NeedToken", "token": "legacy123"}}));
        transport.push_json(json!({"login": {"result": "Success", "lgusername": "Bot"}}));
        let mut wiki = wiki_with(transport);

        wiki.login("Bot", "pw").expect("login");

        let requests = wiki.api().transport().requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].param("lgtoken"), None);
        assert_eq!(requests[2].param("lgtoken"), Some("legacy123"));
        assert_eq!(wiki.session().token_kind(), Some(TokenKind::Edit));
        assert!(wiki.session().is_logged_in());
    }

    #[test]
    fn second_need_token_is_an_authentication_error() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(login_token());
        transport.push_json(json!({"login": {"result": "NeedToken", "token": "t1"}}));
        transport.push_json(json!({"login": {"result": "NeedToken", "token": "t2"}}));
        transport.push_json(json!({"login": {"result": "Success"}}));
        let mut wiki = wiki_with(transport);

        let error = wiki.login("Bot", "pw").expect_err("must fail");
        assert!(matches!(error, WikiError::Authentication { ref result, .. } if result == "NeedToken"));
        assert_eq!(wiki.request_count(), 3);
        assert_eq!(wiki.api().transport().pending(), 1);
        assert!(!wiki.session().is_logged_in());
    }

    #[test]
    fn wrong_password_is_a_typed_failure() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(login_token());
        transport.push_json(json!({"login": {
            "result": "Failed",
            "reason": "Incorrect username or password entered. Please try again."
        }}));
        let mut wiki = wiki_with(transport);

        let error = wiki.login("Bot", "wrong").expect_err("must fail");
        match error {
            WikiError::Authentication { result, reason } => {
                assert_eq!(result, "Failed");
                assert!(reason.contains("Incorrect username or password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(wiki.session().identity(), &Identity::Anonymous);
    }

    #[test]
    fn edit_token_is_fetched_once_and_cached() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "csrf1+\\"}}}));
        let mut wiki = wiki_with(transport);

        assert_eq!(wiki.edit_token().expect("token"), "csrf1+\\");
        assert_eq!(wiki.edit_token().expect("token"), "csrf1+\\");
        assert_eq!(wiki.request_count(), 1);
        assert_eq!(wiki.api().transport().requests()[0].param("type"), Some("csrf"));
        assert_eq!(wiki.session().token_kind(), Some(TokenKind::Csrf));
    }

    #[test]
    fn anonymous_token_is_forwarded_as_returned() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "+\\"}}}));
        let mut wiki = wiki_with(transport);
        assert_eq!(wiki.edit_token().expect("token"), "+\\");
    }

    #[test]
    fn legacy_servers_fall_back_to_edit_tokens() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"warnings": {"query": {"*": "Unrecognized value for parameter 'meta': tokens"}}}));
        transport.push_json(json!({"tokens": {"edittoken": "legacy+\\"}}));
        let mut wiki = wiki_with(transport);

        assert_eq!(wiki.edit_token().expect("token"), "legacy+\\");
        let requests = wiki.api().transport().requests();
        assert_eq!(requests[1].param("action"), Some("tokens"));
        assert_eq!(requests[1].param("type"), Some("edit"));
        assert_eq!(wiki.session().token_kind(), Some(TokenKind::Edit));
    }

    #[test]
    fn configured_token_kind_skips_detection() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"tokens": {"edittoken": "e+\\"}}));
        let mut config = WikiClientConfig::new("https://wiki.example.org/api.php");
        config.token_kind = Some(TokenKind::Edit);
        let mut wiki = Wiki::with_transport(config, transport);

        assert_eq!(wiki.edit_token().expect("token"), "e+\\");
        assert_eq!(wiki.request_count(), 1);
    }

    #[test]
    fn invalidated_token_is_refetched() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "first"}}}));
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "second"}}}));
        let mut wiki = wiki_with(transport);

        assert_eq!(wiki.edit_token().expect("token"), "first");
        wiki.invalidate_edit_token();
        assert!(!wiki.session().has_edit_token());
        assert_eq!(wiki.edit_token().expect("token"), "second");
    }

    #[test]
    fn logout_posts_token_and_resets_session() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(login_token());
        transport.push_json(json!({"login": {"result": "Success", "lgusername": "Bot"}}));
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "c+\\"}}}));
        transport.push_json(json!({}));
        let mut wiki = wiki_with(transport);

        wiki.login("Bot", "pw").expect("login");
        wiki.logout().expect("logout");

        let requests = wiki.api().transport().requests();
        assert_eq!(requests[3].method, Method::Post);
        assert_eq!(requests[3].param("action"), Some("logout"));
        assert_eq!(requests[3].param("token"), Some("c+\\"));
        assert_eq!(wiki.session().identity(), &Identity::Anonymous);
        assert!(!wiki.session().has_edit_token());
    }

    #[test]
    fn rejected_logout_token_is_dropped() {
        let mut transport = ScriptedTransport::default();
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "stale"}}}));
        transport.push_json(json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}}));
        transport.push_json(json!({"query": {"tokens": {"csrftoken": "fresh"}}}));
        let mut wiki = wiki_with(transport);

        let error = wiki.logout().expect_err("must fail");
        assert!(matches!(error, WikiError::Api { ref code, .. } if code == "badtoken"));
        assert!(!wiki.session().has_edit_token());
        assert_eq!(wiki.edit_token().expect("token"), "fresh");
    }
}
