use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::WikiClientConfig;
use crate::error::{Result, WikiError};

/// Request parameters, minus `format`/`formatversion` which every call adds.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Raw HTTP leg of an API call: send parameters, hand back the decoded body.
///
/// Implementations keep one cookie store for their whole lifetime and never retry.
pub trait Transport {
    fn send(&mut self, method: Method, params: &[(String, String)]) -> Result<Value>;
}

pub struct HttpTransport {
    client: Client,
    api_url: Url,
}

impl HttpTransport {
    pub fn new(config: &WikiClientConfig) -> Result<Self> {
        let api_url = Url::parse(config.api_url.trim()).map_err(|error| {
            WikiError::Config(format!("invalid WIKI_API_URL `{}`: {error}", config.api_url))
        })?;
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout_ms.map(Duration::from_millis))
            .cookie_store(true)
            .build()
            .map_err(|error| {
                WikiError::Config(format!("failed to build MediaWiki HTTP client: {error}"))
            })?;
        Ok(Self { client, api_url })
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }
}

impl Transport for HttpTransport {
    fn send(&mut self, method: Method, params: &[(String, String)]) -> Result<Value> {
        let request = match method {
            Method::Get => self.client.get(self.api_url.clone()).query(params),
            Method::Post => self.client.post(self.api_url.clone()).form(params),
        };
        let response = request.send().map_err(WikiError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(WikiError::Transport {
                status: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        let body = response.text().map_err(WikiError::from_reqwest)?;
        serde_json::from_str(&body).map_err(|error| {
            WikiError::protocol(format!("failed to decode MediaWiki API JSON response: {error}"))
        })
    }
}

/// API-level wrapper over a [`Transport`]: common parameters, server error
/// objects, warnings and request accounting.
pub struct ApiClient<T> {
    transport: T,
    request_count: usize,
}

impl<T: Transport> ApiClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            request_count: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn request_count(&self) -> usize {
        self.request_count
    }

    pub fn get(&mut self, params: &Params) -> Result<Value> {
        self.request(Method::Get, params)
    }

    pub fn post(&mut self, params: &Params) -> Result<Value> {
        self.request(Method::Post, params)
    }

    pub fn request(&mut self, method: Method, params: &Params) -> Result<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            pairs.push((key.clone(), value.clone()));
        }

        self.request_count += 1;
        debug!(
            method = method.as_str(),
            action = params.get("action").map(String::as_str).unwrap_or(""),
            request = self.request_count,
            "sending MediaWiki API request"
        );
        let payload = self.transport.send(method, &pairs)?;

        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            return Err(WikiError::Api {
                code: code.to_string(),
                info: info.to_string(),
            });
        }
        if let Some(warnings) = payload.get("warnings").and_then(Value::as_object) {
            for (module, detail) in warnings {
                let text = detail
                    .get("warnings")
                    .or_else(|| detail.get("*"))
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified warning");
                warn!(module = %module, "MediaWiki API warning: {text}");
            }
        }
        Ok(payload)
    }
}

/// Build a [`Params`] map from literal pairs.
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
