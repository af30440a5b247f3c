use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::WikiClientConfig;
use crate::error::Result;
use crate::page::Page;
use crate::paginate::Paginator;
use crate::session::Session;
use crate::transport::{ApiClient, HttpTransport, Method, Params, Transport};

/// One wiki endpoint plus one session against it.
///
/// Every operation takes `&mut self`: a handle serves one caller at a time.
/// Independent handles share nothing and can be used from different threads.
pub struct Wiki<T = HttpTransport> {
    pub(crate) api: ApiClient<T>,
    pub(crate) session: Session,
    pub(crate) config: WikiClientConfig,
}

impl Wiki<HttpTransport> {
    pub fn new(config: WikiClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, transport))
    }

    pub fn from_env() -> Result<Self> {
        Self::new(WikiClientConfig::from_env())
    }

    /// Build a handle and log in when the configuration carries credentials.
    pub fn connect(config: WikiClientConfig) -> Result<Self> {
        let mut wiki = Self::new(config)?;
        wiki.login_configured()?;
        Ok(wiki)
    }
}

impl<T: Transport> Wiki<T> {
    pub fn with_transport(config: WikiClientConfig, transport: T) -> Self {
        debug!(api_url = %config.api_url, user_agent = %config.user_agent, "created wiki handle");
        Self {
            api: ApiClient::new(transport),
            session: Session::default(),
            config,
        }
    }

    pub fn config(&self) -> &WikiClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    pub fn request_count(&self) -> usize {
        self.api.request_count()
    }

    /// Raw API call on this handle's session, for modules without a typed wrapper.
    ///
    /// The server's `error` object still surfaces as [`crate::WikiError::Api`].
    pub fn request(&mut self, method: Method, params: &Params) -> Result<Value> {
        self.api.request(method, params)
    }

    pub fn page(&self, title: impl Into<String>) -> Page {
        Page::new(title)
    }

    /// Log in with the configured credentials, if any. Returns whether a login happened.
    pub fn login_configured(&mut self) -> Result<bool> {
        let Some(credentials) = self.config.credentials.clone() else {
            return Ok(false);
        };
        self.login(&credentials.username, &credentials.password)?;
        Ok(true)
    }

    /// Lazily enumerate any `list=` query module.
    ///
    /// `list_key` names the array under `query` holding the items. The returned
    /// sequence is one-shot: enumerating again requires a fresh call.
    pub fn query_list<I: DeserializeOwned>(
        &mut self,
        params: Params,
        list_key: &str,
    ) -> Paginator<'_, T, I> {
        Paginator::new(&mut self.api, params, list_key)
    }
}
