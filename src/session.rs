use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, trace};
use url::Url;

use crate::logger::MessageLogger;
use crate::protocol::{LOGOUT_PATH, check_envelope, extract_login_action};
use crate::{Error, Result};

enum SessionState {
    Unauthenticated,
    Authenticated {
        http: reqwest::Client,
        since: DateTime<Utc>,
    },
}

/// Cookie based web session against the DConnect portal.
///
/// A session starts unauthenticated. `login` scrapes the portal landing page
/// for the login form target and posts the credentials there; the cookies it
/// collects authorize every later request. Any failure tears the session down
/// with `logout`, after which the next `login` starts from a fresh client.
pub(crate) struct Session {
    base_url: Url,
    username: String,
    password: SecretString,
    request_timeout: Duration,
    state: SessionState,
    logger: Option<Mutex<MessageLogger>>,
}

impl Session {
    pub fn new(
        base_url: Url,
        username: String,
        password: SecretString,
        request_timeout: Duration,
        logger: Option<MessageLogger>,
    ) -> Self {
        Self {
            base_url,
            username,
            password,
            request_timeout,
            state: SessionState::Unauthenticated,
            logger: logger.map(Mutex::new),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated { .. })
    }

    pub fn authenticated_since(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SessionState::Authenticated { since, .. } => Some(since),
            SessionState::Unauthenticated => None,
        }
    }

    /// Log in unless a session is already live.
    pub async fn login(&mut self) -> Result<()> {
        if self.is_authenticated() {
            return Ok(());
        }

        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.request_timeout)
            .build()?;

        let root = self.base_url.clone();
        debug!(url = %root, "retrieving login page");
        self.log_request("GET", "/", None);

        let resp = http.get(root.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "unable to connect, got response {status} while trying to reach {root}"
            )));
        }
        let html = resp.text().await?;
        let action = extract_login_action(&html).ok_or_else(|| {
            Error::Protocol(format!("no login form found in response from {root}"))
        })?;
        let login_url = root
            .join(&action)
            .map_err(|e| Error::Protocol(format!("invalid login url {action}: {e}")))?;

        debug!(url = %login_url.path(), "logging in");
        self.log_request(
            "POST",
            login_url.path(),
            Some(&json!({ "username": self.username, "password": "" })),
        );

        let resp = http
            .post(login_url)
            .form(&[
                ("username", self.username.as_str()),
                ("password", self.password.expose_secret()),
            ])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Auth(format!("unable to login, got response {status}")));
        }

        debug!("login successful");
        self.state = SessionState::Authenticated {
            http,
            since: Utc::now(),
        };
        Ok(())
    }

    /// Best-effort logout. The session is always dropped afterwards so the
    /// next call has to log in again.
    pub async fn logout(&mut self) {
        let state = std::mem::replace(&mut self.state, SessionState::Unauthenticated);
        let SessionState::Authenticated { http, .. } = state else {
            return;
        };

        let url = match self.url(LOGOUT_PATH) {
            Ok(url) => url,
            Err(e) => {
                debug!("skipping logout request: {e}");
                return;
            }
        };
        debug!(url = %url, "logging out");
        self.log_request("GET", LOGOUT_PATH, None);

        match http.get(url).send().await {
            Ok(resp) if !resp.status().is_success() => {
                debug!(status = %resp.status(), "logout request was not accepted");
            }
            Ok(_) => {}
            Err(e) => debug!("logout request failed: {e}"),
        }
    }

    pub async fn get_json(&self, path: &str, context: &str) -> Result<Value> {
        let http = self.http()?;
        let url = self.url(path)?;
        debug!(url = %url, "{context} via GET");
        self.log_request("GET", path, None);

        let resp = http.get(url.clone()).send().await?;
        self.read_envelope(resp, path, &url, context).await
    }

    pub async fn post_json(&self, path: &str, body: &Value, context: &str) -> Result<Value> {
        let http = self.http()?;
        let url = self.url(path)?;
        debug!(url = %url, "{context} via POST");
        self.log_request("POST", path, Some(body));

        let resp = http.post(url.clone()).json(body).send().await?;
        self.read_envelope(resp, path, &url, context).await
    }

    async fn read_envelope(
        &self,
        resp: reqwest::Response,
        path: &str,
        url: &Url,
        context: &str,
    ) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "{context}: got response {status} while trying to reach {url}"
            )));
        }
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| Error::Protocol(format!("{context}: malformed response: {e}")))?;
        trace!(path, "response received");
        self.log_response(path, status.as_u16(), &body);

        check_envelope(&body, context)?;
        Ok(body)
    }

    fn http(&self) -> Result<&reqwest::Client> {
        match &self.state {
            SessionState::Authenticated { http, .. } => Ok(http),
            SessionState::Unauthenticated => Err(Error::NotConnected),
        }
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Protocol(format!("invalid path {path}: {e}")))
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) {
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_request(method, path, body);
        }
    }

    fn log_response(&self, path: &str, status: u16, body: &Value) {
        if let Some(logger) = &self.logger
            && let Ok(mut logger) = logger.lock()
        {
            logger.log_response(path, status, body);
        }
    }
}
