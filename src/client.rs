use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use secrecy::SecretString;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::control::WriteValue;
use crate::diagnostics::{CycleStats, REDACTED, redact};
use crate::diff::{device_events, removed_status_events, status_events};
use crate::logger::{MessageLogMode, MessageLogger};
use crate::points::ControlPoint;
use crate::protocol::{
    DEFAULT_BASE_URL, INSTALL_LIST_PATH, change_status_body, change_status_path, config_path,
    device_status_path, parse_config, parse_device_status, parse_install_list,
};
use crate::session::Session;
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&BTreeMap<String, Status>) + Send + Sync>;

pub struct DabPumpsClientBuilder {
    username: String,
    password: SecretString,
    base_url: String,
    request_timeout: Duration,
    cycle_timeout: Duration,
    catalog_ttl: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl DabPumpsClientBuilder {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            catalog_ttl: DEFAULT_CATALOG_TTL,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Timeout applied to every single HTTP request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Upper bound for one complete `detect` call, retries included.
    pub fn cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    pub fn catalog_ttl(mut self, ttl: Duration) -> Self {
        self.catalog_ttl = ttl;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    /// Called with the full status map after every successful status merge.
    pub fn on_snapshot(mut self, f: impl Fn(&BTreeMap<String, Status>) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<DabPumpsClient> {
        let base_url = Url::parse(&self.base_url)
            .map_err(|e| Error::InvalidConfig(format!("invalid base url {}: {e}", self.base_url)))?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        Ok(DabPumpsClient {
            session: Session::new(
                base_url,
                self.username,
                self.password,
                self.request_timeout,
                logger,
            ),
            cycle_timeout: self.cycle_timeout,
            catalog_ttl: self.catalog_ttl,
            retry_attempts: self.retry_attempts,
            retry_delay: self.retry_delay,
            installs: BTreeMap::new(),
            devices: BTreeMap::new(),
            configs: BTreeMap::new(),
            statuses: BTreeMap::new(),
            catalog_ts: None,
            status_ts: None,
            stats: CycleStats::default(),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        })
    }
}

/// Client for the DAB Pumps DConnect cloud.
///
/// Keeps the catalog (installations, devices, field metadata) and the merged
/// status map of every polled device. [`DabPumpsClient::detect`] is the entry
/// point for periodic polling: it logs in when needed, refreshes the catalog
/// once it is older than the catalog TTL, polls statuses and retries the
/// whole sequence on failure.
pub struct DabPumpsClient {
    session: Session,
    cycle_timeout: Duration,
    catalog_ttl: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
    installs: BTreeMap<String, Installation>,
    devices: BTreeMap<String, Device>,
    configs: BTreeMap<String, Config>,
    statuses: BTreeMap<String, Status>,
    catalog_ts: Option<DateTime<Utc>>,
    status_ts: Option<DateTime<Utc>>,
    stats: CycleStats,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl DabPumpsClient {
    pub fn builder(username: impl Into<String>, password: SecretString) -> DabPumpsClientBuilder {
        DabPumpsClientBuilder::new(username, password)
    }

    pub async fn login(&mut self) -> Result<()> {
        self.session.login().await
    }

    pub async fn logout(&mut self) {
        self.session.logout().await;
    }

    /// Log in, refresh the catalog if it is stale and, when `install_id` is
    /// given, poll the statuses of that installation's devices.
    ///
    /// The sequence is attempted up to `retry_attempts` times. Every failed
    /// attempt drops the session so the next one starts with a fresh login.
    /// Only the error of the last attempt is returned.
    pub async fn detect(&mut self, install_id: Option<&str>) -> Result<()> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.cycle_timeout, self.detect_with_retry(install_id)).await;

        let err = match outcome {
            Ok(Ok(attempt)) => {
                self.stats.record(attempt, started.elapsed(), true);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(elapsed) => {
                self.session.logout().await;
                Error::from(elapsed)
            }
        };
        self.stats.record(self.retry_attempts, started.elapsed(), false);
        warn!("failed to retrieve data from DAB Pumps: {err}");
        Err(err)
    }

    async fn detect_with_retry(&mut self, install_id: Option<&str>) -> Result<u32> {
        let mut attempt = 0;
        loop {
            match self.detect_once(install_id).await {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    debug!(attempt, "failed to retrieve data: {e}");
                    self.session.logout().await;
                    attempt += 1;
                    if attempt >= self.retry_attempts {
                        return Err(e);
                    }
                    if !self.retry_delay.is_zero() {
                        debug!(delay = ?self.retry_delay, "retrying");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
    }

    async fn detect_once(&mut self, install_id: Option<&str>) -> Result<()> {
        self.session.login().await?;
        self.refresh_catalog(false).await?;
        if let Some(install_id) = install_id {
            self.fetch_install_statuses(install_id).await?;
        }
        Ok(())
    }

    fn catalog_is_fresh(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.catalog_ttl).unwrap_or(chrono::Duration::MAX);
        self.catalog_ts.is_some_and(|ts| now - ts < ttl)
    }

    /// Refetch installations, devices and configurations unless the cached
    /// catalog is still fresh. Statuses of devices that disappeared are
    /// dropped.
    pub async fn refresh_catalog(&mut self, force: bool) -> Result<()> {
        let now = Utc::now();
        if !force && self.catalog_is_fresh(now) {
            return Ok(());
        }

        let body = self
            .session
            .get_json(INSTALL_LIST_PATH, "retrieve installation list")
            .await?;
        let (installs, devices) = parse_install_list(&body);
        let configs = self.fetch_configs(&devices).await?;

        let mut events = device_events(&self.devices, &devices);
        let statuses: BTreeMap<String, Status> = self
            .statuses
            .iter()
            .filter(|(_, s)| devices.contains_key(&s.serial))
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        events.extend(removed_status_events(&self.statuses, &statuses));

        info!(
            installations = installs.len(),
            devices = devices.len(),
            configs = configs.len(),
            "catalog refreshed"
        );
        self.installs = installs;
        self.devices = devices;
        self.configs = configs;
        self.statuses = statuses;
        self.catalog_ts = Some(now);
        self.emit(&events);
        Ok(())
    }

    /// Installations of the account, refreshing the catalog first if it is
    /// stale.
    pub async fn fetch_installations(&mut self) -> Result<&BTreeMap<String, Installation>> {
        self.refresh_catalog(false).await?;
        Ok(&self.installs)
    }

    pub async fn fetch_devices(&mut self) -> Result<&BTreeMap<String, Device>> {
        self.refresh_catalog(false).await?;
        Ok(&self.devices)
    }

    async fn fetch_configs(&self, devices: &BTreeMap<String, Device>) -> Result<BTreeMap<String, Config>> {
        let ids: BTreeSet<&str> = devices
            .values()
            .map(|d| d.config_id.as_str())
            .filter(|id| !id.is_empty())
            .collect();

        let configs = try_join_all(ids.into_iter().map(|id| async move {
            let body = self
                .session
                .get_json(&config_path(id), "retrieve device configuration")
                .await?;
            // Keyed by the id devices refer to, not the one echoed back.
            Ok::<_, Error>((id.to_string(), parse_config(id, &body)))
        }))
        .await?;

        Ok(configs.into_iter().collect())
    }

    async fn fetch_device_status(
        &self,
        device: &Device,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Status>> {
        let body = self
            .session
            .get_json(&device_status_path(&device.serial), "retrieve device statuses")
            .await?;
        parse_device_status(device, &body, now)
    }

    pub async fn fetch_install_statuses(&mut self, install_id: &str) -> Result<()> {
        let install = self
            .installs
            .get(install_id)
            .ok_or_else(|| Error::Protocol(format!("unknown installation {install_id}")))?;
        let devices: Vec<Device> = install
            .devices
            .iter()
            .filter_map(|serial| self.devices.get(serial))
            .filter(|d| d.install_id == install_id)
            .cloned()
            .collect();
        self.fetch_statuses(&devices).await
    }

    /// Poll all `devices` concurrently and merge the results. If any single
    /// request fails the whole poll fails and the status map is untouched.
    pub async fn fetch_statuses(&mut self, devices: &[Device]) -> Result<()> {
        let now = Utc::now();
        let known: Vec<&Device> = devices
            .iter()
            .filter(|d| {
                let known = self.devices.contains_key(&d.serial);
                if !known {
                    debug!(serial = %d.serial, "skipping status poll for unknown device");
                }
                known
            })
            .collect();

        let results = try_join_all(known.iter().map(|d| self.fetch_device_status(d, now))).await?;

        let mut merged = self.statuses.clone();
        for statuses in results {
            merged.extend(statuses);
        }
        let events = status_events(&self.statuses, &merged);
        debug!(devices = known.len(), changed = events.len(), "statuses merged");

        self.statuses = merged;
        self.status_ts = Some(now);
        self.emit(&events);
        for cb in &self.snapshot_callbacks {
            cb(&self.statuses);
        }
        Ok(())
    }

    /// Write a new wire value for a status and return the stored result.
    ///
    /// A single attempt is made. After the vendor accepts the change the
    /// device status is read back; if that read fails or lacks the field the
    /// written value is kept with the previous poll timestamp.
    pub async fn modify(&mut self, object_id: &str, value: &str) -> Result<Status> {
        let status = self
            .statuses
            .get(object_id)
            .ok_or_else(|| Error::UnknownStatus(object_id.to_string()))?;
        let device = self
            .devices
            .get(&status.serial)
            .ok_or_else(|| Error::UnknownStatus(object_id.to_string()))?
            .clone();
        let key = status.key.clone();

        let written = async {
            self.session.login().await?;
            self.session
                .post_json(
                    &change_status_path(&device.serial),
                    &change_status_body(&key, value),
                    "change device status",
                )
                .await
        }
        .await;
        if let Err(e) = written {
            if e.is_auth() {
                self.session.logout().await;
            }
            return Err(e);
        }
        info!(serial = %device.serial, key = %key, "device status changed");

        let now = Utc::now();
        let reread = match self.fetch_device_status(&device, now).await {
            Ok(mut fresh) => fresh.remove(object_id).map(|s| s.code),
            Err(e) => {
                debug!("failed to re-read status after change: {e}");
                None
            }
        };

        let previous = self.statuses.clone();
        let Some(entry) = self.statuses.get_mut(object_id) else {
            return Err(Error::UnknownStatus(object_id.to_string()));
        };
        // Only a value read back from the device refreshes the validity window.
        match reread {
            Some(code) => {
                entry.code = code;
                entry.updated = now;
            }
            None => entry.code = value.to_string(),
        }
        let updated = entry.clone();

        let events = status_events(&previous, &self.statuses);
        self.emit(&events);
        Ok(updated)
    }

    /// Encode a typed value through the point's control and write it.
    pub async fn apply_write(&mut self, point: &ControlPoint, value: &WriteValue) -> Result<Status> {
        let wire = point.control.encode_write(value)?;
        self.modify(&point.object_id, &wire).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn username(&self) -> &str {
        self.session.username()
    }

    pub fn installations(&self) -> &BTreeMap<String, Installation> {
        &self.installs
    }

    pub fn installation(&self, install_id: &str) -> Option<&Installation> {
        self.installs.get(install_id)
    }

    pub fn devices(&self) -> &BTreeMap<String, Device> {
        &self.devices
    }

    pub fn configs(&self) -> &BTreeMap<String, Config> {
        &self.configs
    }

    pub fn statuses(&self) -> &BTreeMap<String, Status> {
        &self.statuses
    }

    pub fn status(&self, object_id: &str) -> Option<&Status> {
        self.statuses.get(object_id)
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Cached state and counters for troubleshooting. Credentials are
    /// redacted.
    pub fn diagnostics(&self) -> Value {
        redact(&json!({
            "username": self.session.username(),
            "password": REDACTED,
            "authenticated_since": self.session.authenticated_since(),
            "catalog_ts": self.catalog_ts,
            "status_ts": self.status_ts,
            "installations": self.installs,
            "devices": self.devices,
            "configs": self.configs,
            "statuses": self.statuses,
            "cycles": self.stats.to_json(),
        }))
    }

    fn emit(&self, events: &[Event]) {
        for event in events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
    }
}
