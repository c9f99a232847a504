use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::EntryConfig;
use crate::control::WriteValue;
use crate::error::UpdateError;
use crate::points::{ControlPoint, build_control_points, hold_insignificant_decreases};
use crate::registry::{ClientRegistry, SharedClient};
use crate::rules::ClassificationRules;
use crate::types::*;
use crate::{DabPumpsClient, Error, Result};

/// Everything known about one installation after a successful poll cycle.
#[derive(Debug, Clone)]
pub struct InstallSnapshot {
    pub install: Installation,
    pub devices: BTreeMap<String, Device>,
    pub statuses: BTreeMap<String, Status>,
    pub points: Vec<ControlPoint>,
    pub fetched_at: DateTime<Utc>,
}

impl InstallSnapshot {
    pub fn point(&self, object_id: &str) -> Option<&ControlPoint> {
        self.points.iter().find(|p| p.object_id == object_id)
    }

    pub fn status(&self, object_id: &str) -> Option<&Status> {
        self.statuses.get(object_id)
    }
}

/// Drives poll cycles for a single installation on a shared client.
///
/// A failed cycle never replaces the published snapshot, so subscribers keep
/// seeing the last good data.
pub struct Coordinator {
    client: SharedClient,
    install_id: String,
    rules: Arc<ClassificationRules>,
    tx: watch::Sender<Option<Arc<InstallSnapshot>>>,
}

impl Coordinator {
    pub fn new(client: SharedClient, install_id: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            client,
            install_id: install_id.into(),
            rules: Arc::new(ClassificationRules::builtin().clone()),
            tx,
        }
    }

    /// Coordinator for `config`, reusing the registry's client for the account.
    pub fn from_config(registry: &ClientRegistry, config: &EntryConfig) -> Result<Self> {
        config.validate()?;
        let client = registry.get_or_create(&config.username, &config.password)?;
        Ok(Self::new(client, &config.install_id))
    }

    pub fn with_rules(mut self, rules: ClassificationRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn install_id(&self) -> &str {
        &self.install_id
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<InstallSnapshot>>> {
        self.tx.subscribe()
    }

    /// Most recent good snapshot, if any cycle has succeeded yet.
    pub fn last_snapshot(&self) -> Option<Arc<InstallSnapshot>> {
        self.tx.borrow().clone()
    }

    /// Run one poll cycle and publish the result.
    ///
    /// Schedulers should skip a tick rather than start a cycle while another
    /// is still running.
    pub async fn refresh(&self) -> std::result::Result<Arc<InstallSnapshot>, UpdateError> {
        let mut client = self.client.lock().await;
        client.detect(Some(&self.install_id)).await?;
        let snapshot = Arc::new(self.snapshot(&client)?);
        debug!(
            install = %snapshot.install.name,
            points = snapshot.points.len(),
            "publishing snapshot"
        );
        self.tx.send_replace(Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// Classified control points of the last good snapshot.
    pub fn control_points(&self) -> Vec<ControlPoint> {
        self.last_snapshot()
            .map(|s| s.points.clone())
            .unwrap_or_default()
    }

    /// Write `value` to a control point and publish the updated snapshot.
    pub async fn modify(&self, object_id: &str, value: &WriteValue) -> Result<Status> {
        let point = self
            .last_snapshot()
            .and_then(|s| s.point(object_id).cloned())
            .ok_or_else(|| Error::UnknownStatus(object_id.to_string()))?;

        let mut client = self.client.lock().await;
        let status = client.apply_write(&point, value).await?;
        info!(object_id, value = %status.code, "control point updated");

        if let Ok(snapshot) = self.snapshot(&client) {
            self.tx.send_replace(Some(Arc::new(snapshot)));
        }
        Ok(status)
    }

    fn snapshot(&self, client: &DabPumpsClient) -> Result<InstallSnapshot> {
        let install = client
            .installation(&self.install_id)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("installation {} not found", self.install_id)))?;

        let devices: BTreeMap<String, Device> = client
            .devices()
            .iter()
            .filter(|(_, d)| d.install_id == install.id)
            .map(|(k, d)| (k.clone(), d.clone()))
            .collect();
        let mut statuses: BTreeMap<String, Status> = client
            .statuses()
            .iter()
            .filter(|(_, s)| devices.contains_key(&s.serial))
            .map(|(k, s)| (k.clone(), s.clone()))
            .collect();
        let points = build_control_points(&install, &devices, client.configs(), &statuses, &self.rules);
        if let Some(previous) = self.last_snapshot() {
            hold_insignificant_decreases(&points, &previous.statuses, &mut statuses);
        }

        Ok(InstallSnapshot {
            install,
            devices,
            statuses,
            points,
            fetched_at: Utc::now(),
        })
    }
}

/// List the installations visible to an account, e.g. to pick one before
/// writing an [`EntryConfig`].
pub async fn discover_installations(
    registry: &ClientRegistry,
    username: &str,
    password: &SecretString,
) -> std::result::Result<Vec<Installation>, UpdateError> {
    let client = registry.get_or_create(username, password)?;
    let mut client = client.lock().await;
    client.detect(None).await?;
    Ok(client.installations().values().cloned().collect())
}
