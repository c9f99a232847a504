use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::debug;

use crate::Result;
use crate::client::{DabPumpsClient, DabPumpsClientBuilder};

pub type SharedClient = Arc<Mutex<DabPumpsClient>>;

type Configure = Box<dyn Fn(DabPumpsClientBuilder) -> DabPumpsClientBuilder + Send + Sync>;

/// Key identifying an account: lowercased username plus a short hash of the
/// password, so that changed credentials get a fresh client.
pub fn credential_key(username: &str, password: &SecretString) -> String {
    let mut hasher = DefaultHasher::new();
    password.expose_secret().hash(&mut hasher);
    format!("{}_{}", username.to_lowercase(), hasher.finish() % 100_000_000)
}

/// Clients shared between every installation configured for the same account.
///
/// Create one registry at startup and hand it to each [`Coordinator`]; call
/// [`ClientRegistry::shutdown`] when the application stops.
///
/// [`Coordinator`]: crate::Coordinator
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, SharedClient>>,
    configure: Configure,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            configure: Box::new(|builder| builder),
        }
    }

    /// Apply `f` to the builder of every client this registry creates.
    pub fn with_builder(
        f: impl Fn(DabPumpsClientBuilder) -> DabPumpsClientBuilder + Send + Sync + 'static,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            configure: Box::new(f),
        }
    }

    pub fn get_or_create(&self, username: &str, password: &SecretString) -> Result<SharedClient> {
        let key = credential_key(username, password);

        if let Some(client) = self.read().get(&key) {
            return Ok(client.clone());
        }

        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let builder = DabPumpsClient::builder(
            username,
            SecretString::from(password.expose_secret().to_string()),
        );
        let client = Arc::new(Mutex::new((self.configure)(builder).build()?));
        debug!(username, "created client for account");
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn get(&self, username: &str, password: &SecretString) -> Option<SharedClient> {
        self.read().get(&credential_key(username, password)).cloned()
    }

    pub fn remove(&self, username: &str, password: &SecretString) -> Option<SharedClient> {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&credential_key(username, password))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every client, logging each one out.
    pub async fn shutdown(&self) {
        let clients: Vec<SharedClient> = self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, c)| c)
            .collect();
        for client in clients {
            client.lock().await.logout().await;
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SharedClient>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }
}
