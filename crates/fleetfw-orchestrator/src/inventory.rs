//! Host inventory and credential lookup
//!
//! Both are external systems; the engine only reads from them. The in-memory
//! implementations back the CLI snapshot mode and the tests.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use fleetfw_errors::FleetError;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::model::HostRecord;
use crate::protocol::ManagementProtocol;

/// Read access to the server inventory.
#[async_trait]
pub trait HostInventory: Send + Sync {
    /// Fetch one host.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Discovery`] when the host is unknown or the
    /// inventory cannot be reached.
    async fn host(&self, host_id: &str) -> Result<HostRecord, FleetError>;

    /// All known hosts.
    async fn list_hosts(&self) -> Result<Vec<HostRecord>, FleetError>;
}

/// Inventory held in memory, keyed by host id.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    hosts: RwLock<BTreeMap<String, HostRecord>>,
}

impl InMemoryInventory {
    /// Create an inventory from a list of hosts. Later duplicates win.
    pub fn from_hosts(hosts: impl IntoIterator<Item = HostRecord>) -> Self {
        let map = hosts
            .into_iter()
            .map(|h| (h.host_id.clone(), h))
            .collect();
        Self {
            hosts: RwLock::new(map),
        }
    }

    /// Insert or replace a host.
    pub fn upsert(&self, host: HostRecord) {
        self.hosts.write().insert(host.host_id.clone(), host);
    }

    /// Number of hosts.
    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    /// Whether the inventory is empty.
    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }
}

#[async_trait]
impl HostInventory for InMemoryInventory {
    async fn host(&self, host_id: &str) -> Result<HostRecord, FleetError> {
        self.hosts
            .read()
            .get(host_id)
            .cloned()
            .ok_or_else(|| FleetError::discovery(host_id, "host not found in inventory"))
    }

    async fn list_hosts(&self) -> Result<Vec<HostRecord>, FleetError> {
        Ok(self.hosts.read().values().cloned().collect())
    }
}

/// Management controller credentials for a host.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    secret: String,
    /// Protocols known to work for this host, empty means probe all
    #[serde(default)]
    pub protocol_hints: Vec<ManagementProtocol>,
}

impl Credentials {
    /// Create credentials without protocol hints.
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            protocol_hints: Vec::new(),
        }
    }

    /// Restrict probing to the given protocols.
    pub fn with_hints(mut self, hints: impl IntoIterator<Item = ManagementProtocol>) -> Self {
        self.protocol_hints = hints.into_iter().collect();
        self
    }

    /// Password or token.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the hints allow probing `protocol`.
    pub fn allows(&self, protocol: ManagementProtocol) -> bool {
        self.protocol_hints.is_empty() || self.protocol_hints.contains(&protocol)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("protocol_hints", &self.protocol_hints)
            .finish()
    }
}

/// Resolves management credentials for a host.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Credentials for `host_id`.
    async fn credentials(&self, host_id: &str) -> Result<Credentials, FleetError>;
}

/// Fixed credential table with an optional fallback entry.
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    default: Option<Credentials>,
    per_host: HashMap<String, Credentials>,
}

impl StaticCredentialResolver {
    /// Resolver that hands the same credentials to every host.
    pub fn with_default(credentials: Credentials) -> Self {
        Self {
            default: Some(credentials),
            per_host: HashMap::new(),
        }
    }

    /// Add host-specific credentials.
    pub fn insert(&mut self, host_id: impl Into<String>, credentials: Credentials) {
        self.per_host.insert(host_id.into(), credentials);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn credentials(&self, host_id: &str) -> Result<Credentials, FleetError> {
        self.per_host
            .get(host_id)
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| FleetError::discovery(host_id, "no credentials configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(id: &str) -> HostRecord {
        HostRecord {
            host_id: id.to_string(),
            hostname: format!("{id}.lab"),
            model: "R750".to_string(),
            service_tag: "TAG".to_string(),
            cluster_name: None,
            management_address: "10.0.0.1".to_string(),
            current_versions: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_host_is_discovery_error() {
        let inventory = InMemoryInventory::from_hosts([host("a")]);
        assert!(matches!(inventory.host("a").await, Ok(h) if h.host_id == "a"));
        assert!(matches!(
            inventory.host("b").await,
            Err(FleetError::Discovery { .. })
        ));
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let creds = Credentials::new("root", "calvin");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("root"));
        assert!(!rendered.contains("calvin"));
    }

    #[test]
    fn test_protocol_hints_restrict_probing() {
        let open = Credentials::new("root", "x");
        assert!(open.allows(ManagementProtocol::Ipmi));

        let hinted = Credentials::new("root", "x").with_hints([ManagementProtocol::Redfish]);
        assert!(hinted.allows(ManagementProtocol::Redfish));
        assert!(!hinted.allows(ManagementProtocol::Ssh));
    }

    #[tokio::test]
    async fn test_per_host_credentials_override_default() -> Result<(), FleetError> {
        let mut resolver = StaticCredentialResolver::with_default(Credentials::new("root", "a"));
        resolver.insert("esx-02", Credentials::new("admin", "b"));
        assert_eq!(resolver.credentials("esx-01").await?.username, "root");
        assert_eq!(resolver.credentials("esx-02").await?.username, "admin");
        Ok(())
    }
}
