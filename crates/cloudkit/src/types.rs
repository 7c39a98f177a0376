//! Core types shared by the provider backends, the catalog validator and
//! the convergence waiter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Catalog
// =============================================================================

/// Kind of reference data a provider can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogKind {
    /// Machine images available to boot servers from.
    Image,
    /// Server size classes.
    Flavor,
    /// Database instance size classes.
    DatabaseFlavor,
    /// DNS zones (domains) owned by the account.
    Zone,
    /// Object storage containers.
    Container,
    /// Existing servers.
    Server,
    /// Existing load balancers.
    LoadBalancer,
}

/// Which field of a [`CatalogEntry`] a user reference is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    Id,
    Name,
}

impl CatalogKind {
    /// Human-readable name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Flavor => "flavor",
            Self::DatabaseFlavor => "database flavor",
            Self::Zone => "zone",
            Self::Container => "container",
            Self::Server => "server",
            Self::LoadBalancer => "load balancer",
        }
    }

    /// Field a reference is matched on when the caller doesn't say otherwise.
    ///
    /// Images and flavors are referenced by id, zones, containers and
    /// load balancers by name.
    #[must_use]
    pub fn default_match(&self) -> MatchField {
        match self {
            Self::Image | Self::Flavor | Self::DatabaseFlavor | Self::Server => MatchField::Id,
            Self::Zone | Self::Container | Self::LoadBalancer => MatchField::Name,
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry of a catalog enumeration.
///
/// Entries are snapshots; the validator fetches a fresh listing on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// The field selected by `field`.
    #[must_use]
    pub fn field(&self, field: MatchField) -> &str {
        match field {
            MatchField::Id => &self.id,
            MatchField::Name => &self.name,
        }
    }
}

// =============================================================================
// Resource handles
// =============================================================================

/// Closed set of remote resource kinds a handle can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Server,
    LoadBalancer,
    HealthMonitor,
    DnsRecord,
    DnsZone,
    StorageObject,
    DatabaseInstance,
    Image,
}

impl ResourceKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::LoadBalancer => "load balancer",
            Self::HealthMonitor => "health monitor",
            Self::DnsRecord => "DNS record",
            Self::DnsZone => "DNS zone",
            Self::StorageObject => "storage object",
            Self::DatabaseInstance => "database instance",
            Self::Image => "image",
        }
    }

    /// Status vocabulary the provider reports for this kind.
    #[must_use]
    pub fn vocabulary(&self) -> StatusVocabulary {
        match self {
            Self::Server | Self::DatabaseInstance => StatusVocabulary::BUILD,
            Self::LoadBalancer => StatusVocabulary::LOAD_BALANCER,
            Self::HealthMonitor => StatusVocabulary::LOAD_BALANCER_UPDATE,
            Self::DnsRecord | Self::DnsZone => StatusVocabulary::DNS_JOB,
            Self::Image => StatusVocabulary::IMAGE,
            Self::StorageObject => StatusVocabulary::SYNCHRONOUS,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Address family of a network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// A network address reported for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// Network label, e.g. "public" or "private".
    pub network: String,
    pub addr: String,
    /// Family as tagged by the provider, when it tags it.
    pub version: Option<IpVersion>,
}

impl NetworkAddress {
    pub fn new(network: impl Into<String>, addr: impl Into<String>, version: Option<IpVersion>) -> Self {
        Self {
            network: network.into(),
            addr: addr.into(),
            version,
        }
    }
}

/// Handle to a remote resource.
///
/// Created by [`ResourceControl::create`](crate::backend::ResourceControl::create)
/// and mutated only by `refresh`, which overwrites `status`, `attributes` and
/// `addresses` in place. `admin_password` is returned once at creation time
/// and is never touched by a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    pub id: String,
    pub name: String,
    pub status: String,
    pub attributes: BTreeMap<String, String>,
    pub addresses: Vec<NetworkAddress>,
    pub admin_password: Option<String>,
}

impl ResourceHandle {
    pub fn new(
        kind: ResourceKind,
        id: impl Into<String>,
        name: impl Into<String>,
        status: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            id: id.into(),
            name: name.into(),
            status: status.into(),
            attributes: BTreeMap::new(),
            addresses: Vec::new(),
            admin_password: None,
        }
    }

    /// Look up a single attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Addresses on the given network, in provider order.
    pub fn addresses_on<'a>(&'a self, network: &'a str) -> impl Iterator<Item = &'a NetworkAddress> {
        self.addresses.iter().filter(move |a| a.network == network)
    }

    /// First address on the private network, used as the load balancer node address.
    #[must_use]
    pub fn private_address(&self) -> Option<&str> {
        self.addresses_on("private").next().map(|a| a.addr.as_str())
    }

    /// Status classification under this handle's default vocabulary.
    #[must_use]
    pub fn classify(&self) -> StatusClass {
        self.kind.vocabulary().classify(&self.status)
    }
}

// =============================================================================
// Status vocabularies
// =============================================================================

/// Classification of an observed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// Still converging; keep polling.
    Transient,
    /// Converged.
    Ready,
    /// Anything else; the wait aborts.
    Failed,
}

/// Sets of status strings that mean "still building" and "ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusVocabulary {
    pub transient: &'static [&'static str],
    pub ready: &'static [&'static str],
}

impl StatusVocabulary {
    /// Servers and database instances.
    pub const BUILD: Self = Self {
        transient: &["BUILD"],
        ready: &["ACTIVE"],
    };

    /// Load balancer creation.
    pub const LOAD_BALANCER: Self = Self {
        transient: &["BUILD", "PENDING_UPDATE"],
        ready: &["ACTIVE"],
    };

    /// Load balancer configuration changes (health monitor, error page, nodes).
    pub const LOAD_BALANCER_UPDATE: Self = Self {
        transient: &["PENDING_UPDATE"],
        ready: &["ACTIVE"],
    };

    /// Asynchronous DNS jobs.
    pub const DNS_JOB: Self = Self {
        transient: &["INITIALIZED", "RUNNING"],
        ready: &["COMPLETED"],
    };

    /// Server snapshots.
    pub const IMAGE: Self = Self {
        transient: &["QUEUED", "SAVING"],
        ready: &["ACTIVE"],
    };

    /// Writes the provider completes before returning.
    pub const SYNCHRONOUS: Self = Self {
        transient: &[],
        ready: &["STORED"],
    };

    #[must_use]
    pub fn classify(&self, status: &str) -> StatusClass {
        if self.ready.contains(&status) {
            StatusClass::Ready
        } else if self.transient.contains(&status) {
            StatusClass::Transient
        } else {
            StatusClass::Failed
        }
    }
}

// =============================================================================
// Resource specifications
// =============================================================================

/// A file injected into a server at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalityFile {
    pub path: String,
    pub contents: Vec<u8>,
}

/// Parameters for creating a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub image_id: String,
    pub flavor_id: String,
    pub files: Vec<PersonalityFile>,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, image_id: impl Into<String>, flavor_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_id: image_id.into(),
            flavor_id: flavor_id.into(),
            files: Vec::new(),
        }
    }

    /// Install `public_key` as root's authorized_keys.
    pub fn with_authorized_key(mut self, public_key: &[u8]) -> Self {
        self.files.push(PersonalityFile {
            path: "/root/.ssh/authorized_keys".to_string(),
            contents: public_key.to_vec(),
        });
        self
    }
}

/// Where a load balancer's virtual IP is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VirtualIpType {
    #[default]
    Public,
    ServiceNet,
}

impl VirtualIpType {
    #[must_use]
    pub fn as_api_str(&self) -> &'static str {
        match self {
            Self::Public => "PUBLIC",
            Self::ServiceNet => "SERVICENET",
        }
    }
}

/// A backend node behind a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub address: String,
    pub port: u16,
    pub enabled: bool,
}

/// Parameters for creating a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerSpec {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub nodes: Vec<NodeSpec>,
    pub virtual_ip: VirtualIpType,
}

/// HTTP health check attached to a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitor {
    pub check_type: String,
    pub delay_secs: u32,
    pub timeout_secs: u32,
    pub attempts_before_deactivation: u32,
    pub path: String,
    pub status_regex: String,
    pub body_regex: String,
}

impl HealthMonitor {
    /// The fixed HTTP check used by the full stack pipeline.
    #[must_use]
    pub fn http_default() -> Self {
        Self {
            check_type: "HTTP".to_string(),
            delay_secs: 10,
            timeout_secs: 10,
            attempts_before_deactivation: 3,
            path: "/".to_string(),
            status_regex: "^[234][0-9][0-9]$".to_string(),
            body_regex: ".* testing .*".to_string(),
        }
    }
}

/// A DNS record to add to a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
    pub record_type: String,
    pub name: String,
    pub data: String,
    pub ttl: u32,
}

impl DnsRecord {
    pub const DEFAULT_TTL: u32 = 300;

    pub fn a(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            record_type: "A".to_string(),
            name: name.into(),
            data: address.into(),
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn aaaa(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            record_type: "AAAA".to_string(),
            name: name.into(),
            data: address.into(),
            ttl: Self::DEFAULT_TTL,
        }
    }

    pub fn cname(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            record_type: "CNAME".to_string(),
            name: name.into(),
            data: target.into(),
            ttl: Self::DEFAULT_TTL,
        }
    }
}

/// Parameters for creating a database instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInstanceSpec {
    pub name: String,
    pub flavor_id: String,
    pub volume_gb: u32,
}

/// A database user granted access to a set of databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUser {
    pub name: String,
    pub password: String,
    pub databases: Vec<String>,
}

/// Options for creating a storage container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerOptions {
    /// Object served for the container root when CDN-enabled.
    pub web_index: Option<String>,
}

/// Specification of a resource that is created and then awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Server(ServerSpec),
    LoadBalancer(LoadBalancerSpec),
    DatabaseInstance(DatabaseInstanceSpec),
    /// Snapshot of an existing server.
    Image { server_id: String, name: String },
    /// A new DNS zone with an administrative contact.
    DnsZone { name: String, email: String },
}

impl ResourceSpec {
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Server(_) => ResourceKind::Server,
            Self::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Self::DatabaseInstance(_) => ResourceKind::DatabaseInstance,
            Self::Image { .. } => ResourceKind::Image,
            Self::DnsZone { .. } => ResourceKind::DnsZone,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Server(s) => &s.name,
            Self::LoadBalancer(lb) => &lb.name,
            Self::DatabaseInstance(db) => &db.name,
            Self::Image { name, .. } | Self::DnsZone { name, .. } => name,
        }
    }
}
