//! Provider capabilities and their implementations.
//!
//! Two traits describe what the pipelines need from a cloud provider:
//! [`CatalogLookup`] enumerates reference data and [`ResourceControl`]
//! creates, refreshes and mutates resources. [`rackspace::RackspaceBackend`]
//! talks to the real HTTP APIs.
//!
//! # Testing
//!
//! Use [`MockBackend`] to drive pipelines without network access. Status
//! sequences are scripted per resource name; each refresh consumes one
//! entry and the last entry sticks:
//!
//! ```
//! use cloudkit::backend::{MockBackend, ResourceControl};
//! use cloudkit::{ResourceSpec, ServerSpec};
//!
//! let mock = MockBackend::new();
//! mock.script("web1", &["BUILD", "ACTIVE"]);
//!
//! let mut server = mock
//!     .create(&ResourceSpec::Server(ServerSpec::new("web1", "img", "2")))
//!     .unwrap();
//! mock.refresh(&mut server).unwrap();
//! assert_eq!(server.status, "BUILD");
//! mock.refresh(&mut server).unwrap();
//! assert_eq!(server.status, "ACTIVE");
//! ```

pub mod rackspace;

use crate::error::{Error, Result};
use crate::types::{
    CatalogEntry, CatalogKind, ContainerOptions, DatabaseUser, DnsRecord, HealthMonitor, IpVersion,
    NetworkAddress, NodeSpec, ResourceHandle, ResourceKind, ResourceSpec,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Enumerates provider reference data.
pub trait CatalogLookup {
    /// Full current listing for `kind`.
    fn list(&self, kind: CatalogKind) -> Result<Vec<CatalogEntry>>;
}

/// Creates and observes remote resources.
pub trait ResourceControl {
    /// Issue a create request. The returned handle is usually still building.
    fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle>;

    /// Fetch the current observed state of a resource.
    fn fetch(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle>;

    /// Re-fetch `handle`, overwriting its status, attributes and addresses.
    ///
    /// The one-time administrative password is kept.
    fn refresh(&self, handle: &mut ResourceHandle) -> Result<()> {
        let fresh = self.fetch(handle.kind, &handle.id)?;
        handle.status = fresh.status;
        handle.attributes = fresh.attributes;
        handle.addresses = fresh.addresses;
        if !fresh.name.is_empty() {
            handle.name = fresh.name;
        }
        Ok(())
    }

    /// Delete a resource.
    fn delete(&self, handle: &ResourceHandle) -> Result<()>;

    /// Add backend nodes to an existing load balancer.
    fn attach_nodes(&self, load_balancer: &ResourceHandle, nodes: &[NodeSpec]) -> Result<()>;

    /// Attach a health check to a load balancer.
    fn set_health_monitor(&self, load_balancer: &ResourceHandle, monitor: &HealthMonitor) -> Result<()>;

    /// Set the body served when no node is available.
    fn set_error_page(&self, load_balancer: &ResourceHandle, content: &str) -> Result<()>;

    /// Add a record to a zone. Returns a handle to the asynchronous job.
    fn add_dns_record(&self, zone: &CatalogEntry, record: &DnsRecord) -> Result<ResourceHandle>;

    /// Create an object storage container.
    fn create_container(&self, name: &str, options: &ContainerOptions) -> Result<()>;

    /// Publish a container through the CDN. Returns the CDN URI.
    fn enable_cdn(&self, container: &str) -> Result<String>;

    /// Write an object. Storage writes complete before this returns.
    fn store_object(&self, container: &str, name: &str, body: &[u8]) -> Result<ResourceHandle>;

    /// Create a database on a running instance.
    fn create_database(&self, instance: &ResourceHandle, name: &str) -> Result<()>;

    /// Create a user on a running instance.
    fn create_database_user(&self, instance: &ResourceHandle, user: &DatabaseUser) -> Result<()>;
}

/// A provider offering both capabilities.
pub trait Provider: CatalogLookup + ResourceControl {}

impl<T: CatalogLookup + ResourceControl + ?Sized> Provider for T {}

// =============================================================================
// Mock backend
// =============================================================================

/// A call recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    List(CatalogKind),
    Create(ResourceSpec),
    Fetch { kind: ResourceKind, id: String, name: String },
    Delete { kind: ResourceKind, id: String },
    AttachNodes { load_balancer: String, nodes: Vec<NodeSpec> },
    SetHealthMonitor { load_balancer: String, monitor: HealthMonitor },
    SetErrorPage { load_balancer: String, content: String },
    AddDnsRecord { zone: String, record: DnsRecord },
    CreateContainer { name: String, options: ContainerOptions },
    EnableCdn { container: String },
    StoreObject { container: String, name: String, body: Vec<u8> },
    CreateDatabase { instance: String, name: String },
    CreateDatabaseUser { instance: String, user: DatabaseUser },
}

#[derive(Debug, Default)]
struct MockState {
    catalogs: HashMap<CatalogKind, Vec<CatalogEntry>>,
    scripts: HashMap<String, VecDeque<String>>,
    addresses: HashMap<String, Vec<NetworkAddress>>,
    resources: BTreeMap<String, ResourceHandle>,
    calls: Vec<MockCall>,
    next_id: u32,
}

impl MockState {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    /// Next scripted status for `name`; the final entry is sticky.
    fn next_status(&mut self, name: &str) -> Option<String> {
        let script = self.scripts.get_mut(name)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    fn record(&mut self, call: MockCall) {
        self.calls.push(call);
    }
}

/// In-memory provider for tests.
///
/// Every resource converges to its kind's ready status unless a status
/// script says otherwise. An unscripted load balancer reports
/// `PENDING_UPDATE` on the first refresh after a configuration change.
/// Created containers and zones are added to the corresponding catalogs.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Create a new empty mock backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with a small image, flavor and zone catalog.
    #[must_use]
    pub fn with_sample_catalog() -> Self {
        let mock = Self::new();
        mock.set_catalog(
            CatalogKind::Image,
            vec![
                CatalogEntry::new("e4dbdba7-b2a4-4ee5-8e8f-4595b6d694ce", "CentOS 6.4"),
                CatalogEntry::new("5cebb13a-f783-4f8c-8058-c4182c724ccd", "Ubuntu 12.04 LTS"),
            ],
        );
        mock.set_catalog(
            CatalogKind::Flavor,
            vec![CatalogEntry::new("1", "256MB"), CatalogEntry::new("2", "512MB")],
        );
        mock.set_catalog(CatalogKind::DatabaseFlavor, vec![CatalogEntry::new("1", "512MB Instance")]);
        mock.set_catalog(CatalogKind::Zone, vec![CatalogEntry::new("3301", "example.com")]);
        mock.set_catalog(CatalogKind::Container, vec![]);
        mock
    }

    /// Replace the listing for a catalog kind.
    pub fn set_catalog(&self, kind: CatalogKind, entries: Vec<CatalogEntry>) {
        let mut state = self.state.lock().unwrap();
        state.catalogs.insert(kind, entries);
    }

    /// Script the statuses successive refreshes of `name` report.
    pub fn script(&self, name: &str, statuses: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .insert(name.to_string(), statuses.iter().map(|s| (*s).to_string()).collect());
    }

    /// Override the addresses reported for `name`.
    pub fn set_addresses(&self, name: &str, addresses: Vec<NetworkAddress>) {
        let mut state = self.state.lock().unwrap();
        state.addresses.insert(name.to_string(), addresses);
    }

    /// Register an existing resource so it can be fetched.
    pub fn insert_resource(&self, handle: ResourceHandle) {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(handle.id.clone(), handle);
    }

    /// All calls made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of create requests issued.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Create(_)))
            .count()
    }

    /// Number of fetches issued for resources named `name`.
    #[must_use]
    pub fn fetch_count(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Fetch { name: n, .. } if n == name))
            .count()
    }

    fn default_addresses(n: u32) -> Vec<NetworkAddress> {
        vec![
            NetworkAddress::new("public", format!("2001:db8::{n}"), Some(IpVersion::V6)),
            NetworkAddress::new("public", format!("198.51.100.{n}"), Some(IpVersion::V4)),
            NetworkAddress::new("private", format!("10.180.0.{n}"), Some(IpVersion::V4)),
        ]
    }

    fn mutate_load_balancer(state: &mut MockState, id: &str) -> Result<()> {
        let lb = state
            .resources
            .get_mut(id)
            .filter(|r| r.kind == ResourceKind::LoadBalancer)
            .ok_or_else(|| Error::http(format!("load balancer {id} not found"), Some(404)))?;
        lb.status = "PENDING_UPDATE".to_string();
        Ok(())
    }
}

impl CatalogLookup for MockBackend {
    fn list(&self, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::List(kind));
        Ok(state.catalogs.get(&kind).cloned().unwrap_or_default())
    }
}

impl ResourceControl for MockBackend {
    fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::Create(spec.clone()));
        let n = state.next_id();
        let kind = spec.kind();
        let initial = kind.vocabulary().transient.first().copied().unwrap_or("BUILD");
        let mut handle = ResourceHandle::new(kind, format!("{kind:?}-{n}").to_lowercase(), spec.name(), initial);

        match spec {
            ResourceSpec::Server(server) => {
                handle.admin_password = Some(format!("pw-{}", server.name));
                handle.attributes.insert("flavor_id".to_string(), server.flavor_id.clone());
                handle.attributes.insert("image_id".to_string(), server.image_id.clone());
            }
            ResourceSpec::LoadBalancer(lb) => {
                handle.attributes.insert("protocol".to_string(), lb.protocol.clone());
                handle.attributes.insert("port".to_string(), lb.port.to_string());
                handle.attributes.insert("nodes".to_string(), lb.nodes.len().to_string());
            }
            ResourceSpec::DatabaseInstance(db) => {
                handle.attributes.insert("flavor_id".to_string(), db.flavor_id.clone());
            }
            ResourceSpec::Image { server_id, .. } => {
                handle.attributes.insert("server_id".to_string(), server_id.clone());
            }
            ResourceSpec::DnsZone { .. } => {}
        }
        state.resources.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    fn fetch(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle> {
        let mut state = self.state.lock().unwrap();
        let mut handle = state
            .resources
            .get(id)
            .filter(|r| r.kind == kind)
            .cloned()
            .ok_or_else(|| Error::http(format!("{kind} {id} not found"), Some(404)))?;
        state.record(MockCall::Fetch {
            kind,
            id: id.to_string(),
            name: handle.name.clone(),
        });

        let ready = kind.vocabulary().ready.first().copied().unwrap_or("ACTIVE").to_string();
        let settled = match state.next_status(&handle.name) {
            Some(status) => {
                handle.status = status.clone();
                status
            }
            // A configuration change is seen once before it settles.
            None if handle.status == "PENDING_UPDATE" => ready,
            None => {
                handle.status = ready.clone();
                ready
            }
        };
        let n: u32 = id.rsplit('-').next().and_then(|s| s.parse().ok()).unwrap_or(0);
        match kind {
            ResourceKind::Server => {
                handle.addresses = state
                    .addresses
                    .get(&handle.name)
                    .cloned()
                    .unwrap_or_else(|| Self::default_addresses(n));
            }
            ResourceKind::LoadBalancer => {
                handle.addresses = vec![NetworkAddress::new(
                    "vip",
                    format!("203.0.113.{n}"),
                    Some(IpVersion::V4),
                )];
            }
            ResourceKind::DatabaseInstance => {
                handle
                    .attributes
                    .insert("hostname".to_string(), format!("{id}.db.example.net"));
            }
            _ => {}
        }

        if kind == ResourceKind::DnsZone && handle.classify() == crate::types::StatusClass::Ready {
            let zone = CatalogEntry::new(handle.id.clone(), handle.name.clone());
            let zones = state.catalogs.entry(CatalogKind::Zone).or_default();
            if !zones.contains(&zone) {
                zones.push(zone);
            }
        }

        handle.admin_password = None;
        let mut stored = handle.clone();
        stored.status = settled;
        state.resources.insert(id.to_string(), stored);
        Ok(handle)
    }

    fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::Delete {
            kind: handle.kind,
            id: handle.id.clone(),
        });
        state.resources.remove(&handle.id);
        Ok(())
    }

    fn attach_nodes(&self, load_balancer: &ResourceHandle, nodes: &[NodeSpec]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::AttachNodes {
            load_balancer: load_balancer.id.clone(),
            nodes: nodes.to_vec(),
        });
        Self::mutate_load_balancer(&mut state, &load_balancer.id)
    }

    fn set_health_monitor(&self, load_balancer: &ResourceHandle, monitor: &HealthMonitor) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::SetHealthMonitor {
            load_balancer: load_balancer.id.clone(),
            monitor: monitor.clone(),
        });
        Self::mutate_load_balancer(&mut state, &load_balancer.id)
    }

    fn set_error_page(&self, load_balancer: &ResourceHandle, content: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::SetErrorPage {
            load_balancer: load_balancer.id.clone(),
            content: content.to_string(),
        });
        Self::mutate_load_balancer(&mut state, &load_balancer.id)
    }

    fn add_dns_record(&self, zone: &CatalogEntry, record: &DnsRecord) -> Result<ResourceHandle> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::AddDnsRecord {
            zone: zone.id.clone(),
            record: record.clone(),
        });
        let n = state.next_id();
        let mut handle = ResourceHandle::new(ResourceKind::DnsRecord, format!("job-{n}"), &record.name, "RUNNING");
        handle.attributes.insert("zone_id".to_string(), zone.id.clone());
        state.resources.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    fn create_container(&self, name: &str, options: &ContainerOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::CreateContainer {
            name: name.to_string(),
            options: options.clone(),
        });
        state
            .catalogs
            .entry(CatalogKind::Container)
            .or_default()
            .push(CatalogEntry::new(name, name));
        Ok(())
    }

    fn enable_cdn(&self, container: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::EnableCdn {
            container: container.to_string(),
        });
        Ok(format!("http://c0000.r00.cf1.rackcdn.example/{container}"))
    }

    fn store_object(&self, container: &str, name: &str, body: &[u8]) -> Result<ResourceHandle> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::StoreObject {
            container: container.to_string(),
            name: name.to_string(),
            body: body.to_vec(),
        });
        let mut handle = ResourceHandle::new(
            ResourceKind::StorageObject,
            format!("{container}/{name}"),
            name,
            "STORED",
        );
        handle.attributes.insert("bytes".to_string(), body.len().to_string());
        Ok(handle)
    }

    fn create_database(&self, instance: &ResourceHandle, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::CreateDatabase {
            instance: instance.id.clone(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn create_database_user(&self, instance: &ResourceHandle, user: &DatabaseUser) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.record(MockCall::CreateDatabaseUser {
            instance: instance.id.clone(),
            user: user.clone(),
        });
        Ok(())
    }
}
