//! Rackspace cloud backend.
//!
//! Authenticates against the identity service once, picks regional
//! endpoints out of the returned service catalog and then speaks the
//! compute, load balancer, DNS, object storage, CDN and database APIs.
//!
//! Every call is a single blocking round trip. Nothing is retried; a failed
//! request surfaces as [`Error::Http`].

use crate::backend::{CatalogLookup, ResourceControl};
use crate::error::{Error, Result};
use crate::types::{
    CatalogEntry, CatalogKind, ContainerOptions, DatabaseUser, DnsRecord, HealthMonitor, IpVersion,
    NetworkAddress, NodeSpec, ResourceHandle, ResourceKind, ResourceSpec,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Default identity endpoint.
pub const IDENTITY_URL: &str = "https://identity.api.rackspacecloud.com/v2.0";

const USER_AGENT: &str = concat!("cumulus/", env!("CARGO_PKG_VERSION"));

/// Domains requested per page; the DNS API caps listings at 100.
const DNS_PAGE_SIZE: usize = 100;

/// Unreserved characters stay as they are in object paths.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Account credentials for API key authentication.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Regional service endpoints picked from the service catalog.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub compute: Option<String>,
    pub load_balancers: Option<String>,
    pub dns: Option<String>,
    pub object_store: Option<String>,
    pub cdn: Option<String>,
    pub databases: Option<String>,
}

/// HTTP backend for the Rackspace cloud.
///
/// # Example
///
/// ```no_run
/// use cloudkit::backend::CatalogLookup;
/// use cloudkit::backend::rackspace::{Credentials, RackspaceBackend, IDENTITY_URL};
/// use cloudkit::CatalogKind;
///
/// let creds = Credentials { username: "demo".into(), api_key: "secret".into() };
/// let backend = RackspaceBackend::connect(IDENTITY_URL, &creds, "DFW").unwrap();
/// for flavor in backend.list(CatalogKind::Flavor).unwrap() {
///     println!("{} {}", flavor.id, flavor.name);
/// }
/// ```
pub struct RackspaceBackend {
    agent: ureq::Agent,
    token: String,
    region: String,
    endpoints: Endpoints,
}

impl RackspaceBackend {
    /// Authenticate and resolve endpoints for `region`.
    pub fn connect(identity_url: &str, credentials: &Credentials, region: &str) -> Result<Self> {
        let agent = ureq::Agent::new_with_defaults();
        let url = format!("{}/tokens", identity_url.trim_end_matches('/'));
        let body = json!({
            "auth": {
                "RAX-KSKEY:apiKeyCredentials": {
                    "username": credentials.username,
                    "apiKey": credentials.api_key,
                }
            }
        });

        log::debug!("POST {}", url);
        let response: AuthResponse = match agent
            .post(&url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send_json(&body)
        {
            Ok(mut response) => response.body_mut().read_json()?,
            Err(ureq::Error::StatusCode(code @ (401 | 403))) => {
                return Err(Error::Auth(format!(
                    "identity service rejected credentials for {} (HTTP {})",
                    credentials.username, code
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let endpoints = select_endpoints(&response.access.service_catalog, region);
        log::info!("Authenticated as {} in region {}", credentials.username, region);

        Ok(Self {
            agent,
            token: response.access.token.id,
            region: region.to_string(),
            endpoints,
        })
    }

    /// Region this backend operates in.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoints resolved at connect time.
    #[must_use]
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn endpoint<'a>(&self, endpoint: &'a Option<String>, service: &str) -> Result<&'a str> {
        endpoint.as_deref().ok_or_else(|| {
            Error::InvalidResponse(format!(
                "service catalog has no {} endpoint for region {}",
                service, self.region
            ))
        })
    }

    fn compute(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.compute, "compute")
    }

    fn load_balancers(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.load_balancers, "load balancer")
    }

    fn dns(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.dns, "DNS")
    }

    fn object_store(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.object_store, "object storage")
    }

    fn cdn(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.cdn, "CDN")
    }

    fn databases(&self) -> Result<&str> {
        self.endpoint(&self.endpoints.databases, "database")
    }

    // =========================================================================
    // Request helpers
    // =========================================================================

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        log::debug!("GET {}", url);
        let value = self
            .agent
            .get(url)
            .header("X-Auth-Token", self.token.as_str())
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .call()?
            .body_mut()
            .read_json()?;
        Ok(value)
    }

    fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        log::debug!("POST {}", url);
        let value = self
            .agent
            .post(url)
            .header("X-Auth-Token", self.token.as_str())
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send_json(body)?
            .body_mut()
            .read_json()?;
        Ok(value)
    }

    /// Send a JSON body and ignore whatever comes back.
    fn send_json(&self, method: &str, url: &str, body: &Value) -> Result<()> {
        log::debug!("{} {}", method, url);
        let request = match method {
            "PUT" => self.agent.put(url),
            _ => self.agent.post(url),
        };
        request
            .header("X-Auth-Token", self.token.as_str())
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send_json(body)?;
        Ok(())
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    fn server_handle(server: ServerBody) -> ResourceHandle {
        let mut handle = ResourceHandle::new(ResourceKind::Server, server.id, server.name, server.status);
        if let Some(flavor) = server.flavor {
            handle.attributes.insert("flavor_id".to_string(), flavor.id.to_string());
        }
        if let Some(image) = server.image {
            handle.attributes.insert("image_id".to_string(), image.id.to_string());
        }
        if !server.access_ipv4.is_empty() {
            handle.attributes.insert("access_ipv4".to_string(), server.access_ipv4);
        }
        if !server.access_ipv6.is_empty() {
            handle.attributes.insert("access_ipv6".to_string(), server.access_ipv6);
        }
        for (network, addresses) in server.addresses {
            for address in addresses {
                let version = match address.version {
                    Some(4) => Some(IpVersion::V4),
                    Some(6) => Some(IpVersion::V6),
                    _ => None,
                };
                handle
                    .addresses
                    .push(NetworkAddress::new(network.clone(), address.addr, version));
            }
        }
        handle.admin_password = server.admin_pass;
        handle
    }

    fn load_balancer_handle(lb: LoadBalancerBody) -> ResourceHandle {
        let mut handle =
            ResourceHandle::new(ResourceKind::LoadBalancer, lb.id.to_string(), lb.name, lb.status);
        if let Some(protocol) = lb.protocol {
            handle.attributes.insert("protocol".to_string(), protocol);
        }
        if let Some(port) = lb.port {
            handle.attributes.insert("port".to_string(), port.to_string());
        }
        for vip in lb.virtual_ips {
            let version = match vip.ip_version.as_deref() {
                Some("IPV4") => Some(IpVersion::V4),
                Some("IPV6") => Some(IpVersion::V6),
                _ => None,
            };
            handle.addresses.push(NetworkAddress::new("vip", vip.address, version));
        }
        handle
    }

    fn job_handle(kind: ResourceKind, name: &str, job: JobBody) -> ResourceHandle {
        let mut handle = ResourceHandle::new(kind, job.job_id, name, job.status);
        if let Some(callback) = job.callback_url {
            handle.attributes.insert("callback_url".to_string(), callback);
        }
        if let Some(error) = job.error {
            handle.attributes.insert("error".to_string(), error.to_string());
        }
        if let Some(response) = job.response {
            if let Some(domain) = response["domains"].get(0) {
                if let Some(id) = domain.get("id") {
                    handle.attributes.insert("zone_id".to_string(), json_id(id));
                }
            }
        }
        handle
    }

    fn instance_handle(instance: InstanceBody) -> ResourceHandle {
        let mut handle = ResourceHandle::new(
            ResourceKind::DatabaseInstance,
            instance.id,
            instance.name,
            instance.status,
        );
        if let Some(hostname) = instance.hostname {
            handle.attributes.insert("hostname".to_string(), hostname);
        }
        handle
    }
}

impl CatalogLookup for RackspaceBackend {
    fn list(&self, kind: CatalogKind) -> Result<Vec<CatalogEntry>> {
        let entries = match kind {
            CatalogKind::Image => {
                let url = format!("{}/images", self.compute()?);
                collect_pages(url, |url| {
                    let page: ImageList = self.get_json(url)?;
                    Ok(Page::linked(page.images, &page.links))
                })?
            }
            CatalogKind::Flavor | CatalogKind::DatabaseFlavor => {
                let base = if kind == CatalogKind::Flavor {
                    self.compute()?
                } else {
                    self.databases()?
                };
                collect_pages(format!("{base}/flavors"), |url| {
                    let page: FlavorList = self.get_json(url)?;
                    Ok(Page::linked(page.flavors, &page.links))
                })?
            }
            CatalogKind::Server => {
                let url = format!("{}/servers", self.compute()?);
                collect_pages(url, |url| {
                    let page: ServerList = self.get_json(url)?;
                    Ok(Page::linked(page.servers, &page.links))
                })?
            }
            CatalogKind::LoadBalancer => {
                let url = format!("{}/loadbalancers", self.load_balancers()?);
                collect_pages(url, |url| {
                    let page: LoadBalancerList = self.get_json(url)?;
                    Ok(Page::linked(page.load_balancers, &page.links))
                })?
            }
            CatalogKind::Zone => {
                let base = self.dns()?;
                let domains_page =
                    |offset: usize| format!("{base}/domains?limit={DNS_PAGE_SIZE}&offset={offset}");
                let mut offset = 0;
                collect_pages(domains_page(offset), |url| {
                    let page: DomainList = self.get_json(url)?;
                    let next = next_offset(offset, page.domains.len(), page.total_entries);
                    if let Some(next) = next {
                        offset = next;
                    }
                    Ok(Page {
                        entries: page.domains,
                        next: next.map(&domains_page),
                    })
                })?
            }
            CatalogKind::Container => {
                let url = format!("{}?format=json", self.object_store()?);
                let containers: Vec<ContainerBody> = self.get_json(&url)?;
                return Ok(containers
                    .into_iter()
                    .map(|c| CatalogEntry::new(c.name.clone(), c.name))
                    .collect());
            }
        };
        Ok(entries.into_iter().map(Into::into).collect())
    }
}

impl ResourceControl for RackspaceBackend {
    fn create(&self, spec: &ResourceSpec) -> Result<ResourceHandle> {
        match spec {
            ResourceSpec::Server(server) => {
                let url = format!("{}/servers", self.compute()?);
                let personality: Vec<Value> = server
                    .files
                    .iter()
                    .map(|f| json!({ "path": f.path, "contents": BASE64.encode(&f.contents) }))
                    .collect();
                let body = json!({
                    "server": {
                        "name": server.name,
                        "imageRef": server.image_id,
                        "flavorRef": server.flavor_id,
                        "personality": personality,
                    }
                });
                let created: ServerEnvelope = self.post_json(&url, &body)?;
                let mut handle = Self::server_handle(created.server);
                // Create responses carry only id and password.
                handle.name = server.name.clone();
                if handle.status.is_empty() {
                    handle.status = "BUILD".to_string();
                }
                Ok(handle)
            }
            ResourceSpec::LoadBalancer(lb) => {
                let url = format!("{}/loadbalancers", self.load_balancers()?);
                let nodes: Vec<Value> = lb.nodes.iter().map(node_json).collect();
                let body = json!({
                    "loadBalancer": {
                        "name": lb.name,
                        "port": lb.port,
                        "protocol": lb.protocol,
                        "virtualIps": [{ "type": lb.virtual_ip.as_api_str() }],
                        "nodes": nodes,
                    }
                });
                let created: LoadBalancerEnvelope = self.post_json(&url, &body)?;
                Ok(Self::load_balancer_handle(created.load_balancer))
            }
            ResourceSpec::DatabaseInstance(db) => {
                let base = self.databases()?;
                let url = format!("{}/instances", base);
                let body = json!({
                    "instance": {
                        "name": db.name,
                        "flavorRef": format!("{}/flavors/{}", base, db.flavor_id),
                        "volume": { "size": db.volume_gb },
                    }
                });
                let created: InstanceEnvelope = self.post_json(&url, &body)?;
                Ok(Self::instance_handle(created.instance))
            }
            ResourceSpec::Image { server_id, name } => {
                let url = format!("{}/servers/{}/action", self.compute()?, server_id);
                log::debug!("POST {}", url);
                let response = self
                    .agent
                    .post(&url)
                    .header("X-Auth-Token", self.token.as_str())
                    .header("User-Agent", USER_AGENT)
                    .send_json(&json!({ "createImage": { "name": name } }))?;
                let location = response
                    .headers()
                    .get("location")
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        Error::InvalidResponse("createImage response has no Location header".into())
                    })?;
                let id = location.rsplit('/').next().unwrap_or_default().to_string();
                let mut handle = ResourceHandle::new(ResourceKind::Image, id, name.as_str(), "QUEUED");
                handle.attributes.insert("server_id".to_string(), server_id.clone());
                Ok(handle)
            }
            ResourceSpec::DnsZone { name, email } => {
                let url = format!("{}/domains", self.dns()?);
                let body = json!({
                    "domains": [{
                        "name": name,
                        "emailAddress": email,
                        "ttl": DnsRecord::DEFAULT_TTL,
                    }]
                });
                let job: JobBody = self.post_json(&url, &body)?;
                Ok(Self::job_handle(ResourceKind::DnsZone, name, job))
            }
        }
    }

    fn fetch(&self, kind: ResourceKind, id: &str) -> Result<ResourceHandle> {
        match kind {
            ResourceKind::Server => {
                let url = format!("{}/servers/{}", self.compute()?, id);
                Ok(Self::server_handle(self.get_json::<ServerEnvelope>(&url)?.server))
            }
            ResourceKind::LoadBalancer | ResourceKind::HealthMonitor => {
                let url = format!("{}/loadbalancers/{}", self.load_balancers()?, id);
                let lb = self.get_json::<LoadBalancerEnvelope>(&url)?.load_balancer;
                let mut handle = Self::load_balancer_handle(lb);
                handle.kind = kind;
                Ok(handle)
            }
            ResourceKind::DnsRecord | ResourceKind::DnsZone => {
                let url = format!("{}/status/{}?showDetails=true", self.dns()?, id);
                let job: JobBody = self.get_json(&url)?;
                Ok(Self::job_handle(kind, "", job))
            }
            ResourceKind::DatabaseInstance => {
                let url = format!("{}/instances/{}", self.databases()?, id);
                Ok(Self::instance_handle(self.get_json::<InstanceEnvelope>(&url)?.instance))
            }
            ResourceKind::Image => {
                let url = format!("{}/images/{}", self.compute()?, id);
                let image = self.get_json::<ImageEnvelope>(&url)?.image;
                Ok(ResourceHandle::new(
                    ResourceKind::Image,
                    image.id,
                    image.name,
                    image.status.unwrap_or_default(),
                ))
            }
            ResourceKind::StorageObject => Err(Error::InvalidInput(
                "storage objects are written synchronously and cannot be refreshed".to_string(),
            )),
        }
    }

    fn delete(&self, handle: &ResourceHandle) -> Result<()> {
        let url = match handle.kind {
            ResourceKind::Image => format!("{}/images/{}", self.compute()?, handle.id),
            ResourceKind::Server => format!("{}/servers/{}", self.compute()?, handle.id),
            ResourceKind::LoadBalancer => {
                format!("{}/loadbalancers/{}", self.load_balancers()?, handle.id)
            }
            ResourceKind::DatabaseInstance => {
                format!("{}/instances/{}", self.databases()?, handle.id)
            }
            other => {
                return Err(Error::InvalidInput(format!("cannot delete a {other}")));
            }
        };
        log::debug!("DELETE {}", url);
        self.agent
            .delete(&url)
            .header("X-Auth-Token", self.token.as_str())
            .header("User-Agent", USER_AGENT)
            .call()?;
        Ok(())
    }

    fn attach_nodes(&self, load_balancer: &ResourceHandle, nodes: &[NodeSpec]) -> Result<()> {
        let url = format!("{}/loadbalancers/{}/nodes", self.load_balancers()?, load_balancer.id);
        let nodes: Vec<Value> = nodes.iter().map(node_json).collect();
        self.send_json("POST", &url, &json!({ "nodes": nodes }))
    }

    fn set_health_monitor(&self, load_balancer: &ResourceHandle, monitor: &HealthMonitor) -> Result<()> {
        let url = format!(
            "{}/loadbalancers/{}/healthmonitor",
            self.load_balancers()?,
            load_balancer.id
        );
        let body = json!({
            "healthMonitor": {
                "type": monitor.check_type,
                "delay": monitor.delay_secs,
                "timeout": monitor.timeout_secs,
                "attemptsBeforeDeactivation": monitor.attempts_before_deactivation,
                "path": monitor.path,
                "statusRegex": monitor.status_regex,
                "bodyRegex": monitor.body_regex,
            }
        });
        self.send_json("PUT", &url, &body)
    }

    fn set_error_page(&self, load_balancer: &ResourceHandle, content: &str) -> Result<()> {
        let url = format!("{}/loadbalancers/{}/errorpage", self.load_balancers()?, load_balancer.id);
        self.send_json("PUT", &url, &json!({ "errorpage": { "content": content } }))
    }

    fn add_dns_record(&self, zone: &CatalogEntry, record: &DnsRecord) -> Result<ResourceHandle> {
        let url = format!("{}/domains/{}/records", self.dns()?, zone.id);
        let body = json!({
            "records": [{
                "type": record.record_type,
                "name": record.name,
                "data": record.data,
                "ttl": record.ttl,
            }]
        });
        let job: JobBody = self.post_json(&url, &body)?;
        Ok(Self::job_handle(ResourceKind::DnsRecord, &record.name, job))
    }

    fn create_container(&self, name: &str, options: &ContainerOptions) -> Result<()> {
        let url = format!("{}/{}", self.object_store()?, encode_path(name));
        log::debug!("PUT {}", url);
        let mut request = self
            .agent
            .put(&url)
            .header("X-Auth-Token", self.token.as_str())
            .header("User-Agent", USER_AGENT);
        if let Some(index) = &options.web_index {
            request = request.header("X-Container-Meta-Web-Index", index.as_str());
        }
        request.send_empty()?;
        Ok(())
    }

    fn enable_cdn(&self, container: &str) -> Result<String> {
        let url = format!("{}/{}", self.cdn()?, encode_path(container));
        log::debug!("PUT {}", url);
        self.agent
            .put(&url)
            .header("X-Auth-Token", self.token.as_str())
            .header("User-Agent", USER_AGENT)
            .header("X-CDN-Enabled", "True")
            .send_empty()?;

        log::debug!("HEAD {}", url);
        let response = self
            .agent
            .head(&url)
            .header("X-Auth-Token", self.token.as_str())
            .header("User-Agent", USER_AGENT)
            .call()?;
        response
            .headers()
            .get("x-cdn-uri")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidResponse(format!("no CDN URI returned for {container}")))
    }

    fn store_object(&self, container: &str, name: &str, body: &[u8]) -> Result<ResourceHandle> {
        let url = format!(
            "{}/{}/{}",
            self.object_store()?,
            encode_path(container),
            encode_path(name)
        );
        log::debug!("PUT {} ({} bytes)", url, body.len());
        let response = self
            .agent
            .put(&url)
            .header("X-Auth-Token", self.token.as_str())
            .header("User-Agent", USER_AGENT)
            .send(body)?;
        let mut handle = ResourceHandle::new(
            ResourceKind::StorageObject,
            format!("{container}/{name}"),
            name,
            "STORED",
        );
        handle.attributes.insert("bytes".to_string(), body.len().to_string());
        if let Some(etag) = response.headers().get("etag").and_then(|v| v.to_str().ok()) {
            handle.attributes.insert("etag".to_string(), etag.to_string());
        }
        Ok(handle)
    }

    fn create_database(&self, instance: &ResourceHandle, name: &str) -> Result<()> {
        let url = format!("{}/instances/{}/databases", self.databases()?, instance.id);
        self.send_json("POST", &url, &json!({ "databases": [{ "name": name }] }))
    }

    fn create_database_user(&self, instance: &ResourceHandle, user: &DatabaseUser) -> Result<()> {
        let url = format!("{}/instances/{}/users", self.databases()?, instance.id);
        let databases: Vec<Value> = user.databases.iter().map(|d| json!({ "name": d })).collect();
        let body = json!({
            "users": [{
                "name": user.name,
                "password": user.password,
                "databases": databases,
            }]
        });
        self.send_json("POST", &url, &body)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn node_json(node: &NodeSpec) -> Value {
    json!({
        "address": node.address,
        "port": node.port,
        "condition": if node.enabled { "ENABLED" } else { "DISABLED" },
    })
}

/// Pick one endpoint per service type for `region`.
///
/// Global services (DNS) publish endpoints without a region and match any.
fn select_endpoints(catalog: &[ServiceBody], region: &str) -> Endpoints {
    let find = |service_type: &str| -> Option<String> {
        catalog
            .iter()
            .filter(|s| s.service_type == service_type)
            .flat_map(|s| s.endpoints.iter())
            .find(|e| {
                e.region
                    .as_deref()
                    .is_none_or(|r| r.eq_ignore_ascii_case(region))
            })
            .map(|e| e.public_url.trim_end_matches('/').to_string())
    };

    Endpoints {
        compute: find("compute"),
        load_balancers: find("rax:load-balancer"),
        dns: find("rax:dns"),
        object_store: find("object-store"),
        cdn: find("rax:object-cdn"),
        databases: find("rax:database"),
    }
}

/// Percent-encode a container or object name for use as a path segment.
fn encode_path(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// One page of a catalog listing.
struct Page {
    entries: Vec<NamedBody>,
    next: Option<String>,
}

impl Page {
    fn linked(entries: Vec<NamedBody>, links: &[LinkBody]) -> Self {
        let next = links.iter().find(|l| l.rel == "next").map(|l| l.href.clone());
        Self { entries, next }
    }
}

/// Fetch pages starting at `first` until one has no next page.
///
/// An empty page, or a next link already visited, also ends the listing.
fn collect_pages<F>(first: String, mut fetch_page: F) -> Result<Vec<NamedBody>>
where
    F: FnMut(&str) -> Result<Page>,
{
    let mut entries = Vec::new();
    let mut visited = HashSet::new();
    let mut url = Some(first);
    while let Some(current) = url.take() {
        if !visited.insert(current.clone()) {
            log::warn!("Listing loops back to {}", current);
            break;
        }
        let page = fetch_page(&current)?;
        if page.entries.is_empty() {
            break;
        }
        log::debug!("Listed {} entries from {}", page.entries.len(), current);
        entries.extend(page.entries);
        url = page.next;
    }
    Ok(entries)
}

/// Offset of the next DNS page, if any remain.
fn next_offset(offset: usize, returned: usize, total: Option<usize>) -> Option<usize> {
    let next = offset + returned;
    let more = match total {
        Some(total) => next < total,
        None => returned == DNS_PAGE_SIZE,
    };
    (returned > 0 && more).then_some(next)
}

fn json_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// API response types
// =============================================================================

/// Identifiers are strings in compute and numbers in DNS, load balancer and database APIs.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl fmt::Display for RawId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawId::Text(s) => f.write_str(s),
            RawId::Number(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NamedBody {
    id: RawId,
    name: String,
}

impl From<NamedBody> for CatalogEntry {
    fn from(b: NamedBody) -> Self {
        CatalogEntry::new(b.id.to_string(), b.name)
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access: AccessBody,
}

#[derive(Debug, Deserialize)]
struct AccessBody {
    token: TokenBody,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<ServiceBody>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ServiceBody {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<EndpointBody>,
}

#[derive(Debug, Deserialize)]
struct EndpointBody {
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: String,
}

#[derive(Debug, Deserialize)]
struct LinkBody {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct ImageList {
    images: Vec<NamedBody>,
    #[serde(rename = "images_links", default)]
    links: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct FlavorList {
    flavors: Vec<NamedBody>,
    #[serde(rename = "flavors_links", alias = "links", default)]
    links: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    servers: Vec<NamedBody>,
    #[serde(rename = "servers_links", default)]
    links: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerList {
    #[serde(rename = "loadBalancers")]
    load_balancers: Vec<NamedBody>,
    #[serde(default)]
    links: Vec<LinkBody>,
}

#[derive(Debug, Deserialize)]
struct DomainList {
    domains: Vec<NamedBody>,
    #[serde(rename = "totalEntries")]
    total_entries: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ContainerBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerBody,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: RawId,
}

#[derive(Debug, Deserialize)]
struct ServerBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    flavor: Option<IdRef>,
    // Boot-from-volume servers report image as an empty string.
    #[serde(default, deserialize_with = "image_ref")]
    image: Option<IdRef>,
    #[serde(rename = "accessIPv4", default)]
    access_ipv4: String,
    #[serde(rename = "accessIPv6", default)]
    access_ipv6: String,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<AddressBody>>,
    #[serde(rename = "adminPass")]
    admin_pass: Option<String>,
}

fn image_ref<'de, D>(deserializer: D) -> std::result::Result<Option<IdRef>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct AddressBody {
    addr: String,
    version: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerEnvelope {
    #[serde(rename = "loadBalancer")]
    load_balancer: LoadBalancerBody,
}

#[derive(Debug, Deserialize)]
struct LoadBalancerBody {
    id: RawId,
    name: String,
    status: String,
    protocol: Option<String>,
    port: Option<u16>,
    #[serde(rename = "virtualIps", default)]
    virtual_ips: Vec<VirtualIpBody>,
}

#[derive(Debug, Deserialize)]
struct VirtualIpBody {
    address: String,
    #[serde(rename = "ipVersion")]
    ip_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobBody {
    #[serde(rename = "jobId")]
    job_id: String,
    status: String,
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
    response: Option<Value>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InstanceEnvelope {
    instance: InstanceBody,
}

#[derive(Debug, Deserialize)]
struct InstanceBody {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    hostname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageEnvelope {
    image: ImageBody,
}

#[derive(Debug, Deserialize)]
struct ImageBody {
    id: String,
    name: String,
    status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<ServiceBody> {
        let raw = json!([
            {
                "name": "cloudServersOpenStack",
                "type": "compute",
                "endpoints": [
                    { "region": "DFW", "publicURL": "https://dfw.servers.example/v2/123" },
                    { "region": "ORD", "publicURL": "https://ord.servers.example/v2/123/" }
                ]
            },
            {
                "name": "cloudDNS",
                "type": "rax:dns",
                "endpoints": [ { "publicURL": "https://dns.example/v1.0/123" } ]
            }
        ]);
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_select_endpoints_by_region() {
        let endpoints = select_endpoints(&catalog(), "ord");
        assert_eq!(
            endpoints.compute.as_deref(),
            Some("https://ord.servers.example/v2/123")
        );
        assert_eq!(endpoints.dns.as_deref(), Some("https://dns.example/v1.0/123"));
        assert!(endpoints.load_balancers.is_none());
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("errorcontainer"), "errorcontainer");
        assert_eq!(encode_path("error page.html"), "error%20page.html");
        assert_eq!(encode_path("a/b"), "a%2Fb");
        assert_eq!(encode_path("café~v1"), "caf%C3%A9~v1");
    }

    fn named(ids: std::ops::Range<u32>) -> Vec<NamedBody> {
        ids.map(|n| NamedBody {
            id: RawId::Number(u64::from(n)),
            name: format!("entry{n}"),
        })
        .collect()
    }

    #[test]
    fn test_collect_pages_follows_next_links() {
        let mut requested = Vec::new();
        let entries = collect_pages("https://api.example/images".to_string(), |url| {
            requested.push(url.to_string());
            Ok(match url {
                "https://api.example/images" => Page {
                    entries: named(0..2),
                    next: Some("https://api.example/images?marker=1".to_string()),
                },
                "https://api.example/images?marker=1" => Page {
                    entries: named(2..4),
                    next: Some("https://api.example/images?marker=3".to_string()),
                },
                _ => Page {
                    entries: named(4..5),
                    next: None,
                },
            })
        })
        .unwrap();

        assert_eq!(requested.len(), 3);
        let names: Vec<String> = entries.into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["entry0", "entry1", "entry2", "entry3", "entry4"]);
    }

    #[test]
    fn test_collect_pages_stops_on_empty_or_repeated_page() {
        let mut calls = 0;
        let entries = collect_pages("first".to_string(), |_| {
            calls += 1;
            Ok(Page {
                entries: named(0..1),
                next: Some("first".to_string()),
            })
        })
        .unwrap();
        assert_eq!((entries.len(), calls), (1, 1));

        let entries = collect_pages("first".to_string(), |_| {
            Ok(Page {
                entries: Vec::new(),
                next: Some("second".to_string()),
            })
        })
        .unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_collect_pages_propagates_errors() {
        let result = collect_pages("first".to_string(), |_| {
            Err(Error::http("boom".to_string(), Some(500)))
        });
        assert!(matches!(result, Err(Error::Http { status: Some(500), .. })));
    }

    #[test]
    fn test_page_from_links() {
        let page: ServerList = serde_json::from_value(json!({
            "servers": [ { "id": "a1", "name": "web1" } ],
            "servers_links": [
                { "rel": "self", "href": "https://api.example/servers" },
                { "rel": "next", "href": "https://api.example/servers?marker=a1" }
            ]
        }))
        .unwrap();
        let page = Page::linked(page.servers, &page.links);
        assert_eq!(page.next.as_deref(), Some("https://api.example/servers?marker=a1"));

        let last: LoadBalancerList =
            serde_json::from_value(json!({ "loadBalancers": [ { "id": 7, "name": "prod" } ] })).unwrap();
        assert!(Page::linked(last.load_balancers, &last.links).next.is_none());
    }

    #[test]
    fn test_dns_offsets() {
        assert_eq!(next_offset(0, 100, Some(250)), Some(100));
        assert_eq!(next_offset(200, 50, Some(250)), None);
        assert_eq!(next_offset(0, 100, Some(100)), None);
        assert_eq!(next_offset(0, 100, None), Some(100));
        assert_eq!(next_offset(100, 3, None), None);
        assert_eq!(next_offset(100, 0, Some(500)), None);
    }

    #[test]
    fn test_server_body_parsing() {
        let raw = json!({
            "server": {
                "id": "f3a1",
                "name": "web1",
                "status": "ACTIVE",
                "flavor": { "id": "2" },
                "image": "",
                "accessIPv4": "198.51.100.7",
                "addresses": {
                    "public": [
                        { "addr": "2001:db8::7", "version": 6 },
                        { "addr": "198.51.100.7", "version": 4 }
                    ],
                    "private": [ { "addr": "10.180.1.7", "version": 4 } ]
                }
            }
        });
        let envelope: ServerEnvelope = serde_json::from_value(raw).unwrap();
        let handle = RackspaceBackend::server_handle(envelope.server);
        assert_eq!(handle.status, "ACTIVE");
        assert_eq!(handle.attribute("flavor_id"), Some("2"));
        assert_eq!(handle.attribute("image_id"), None);
        assert_eq!(handle.private_address(), Some("10.180.1.7"));
        assert_eq!(handle.addresses_on("public").count(), 2);
    }

    #[test]
    fn test_load_balancer_numeric_id() {
        let raw = json!({
            "loadBalancer": {
                "id": 71,
                "name": "testlb",
                "status": "BUILD",
                "protocol": "HTTP",
                "port": 80,
                "virtualIps": [ { "address": "203.0.113.10", "type": "PUBLIC", "ipVersion": "IPV4" } ]
            }
        });
        let envelope: LoadBalancerEnvelope = serde_json::from_value(raw).unwrap();
        let handle = RackspaceBackend::load_balancer_handle(envelope.load_balancer);
        assert_eq!(handle.id, "71");
        assert_eq!(handle.addresses[0].addr, "203.0.113.10");
        assert_eq!(handle.addresses[0].version, Some(IpVersion::V4));
    }

    #[test]
    fn test_zone_job_response() {
        let raw = json!({
            "jobId": "852a1e4a",
            "status": "COMPLETED",
            "callbackUrl": "https://dns.example/v1.0/123/status/852a1e4a",
            "response": { "domains": [ { "id": 2725233, "name": "example.org" } ] }
        });
        let job: JobBody = serde_json::from_value(raw).unwrap();
        let handle = RackspaceBackend::job_handle(ResourceKind::DnsZone, "example.org", job);
        assert_eq!(handle.status, "COMPLETED");
        assert_eq!(handle.attribute("zone_id"), Some("2725233"));
    }
}
