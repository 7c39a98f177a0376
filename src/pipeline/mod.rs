//! Provisioning pipelines.
//!
//! Every scenario is a straight line: validate all references, then create
//! resources one step at a time, waiting for each step's batch to converge
//! before the next step reads its outputs. Nothing is retried and nothing
//! is rolled back; an error leaves whatever was already created in place.

pub mod clone;
pub mod compute;
pub mod database;
pub mod dns;
pub mod storage;

use cloudkit::backend::Provider;
use cloudkit::catalog::CatalogValidator;
use cloudkit::wait::{Batch, Clock, WaitObserver, WaitOptions, await_batch};
use cloudkit::{
    CatalogEntry, DnsRecord, Error, LoadBalancerSpec, NodeSpec, ResourceHandle, ResourceSpec,
    Result, ServerSpec, StatusVocabulary, VirtualIpType,
};
use std::fs;
use std::path::Path;

// ============================================================================
// Pipeline state
// ============================================================================

/// Outputs of completed steps.
///
/// Steps only ever add to the state. A later step reads what an earlier one
/// recorded; nothing is overwritten.
#[derive(Debug, Default)]
pub struct PipelineState {
    servers: Vec<ResourceHandle>,
    load_balancer: Option<ResourceHandle>,
    zone: Option<CatalogEntry>,
    records: Vec<ResourceHandle>,
    images: Vec<ResourceHandle>,
    databases: Vec<ResourceHandle>,
    objects: Vec<ResourceHandle>,
    cdn_uri: Option<String>,
}

impl PipelineState {
    pub fn servers(&self) -> &[ResourceHandle] {
        &self.servers
    }

    pub fn load_balancer(&self) -> Option<&ResourceHandle> {
        self.load_balancer.as_ref()
    }

    pub fn zone(&self) -> Option<&CatalogEntry> {
        self.zone.as_ref()
    }

    pub fn records(&self) -> &[ResourceHandle] {
        &self.records
    }

    pub fn images(&self) -> &[ResourceHandle] {
        &self.images
    }

    pub fn databases(&self) -> &[ResourceHandle] {
        &self.databases
    }

    pub fn objects(&self) -> &[ResourceHandle] {
        &self.objects
    }

    pub fn cdn_uri(&self) -> Option<&str> {
        self.cdn_uri.as_deref()
    }

    fn add_servers(&mut self, servers: impl IntoIterator<Item = ResourceHandle>) {
        self.servers.extend(servers);
    }

    fn record_load_balancer(&mut self, lb: ResourceHandle) {
        debug_assert!(self.load_balancer.is_none(), "load balancer recorded twice");
        self.load_balancer = Some(lb);
    }

    fn record_zone(&mut self, zone: CatalogEntry) {
        debug_assert!(self.zone.is_none(), "zone recorded twice");
        self.zone = Some(zone);
    }

    fn record_cdn_uri(&mut self, uri: String) {
        debug_assert!(self.cdn_uri.is_none(), "CDN URI recorded twice");
        self.cdn_uri = Some(uri);
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A set of identically configured servers named `<base_name><n>`.
#[derive(Debug, Clone)]
pub struct ServerRequest {
    pub base_name: String,
    pub count: usize,
    pub image: String,
    pub flavor: String,
    /// Installed as root's authorized_keys when present.
    pub public_key: Option<Vec<u8>>,
}

impl ServerRequest {
    /// Server names, numbered from 1.
    pub fn names(&self) -> Vec<String> {
        (1..=self.count).map(|i| format!("{}{}", self.base_name, i)).collect()
    }

    fn check(&self) -> Result<()> {
        if self.count == 0 {
            return Err(Error::InvalidInput("server count must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BalancerRequest {
    pub name: String,
    pub port: u16,
    pub node_port: u16,
    pub protocol: String,
    pub virtual_ip: VirtualIpType,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs scenarios against a provider.
///
/// Holds the provider and everything a wait needs. Built once per command
/// and passed the settings explicitly.
pub struct Pipeline<'a> {
    provider: &'a dyn Provider,
    wait: WaitOptions,
    clock: &'a dyn Clock,
    observer: &'a dyn WaitObserver,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        provider: &'a dyn Provider,
        wait: WaitOptions,
        clock: &'a dyn Clock,
        observer: &'a dyn WaitObserver,
    ) -> Self {
        Self {
            provider,
            wait,
            clock,
            observer,
        }
    }

    fn validator(&self) -> CatalogValidator<'a, dyn Provider + 'a> {
        CatalogValidator::new(self.provider)
    }

    /// Issue one create per spec, in order.
    fn create_batch(&self, specs: &[ResourceSpec]) -> Result<Batch> {
        let mut handles = Vec::with_capacity(specs.len());
        for spec in specs {
            log::info!("Creating {} {}", spec.kind(), spec.name());
            handles.push(self.provider.create(spec)?);
        }
        Ok(Batch::new(handles))
    }

    fn converge(&self, batch: Batch, vocabulary: &StatusVocabulary) -> Result<Batch> {
        let batch = await_batch(
            self.provider,
            batch,
            &self.wait,
            vocabulary,
            self.clock,
            self.observer,
        )?;
        log::info!("{} resource(s) ready after {} round(s)", batch.len(), batch.rounds());
        Ok(batch)
    }

    fn converge_one(&self, handle: ResourceHandle, vocabulary: &StatusVocabulary) -> Result<ResourceHandle> {
        let mut handles = self.converge(Batch::single(handle), vocabulary)?.into_handles();
        Ok(handles.swap_remove(0))
    }

    /// Create the requested servers and wait for all of them.
    fn create_servers(
        &self,
        request: &ServerRequest,
        image: &CatalogEntry,
        flavor: &CatalogEntry,
    ) -> Result<Vec<ResourceHandle>> {
        let specs: Vec<ResourceSpec> = request
            .names()
            .into_iter()
            .map(|name| {
                let spec = ServerSpec::new(name, image.id.as_str(), flavor.id.as_str());
                match &request.public_key {
                    Some(key) => ResourceSpec::Server(spec.with_authorized_key(key)),
                    None => ResourceSpec::Server(spec),
                }
            })
            .collect();
        let batch = self.create_batch(&specs)?;
        Ok(self.converge(batch, &StatusVocabulary::BUILD)?.into_handles())
    }

    fn create_load_balancer(&self, request: &BalancerRequest, nodes: Vec<NodeSpec>) -> Result<ResourceHandle> {
        let spec = ResourceSpec::LoadBalancer(LoadBalancerSpec {
            name: request.name.clone(),
            port: request.port,
            protocol: request.protocol.clone(),
            nodes,
            virtual_ip: request.virtual_ip,
        });
        let lb = self.provider.create(&spec)?;
        self.converge_one(lb, &StatusVocabulary::LOAD_BALANCER)
    }

    /// Apply a configuration change and wait for the load balancer to settle.
    fn update_load_balancer<F>(&self, lb: &ResourceHandle, change: &str, apply: F) -> Result<ResourceHandle>
    where
        F: FnOnce(&dyn Provider, &ResourceHandle) -> Result<()>,
    {
        log::info!("Updating load balancer {}: {}", lb.name, change);
        apply(self.provider, lb)?;
        self.converge_one(lb.clone(), &StatusVocabulary::LOAD_BALANCER_UPDATE)
    }

    /// Add a record and wait for the DNS job to complete.
    fn add_record(&self, zone: &CatalogEntry, record: &DnsRecord) -> Result<ResourceHandle> {
        log::info!(
            "Adding {} record {} -> {} to zone {}",
            record.record_type,
            record.name,
            record.data,
            zone.name
        );
        let job = self.provider.add_dns_record(zone, record)?;
        self.converge_one(job, &StatusVocabulary::DNS_JOB)
    }
}

/// Load balancer nodes from the private addresses of converged servers.
pub fn build_nodes(servers: &[ResourceHandle], port: u16) -> Result<Vec<NodeSpec>> {
    servers
        .iter()
        .map(|server| {
            let address = server.private_address().ok_or_else(|| {
                Error::InvalidResponse(format!("server {} has no private address", server.name))
            })?;
            Ok(NodeSpec {
                address: address.to_string(),
                port,
                enabled: true,
            })
        })
        .collect()
}

/// Read a local input file.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::input_file(path, e))
}

/// Read a local input file that must be UTF-8 text.
///
/// Load balancer error pages travel as a JSON string, so raw bytes cannot
/// be sent. Anything that is not valid UTF-8 fails with
/// [`Error::InputFile`] before any request is made.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::input_file(path, e))
}


#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit::{IpVersion, NetworkAddress, ResourceKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_server_names() {
        let request = testing::servers(3);
        assert_eq!(request.names(), vec!["web1", "web2", "web3"]);
    }

    #[test]
    fn test_build_nodes_uses_private_addresses() {
        let mut a = ResourceHandle::new(ResourceKind::Server, "1", "web1", "ACTIVE");
        a.addresses
            .push(NetworkAddress::new("public", "198.51.100.1", Some(IpVersion::V4)));
        a.addresses
            .push(NetworkAddress::new("private", "10.0.0.1", Some(IpVersion::V4)));
        let mut b = ResourceHandle::new(ResourceKind::Server, "2", "web2", "ACTIVE");
        b.addresses
            .push(NetworkAddress::new("private", "10.0.0.2", Some(IpVersion::V4)));

        let nodes = build_nodes(&[a, b], 8080).unwrap();

        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].address, "10.0.0.1");
        assert_eq!(nodes[1].address, "10.0.0.2");
        assert!(nodes.iter().all(|n| n.port == 8080 && n.enabled));
    }

    #[test]
    fn test_build_nodes_without_private_address() {
        let server = ResourceHandle::new(ResourceKind::Server, "1", "web1", "ACTIVE");
        assert!(matches!(
            build_nodes(&[server], 80),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_read_input_missing_file() {
        match read_input(Path::new("/nonexistent/id_rsa.pub")) {
            Err(Error::InputFile { path, .. }) => {
                assert_eq!(path, Path::new("/nonexistent/id_rsa.pub"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_read_text() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "<html>down</html>").unwrap();
        assert_eq!(read_text(file.path()).unwrap(), "<html>down</html>");
    }

    #[test]
    fn test_read_text_rejects_binary() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(read_text(file.path()), Err(Error::InputFile { .. })));
    }
}
