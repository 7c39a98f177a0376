//! Server and load balancer scenarios.

use super::{BalancerRequest, Pipeline, PipelineState, ServerRequest, build_nodes};
use crate::report;
use cloudkit::catalog::zone_name_for_hostname;
use cloudkit::{
    CatalogKind, ContainerOptions, DnsRecord, Error, HealthMonitor, ResourceKind, Result,
};

/// Everything the full stack needs.
#[derive(Debug, Clone)]
pub struct StackRequest {
    pub servers: ServerRequest,
    pub balancer: BalancerRequest,
    /// Hostname the virtual IP is published under.
    pub fqdn: String,
    pub error_page: ErrorPage,
    /// Container the error page is backed up to. Must not exist yet.
    pub container: String,
}

/// Custom error page and the name it is backed up under.
#[derive(Debug, Clone)]
pub struct ErrorPage {
    pub file_name: String,
    pub content: String,
}

impl Pipeline<'_> {
    /// Create servers and wait for them.
    pub fn servers(&self, request: &ServerRequest) -> Result<PipelineState> {
        request.check()?;
        let validator = self.validator();
        let image = validator.resolve(CatalogKind::Image, &request.image)?;
        let flavor = validator.resolve(CatalogKind::Flavor, &request.flavor)?;

        let mut state = PipelineState::default();
        state.add_servers(self.create_servers(request, &image, &flavor)?);
        Ok(state)
    }

    /// Create servers, then a load balancer in front of them.
    pub fn cluster(&self, servers: &ServerRequest, balancer: &BalancerRequest) -> Result<PipelineState> {
        servers.check()?;
        let validator = self.validator();
        let image = validator.resolve(CatalogKind::Image, &servers.image)?;
        let flavor = validator.resolve(CatalogKind::Flavor, &servers.flavor)?;

        let mut state = PipelineState::default();
        state.add_servers(self.create_servers(servers, &image, &flavor)?);

        let nodes = build_nodes(state.servers(), balancer.node_port)?;
        state.record_load_balancer(self.create_load_balancer(balancer, nodes)?);
        Ok(state)
    }

    /// Servers, load balancer, health monitor, error page, DNS record and a
    /// backup of the error page in object storage.
    pub fn stack(&self, request: &StackRequest) -> Result<PipelineState> {
        request.servers.check()?;
        zone_name_for_hostname(&request.fqdn)?;
        let validator = self.validator();
        validator.ensure_container_absent(&request.container)?;
        let zone = validator.resolve_zone_for_hostname(&request.fqdn)?;
        let image = validator.resolve(CatalogKind::Image, &request.servers.image)?;
        let flavor = validator.resolve(CatalogKind::Flavor, &request.servers.flavor)?;

        let mut state = PipelineState::default();
        state.add_servers(self.create_servers(&request.servers, &image, &flavor)?);

        let nodes = build_nodes(state.servers(), request.balancer.node_port)?;
        let lb = self.create_load_balancer(&request.balancer, nodes)?;

        let monitor = HealthMonitor::http_default();
        let lb = self.update_load_balancer(&lb, "HTTP health monitor", |p, lb| {
            p.set_health_monitor(lb, &monitor)
        })?;
        let lb = self.update_load_balancer(&lb, "custom error page", |p, lb| {
            p.set_error_page(lb, &request.error_page.content)
        })?;
        state.record_load_balancer(lb);

        let vip = state
            .load_balancer()
            .and_then(report::virtual_ip)
            .ok_or_else(|| {
                Error::InvalidResponse(format!("load balancer {} has no virtual IP", request.balancer.name))
            })?
            .to_string();
        state.records.push(self.add_record(&zone, &DnsRecord::a(&request.fqdn, vip))?);
        state.record_zone(zone);

        log::info!(
            "Backing up {} to container {}",
            request.error_page.file_name,
            request.container
        );
        self.provider
            .create_container(&request.container, &ContainerOptions::default())?;
        let object = self.provider.store_object(
            &request.container,
            &request.error_page.file_name,
            request.error_page.content.as_bytes(),
        )?;
        state.objects.push(object);

        Ok(state)
    }

    /// Create servers and add them to an existing load balancer.
    pub fn grow(&self, servers: &ServerRequest, load_balancer: &str, node_port: u16) -> Result<PipelineState> {
        servers.check()?;
        let validator = self.validator();
        let entry = validator.resolve(CatalogKind::LoadBalancer, load_balancer)?;
        let image = validator.resolve(CatalogKind::Image, &servers.image)?;
        let flavor = validator.resolve(CatalogKind::Flavor, &servers.flavor)?;
        let lb = self.provider.fetch(ResourceKind::LoadBalancer, &entry.id)?;

        let mut state = PipelineState::default();
        state.add_servers(self.create_servers(servers, &image, &flavor)?);

        let nodes = build_nodes(state.servers(), node_port)?;
        let lb = self.update_load_balancer(&lb, "adding nodes", |p, lb| p.attach_nodes(lb, &nodes))?;
        state.record_load_balancer(lb);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{INTERVAL, balancer, servers, with_pipeline};
    use super::*;
    use cloudkit::backend::{CatalogLookup, MockCall};
    use cloudkit::{CatalogEntry, IpVersion, MockBackend, NetworkAddress, ResourceHandle, ResourceSpec, VirtualIpType};
    use std::time::Duration;

    fn stack_request() -> StackRequest {
        StackRequest {
            servers: servers(2),
            balancer: balancer(),
            fqdn: "www.example.com".to_string(),
            error_page: ErrorPage {
                file_name: "error.html".to_string(),
                content: "<html><body>We are testing, back soon</body></html>\n".to_string(),
            },
            container: "errorcontainer".to_string(),
        }
    }

    fn creates(mock: &MockBackend) -> Vec<ResourceSpec> {
        mock.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Create(spec) => Some(spec),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_servers_are_created_with_key() {
        let mock = MockBackend::with_sample_catalog();
        let (state, _) = with_pipeline(&mock, |p| p.servers(&servers(3)));
        let state = state.unwrap();

        assert_eq!(state.servers().len(), 3);
        for spec in creates(&mock) {
            match spec {
                ResourceSpec::Server(s) => {
                    assert_eq!(s.files[0].path, "/root/.ssh/authorized_keys");
                    assert_eq!(s.flavor_id, "2");
                }
                other => panic!("unexpected create: {other:?}"),
            }
        }
        assert!(state.servers().iter().all(|s| s.admin_password.is_some()));
    }

    #[test]
    fn test_two_server_cluster_round_trip() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("web1", &["BUILD", "ACTIVE"]);
        mock.script("web2", &["BUILD", "ACTIVE"]);
        mock.set_addresses(
            "web1",
            vec![
                NetworkAddress::new("public", "198.51.100.11", Some(IpVersion::V4)),
                NetworkAddress::new("private", "10.180.1.11", Some(IpVersion::V4)),
            ],
        );
        mock.set_addresses(
            "web2",
            vec![
                NetworkAddress::new("public", "198.51.100.12", Some(IpVersion::V4)),
                NetworkAddress::new("private", "10.180.1.12", Some(IpVersion::V4)),
            ],
        );
        mock.script("testlb", &["ACTIVE"]);

        let (state, clock) = with_pipeline(&mock, |p| p.cluster(&servers(2), &balancer()));
        let state = state.unwrap();

        // Two rounds for the servers, one for the load balancer.
        assert_eq!(clock.elapsed(), INTERVAL * 3);
        let lb_spec = creates(&mock)
            .into_iter()
            .find_map(|s| match s {
                ResourceSpec::LoadBalancer(lb) => Some(lb),
                _ => None,
            })
            .unwrap();
        let addresses: Vec<&str> = lb_spec.nodes.iter().map(|n| n.address.as_str()).collect();
        assert_eq!(addresses, vec!["10.180.1.11", "10.180.1.12"]);
        for (node, server) in lb_spec.nodes.iter().zip(state.servers()) {
            assert_eq!(Some(node.address.as_str()), server.private_address());
        }
        assert_eq!(state.load_balancer().unwrap().status, "ACTIVE");
    }

    #[test]
    fn test_servers_converge_in_two_rounds() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("web1", &["BUILD", "ACTIVE"]);
        mock.script("web2", &["BUILD", "ACTIVE"]);

        let (state, clock) = with_pipeline(&mock, |p| p.servers(&servers(2)));

        assert_eq!(state.unwrap().servers().len(), 2);
        assert_eq!(clock.sleeps(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_unknown_flavor_creates_nothing() {
        let mock = MockBackend::with_sample_catalog();
        mock.set_catalog(
            CatalogKind::Flavor,
            vec![CatalogEntry::new("1", "512MB"), CatalogEntry::new("2", "1GB")],
        );
        let mut request = servers(2);
        request.flavor = "99".to_string();

        let (result, _) = with_pipeline(&mock, |p| p.cluster(&request, &balancer()));

        match result {
            Err(Error::NotFound { alternatives, .. }) => {
                assert_eq!(
                    alternatives,
                    vec![CatalogEntry::new("1", "512MB"), CatalogEntry::new("2", "1GB")]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mock.create_count(), 0);
    }

    #[test]
    fn test_server_failure_stops_before_load_balancer() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("web1", &["BUILD", "ERROR"]);

        let (result, _) = with_pipeline(&mock, |p| p.cluster(&servers(2), &balancer()));

        assert!(matches!(result, Err(Error::UnexpectedState { .. })));
        assert!(creates(&mock).iter().all(|s| matches!(s, ResourceSpec::Server(_))));
    }

    #[test]
    fn test_private_virtual_ip() {
        let mock = MockBackend::with_sample_catalog();
        let mut request = balancer();
        request.virtual_ip = VirtualIpType::ServiceNet;

        let (result, _) = with_pipeline(&mock, |p| p.cluster(&servers(1), &request));
        result.unwrap();

        assert!(creates(&mock).iter().any(|s| matches!(
            s,
            ResourceSpec::LoadBalancer(lb) if lb.virtual_ip == VirtualIpType::ServiceNet
        )));
    }

    #[test]
    fn test_zero_servers_rejected() {
        let mock = MockBackend::with_sample_catalog();
        let (result, _) = with_pipeline(&mock, |p| p.servers(&servers(0)));
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_stack_end_to_end() {
        let mock = MockBackend::with_sample_catalog();
        let request = stack_request();

        let (state, _) = with_pipeline(&mock, |p| p.stack(&request));
        let state = state.unwrap();

        let calls = mock.calls();
        let monitor = calls
            .iter()
            .find_map(|c| match c {
                MockCall::SetHealthMonitor { monitor, .. } => Some(monitor.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(monitor, HealthMonitor::http_default());

        let record = calls
            .iter()
            .find_map(|c| match c {
                MockCall::AddDnsRecord { zone, record } => Some((zone.clone(), record.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(record.0, "3301");
        assert_eq!(record.1.record_type, "A");
        assert_eq!(record.1.name, "www.example.com");
        assert_eq!(record.1.ttl, 300);
        assert_eq!(
            Some(record.1.data.as_str()),
            state.load_balancer().and_then(report::virtual_ip)
        );

        assert_eq!(state.objects().len(), 1);
        assert_eq!(state.records()[0].status, "COMPLETED");
        assert_eq!(
            mock.list(CatalogKind::Container).unwrap(),
            vec![CatalogEntry::new("errorcontainer", "errorcontainer")]
        );
    }

    #[test]
    fn test_error_page_parity() {
        let mock = MockBackend::with_sample_catalog();
        let request = stack_request();

        let (result, _) = with_pipeline(&mock, |p| p.stack(&request));
        result.unwrap();

        let calls = mock.calls();
        let page = calls
            .iter()
            .find_map(|c| match c {
                MockCall::SetErrorPage { content, .. } => Some(content.clone()),
                _ => None,
            })
            .unwrap();
        let (name, body) = calls
            .iter()
            .find_map(|c| match c {
                MockCall::StoreObject { name, body, .. } => Some((name.clone(), body.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(name, "error.html");
        assert_eq!(page.as_bytes(), body.as_slice());
    }

    #[test]
    fn test_stack_waits_after_each_load_balancer_update() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("testlb", &["BUILD", "ACTIVE"]);

        let (result, _) = with_pipeline(&mock, |p| p.stack(&stack_request()));
        result.unwrap();

        let calls = mock.calls();
        let position = |pred: &dyn Fn(&MockCall) -> bool| calls.iter().position(|c| pred(c)).unwrap();
        let monitor = position(&|c| matches!(c, MockCall::SetHealthMonitor { .. }));
        let page = position(&|c| matches!(c, MockCall::SetErrorPage { .. }));
        let lb_fetches_between = calls[monitor..page]
            .iter()
            .filter(|c| matches!(c, MockCall::Fetch { kind: ResourceKind::LoadBalancer, .. }))
            .count();
        assert_eq!(lb_fetches_between, 1);
        let record = position(&|c| matches!(c, MockCall::AddDnsRecord { .. }));
        assert!(page < record);
    }

    #[test]
    fn test_stack_sees_each_update_pending_before_active() {
        let mock = MockBackend::with_sample_catalog();

        let (result, clock) = with_pipeline(&mock, |p| p.stack(&stack_request()));
        let state = result.unwrap();

        // One round each for servers, load balancer and DNS job; two per update.
        assert_eq!(clock.sleeps(), 7);
        assert_eq!(mock.fetch_count("testlb"), 5);
        assert_eq!(state.load_balancer().unwrap().status, "ACTIVE");
    }

    #[test]
    fn test_stack_load_balancer_error_during_update() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("testlb", &["ACTIVE", "PENDING_UPDATE", "ERROR"]);

        let (result, clock) = with_pipeline(&mock, |p| p.stack(&stack_request()));

        match result {
            Err(Error::UnexpectedState { kind, name, status, .. }) => {
                assert_eq!(kind, ResourceKind::LoadBalancer);
                assert_eq!(name, "testlb");
                assert_eq!(status, "ERROR");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(clock.sleeps(), 4);
        let calls = mock.calls();
        assert!(calls.iter().any(|c| matches!(c, MockCall::SetHealthMonitor { .. })));
        assert!(!calls.iter().any(|c| matches!(c, MockCall::SetErrorPage { .. })));
        assert!(!calls.iter().any(|c| matches!(c, MockCall::AddDnsRecord { .. })));
    }

    #[test]
    fn test_existing_container_halts_stack() {
        let mock = MockBackend::with_sample_catalog();
        mock.set_catalog(
            CatalogKind::Container,
            vec![CatalogEntry::new("errorcontainer", "errorcontainer")],
        );

        let (result, _) = with_pipeline(&mock, |p| p.stack(&stack_request()));

        assert!(matches!(result, Err(Error::AlreadyExists { .. })));
        assert_eq!(mock.create_count(), 0);
    }

    #[test]
    fn test_stack_bad_hostname_makes_no_calls() {
        let mock = MockBackend::with_sample_catalog();
        let mut request = stack_request();
        request.fqdn = "example.com".to_string();

        let (result, _) = with_pipeline(&mock, |p| p.stack(&request));

        assert!(matches!(result, Err(Error::InvalidHostname { .. })));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_stack_missing_zone() {
        let mock = MockBackend::with_sample_catalog();
        let mut request = stack_request();
        request.fqdn = "www.example.net".to_string();

        let (result, _) = with_pipeline(&mock, |p| p.stack(&request));

        match result {
            Err(Error::NotFound { kind, alternatives, .. }) => {
                assert_eq!(kind, CatalogKind::Zone);
                assert_eq!(alternatives, vec![CatalogEntry::new("3301", "example.com")]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mock.create_count(), 0);
    }

    #[test]
    fn test_grow_attaches_new_nodes() {
        let mock = MockBackend::with_sample_catalog();
        let mut lb = ResourceHandle::new(ResourceKind::LoadBalancer, "lb-77", "prod", "ACTIVE");
        lb.addresses
            .push(NetworkAddress::new("vip", "203.0.113.77", Some(IpVersion::V4)));
        mock.insert_resource(lb);
        mock.set_catalog(CatalogKind::LoadBalancer, vec![CatalogEntry::new("lb-77", "prod")]);

        let (state, _) = with_pipeline(&mock, |p| p.grow(&servers(2), "prod", 8080));
        let state = state.unwrap();

        let attached = mock
            .calls()
            .into_iter()
            .find_map(|c| match c {
                MockCall::AttachNodes { load_balancer, nodes } => Some((load_balancer, nodes)),
                _ => None,
            })
            .unwrap();
        assert_eq!(attached.0, "lb-77");
        assert_eq!(attached.1.len(), 2);
        assert_eq!(
            Some(attached.1[0].address.as_str()),
            state.servers()[0].private_address()
        );
        assert_eq!(state.load_balancer().unwrap().status, "ACTIVE");
    }

    #[test]
    fn test_grow_unknown_load_balancer() {
        let mock = MockBackend::with_sample_catalog();
        mock.set_catalog(CatalogKind::LoadBalancer, vec![]);

        let (result, _) = with_pipeline(&mock, |p| p.grow(&servers(1), "prod", 80));

        assert!(matches!(result, Err(Error::NotFound { kind: CatalogKind::LoadBalancer, .. })));
        assert_eq!(mock.create_count(), 0);
    }
}
