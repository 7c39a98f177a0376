//! Single-server scenarios: cloning an existing server and booting a named host.

use super::{Pipeline, PipelineState};
use crate::report;
use cloudkit::wait::{Batch, await_batch, poll_until};
use cloudkit::{
    CatalogKind, DnsRecord, Error, MatchField, ResourceHandle, ResourceKind, ResourceSpec, Result,
    ServerSpec, StatusVocabulary,
};
use std::time::Duration;
use uuid::Uuid;

/// How the source server of a clone is referenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerRef {
    Name(String),
    Id(String),
}

#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub source: ServerRef,
    /// Name of the new server.
    pub destination: String,
    /// Remove the intermediate image once the clone is up.
    pub delete_image: bool,
}

/// A single server published under its own hostname.
#[derive(Debug, Clone)]
pub struct HostRequest {
    pub fqdn: String,
    pub image: String,
    pub flavor: String,
    pub public_key: Option<Vec<u8>>,
    /// Ceiling for the server build. Unbounded when absent.
    pub timeout: Option<Duration>,
}

/// Eight random base36 characters.
pub fn random_suffix() -> String {
    let mut n = Uuid::new_v4().as_u128();
    (0..8)
        .map(|_| {
            let digit = (n % 36) as u32;
            n /= 36;
            char::from_digit(digit, 36).unwrap_or('0')
        })
        .collect()
}

impl Pipeline<'_> {
    /// Snapshot a server and boot a copy of it.
    ///
    /// The copy gets the source's flavor. `suffix` is called until the image
    /// name `<source>.<suffix>` is not taken.
    pub fn clone_server(&self, request: &CloneRequest, mut suffix: impl FnMut() -> String) -> Result<PipelineState> {
        let validator = self.validator();
        let entry = match &request.source {
            ServerRef::Name(name) => validator.resolve_by(CatalogKind::Server, MatchField::Name, name)?,
            ServerRef::Id(id) => validator.resolve_by(CatalogKind::Server, MatchField::Id, id)?,
        };
        let source = self.provider.fetch(ResourceKind::Server, &entry.id)?;
        let flavor = source
            .attribute("flavor_id")
            .ok_or_else(|| Error::InvalidResponse(format!("server {} has no flavor", source.name)))?
            .to_string();

        let images = self.provider.list(CatalogKind::Image)?;
        let image_name = loop {
            let candidate = format!("{}.{}", source.name, suffix());
            if !images.iter().any(|i| i.name == candidate) {
                break candidate;
            }
            log::debug!("Image name {} is taken, trying another", candidate);
        };

        log::info!("Saving {} as image {}", source.name, image_name);
        let image = self.provider.create(&ResourceSpec::Image {
            server_id: source.id.clone(),
            name: image_name,
        })?;
        let image = self.converge_one(image, &StatusVocabulary::IMAGE)?;

        let spec = ResourceSpec::Server(ServerSpec::new(&request.destination, image.id.as_str(), flavor));
        log::info!("Creating server {} from {}", request.destination, image.name);
        let server = self.provider.create(&spec)?;
        let mut server = self.converge_one(server, &StatusVocabulary::BUILD)?;
        self.await_public_ipv4(&mut server)?;

        let mut state = PipelineState::default();
        state.add_servers([server]);
        if request.delete_image {
            log::info!("Deleting image {}", image.name);
            self.provider.delete(&image)?;
        } else {
            state.images.push(image);
        }
        Ok(state)
    }

    /// Boot one server named after `fqdn` and point an A record at it.
    pub fn host(&self, request: &HostRequest) -> Result<PipelineState> {
        let validator = self.validator();
        let zone = validator.resolve_zone_for_hostname(&request.fqdn)?;
        let flavor = validator.resolve(CatalogKind::Flavor, &request.flavor)?;
        let image = validator.resolve(CatalogKind::Image, &request.image)?;

        let mut spec = ServerSpec::new(&request.fqdn, image.id.as_str(), flavor.id.as_str());
        if let Some(key) = &request.public_key {
            spec = spec.with_authorized_key(key);
        }
        log::info!("Creating server {}", request.fqdn);
        let server = self.provider.create(&ResourceSpec::Server(spec))?;

        let options = match request.timeout {
            Some(timeout) => self.wait.max_wait(timeout),
            None => self.wait,
        };
        let batch = await_batch(
            self.provider,
            Batch::single(server),
            &options,
            &StatusVocabulary::BUILD,
            self.clock,
            self.observer,
        )?;
        let mut server = batch.into_handles().swap_remove(0);
        self.await_public_ipv4(&mut server)?;

        let address = report::public_addresses(&server)
            .ipv4
            .ok_or_else(|| Error::InvalidResponse(format!("server {} has no public IPv4 address", server.name)))?;

        let mut state = PipelineState::default();
        state.records.push(self.add_record(&zone, &DnsRecord::a(&request.fqdn, address))?);
        state.record_zone(zone);
        state.add_servers([server]);
        Ok(state)
    }

    fn await_public_ipv4(&self, server: &mut ResourceHandle) -> Result<()> {
        let rounds = poll_until(self.provider, server, &self.wait, self.clock, |s| {
            report::public_addresses(s).ipv4.is_some()
        })?;
        if rounds > 0 {
            log::debug!("Public address of {} appeared after {} round(s)", server.name, rounds);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{INTERVAL, with_pipeline};
    use super::*;
    use cloudkit::backend::MockCall;
    use cloudkit::wait::{ManualClock, NoObserver, WaitOptions};
    use cloudkit::{CatalogEntry, IpVersion, MockBackend, NetworkAddress};

    fn with_source() -> MockBackend {
        let mock = MockBackend::with_sample_catalog();
        let mut source = ResourceHandle::new(ResourceKind::Server, "src-9", "app", "ACTIVE");
        source.attributes.insert("flavor_id".to_string(), "1".to_string());
        mock.insert_resource(source);
        mock.set_catalog(CatalogKind::Server, vec![CatalogEntry::new("src-9", "app")]);
        mock
    }

    fn request(source: ServerRef) -> CloneRequest {
        CloneRequest {
            source,
            destination: "app-copy".to_string(),
            delete_image: false,
        }
    }

    fn host_request() -> HostRequest {
        HostRequest {
            fqdn: "www.example.com".to_string(),
            image: "5cebb13a-f783-4f8c-8058-c4182c724ccd".to_string(),
            flavor: "1".to_string(),
            public_key: None,
            timeout: None,
        }
    }

    #[test]
    fn test_random_suffix_shape() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(random_suffix(), random_suffix());
    }

    #[test]
    fn test_clone_by_name_keeps_flavor() {
        let mock = with_source();
        mock.script("app-copy", &["BUILD", "ACTIVE"]);

        let (state, _) = with_pipeline(&mock, |p| {
            p.clone_server(&request(ServerRef::Name("app".to_string())), || "abc12345".to_string())
        });
        let state = state.unwrap();

        let specs: Vec<ResourceSpec> = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Create(spec) => Some(spec),
                _ => None,
            })
            .collect();
        assert_eq!(
            specs[0],
            ResourceSpec::Image {
                server_id: "src-9".to_string(),
                name: "app.abc12345".to_string(),
            }
        );
        match &specs[1] {
            ResourceSpec::Server(s) => {
                assert_eq!(s.name, "app-copy");
                assert_eq!(s.flavor_id, "1");
                assert_eq!(Some(s.image_id.as_str()), state.images().first().map(|i| i.id.as_str()));
            }
            other => panic!("unexpected create: {other:?}"),
        }
        assert_eq!(state.images()[0].status, "ACTIVE");
        assert!(report::public_addresses(&state.servers()[0]).ipv4.is_some());
    }

    #[test]
    fn test_clone_by_id() {
        let mock = with_source();
        let (state, _) = with_pipeline(&mock, |p| {
            p.clone_server(&request(ServerRef::Id("src-9".to_string())), random_suffix)
        });
        assert_eq!(state.unwrap().servers()[0].name, "app-copy");
    }

    #[test]
    fn test_clone_unknown_source() {
        let mock = with_source();
        let (result, _) = with_pipeline(&mock, |p| {
            p.clone_server(&request(ServerRef::Name("db".to_string())), random_suffix)
        });

        match result {
            Err(Error::NotFound { kind, alternatives, .. }) => {
                assert_eq!(kind, CatalogKind::Server);
                assert_eq!(alternatives, vec![CatalogEntry::new("src-9", "app")]);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(mock.create_count(), 0);
    }

    #[test]
    fn test_clone_regenerates_taken_image_name() {
        let mock = with_source();
        mock.set_catalog(CatalogKind::Image, vec![CatalogEntry::new("img-1", "app.aaaaaaaa")]);
        let mut suffixes = vec!["bbbbbbbb", "aaaaaaaa"];

        let (state, _) = with_pipeline(&mock, |p| {
            p.clone_server(&request(ServerRef::Name("app".to_string())), || {
                suffixes.pop().unwrap_or("cccccccc").to_string()
            })
        });

        assert_eq!(state.unwrap().images()[0].name, "app.bbbbbbbb");
    }

    #[test]
    fn test_clone_delete_image() {
        let mock = with_source();
        let mut req = request(ServerRef::Name("app".to_string()));
        req.delete_image = true;

        let (state, _) = with_pipeline(&mock, |p| p.clone_server(&req, random_suffix));

        assert!(state.unwrap().images().is_empty());
        assert!(mock.calls().iter().any(|c| matches!(
            c,
            MockCall::Delete { kind: ResourceKind::Image, .. }
        )));
    }

    #[test]
    fn test_clone_image_failure() {
        let mock = with_source();
        mock.script("app.abc12345", &["SAVING", "ERROR"]);

        let (result, _) = with_pipeline(&mock, |p| {
            p.clone_server(&request(ServerRef::Name("app".to_string())), || "abc12345".to_string())
        });

        assert!(matches!(result, Err(Error::UnexpectedState { kind: ResourceKind::Image, .. })));
        assert_eq!(mock.create_count(), 1);
    }

    #[test]
    fn test_clone_gives_up_without_public_address() {
        let mock = with_source();
        mock.set_addresses(
            "app-copy",
            vec![NetworkAddress::new("private", "10.0.0.9", Some(IpVersion::V4))],
        );

        let clock = ManualClock::new();
        let options = WaitOptions::with_interval(INTERVAL).max_wait(Duration::from_secs(10));
        let pipeline = Pipeline::new(&mock, options, &clock, &NoObserver);
        let result = pipeline.clone_server(&request(ServerRef::Name("app".to_string())), random_suffix);

        match result {
            Err(Error::Timeout { kind, name, .. }) => {
                assert_eq!(kind, ResourceKind::Server);
                assert_eq!(name, "app-copy");
            }
            other => panic!("unexpected: {other:?}"),
        }
        // One round each for the image and the server, two for the address.
        assert_eq!(clock.sleeps(), 4);
    }

    #[test]
    fn test_host_publishes_a_record() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("www.example.com", &["BUILD", "BUILD", "ACTIVE"]);

        let (state, clock) = with_pipeline(&mock, |p| p.host(&host_request()));
        let state = state.unwrap();

        assert_eq!(state.servers()[0].name, "www.example.com");
        let record = mock
            .calls()
            .into_iter()
            .find_map(|c| match c {
                MockCall::AddDnsRecord { record, .. } => Some(record),
                _ => None,
            })
            .unwrap();
        assert_eq!(record.record_type, "A");
        assert_eq!(
            Some(record.data),
            report::public_addresses(&state.servers()[0]).ipv4
        );
        // Three build rounds, one for the DNS job.
        assert_eq!(clock.elapsed(), INTERVAL * 4);
    }

    #[test]
    fn test_host_timeout() {
        let mock = MockBackend::with_sample_catalog();
        mock.script("www.example.com", &["BUILD"]);
        let mut req = host_request();
        req.timeout = Some(Duration::from_secs(20));

        let clock = ManualClock::new();
        let pipeline = Pipeline::new(&mock, WaitOptions::with_interval(INTERVAL), &clock, &NoObserver);
        let result = pipeline.host(&req);

        match result {
            Err(Error::Timeout { waited, .. }) => assert_eq!(waited, Duration::from_secs(20)),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(clock.sleeps(), 4);
        assert!(!mock.calls().iter().any(|c| matches!(c, MockCall::AddDnsRecord { .. })));
    }

    #[test]
    fn test_host_invalid_hostname() {
        let mock = MockBackend::with_sample_catalog();
        let mut req = host_request();
        req.fqdn = "localhost".to_string();

        let (result, _) = with_pipeline(&mock, |p| p.host(&req));

        assert!(matches!(result, Err(Error::InvalidHostname { .. })));
        assert!(mock.calls().is_empty());
    }
}
