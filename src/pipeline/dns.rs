//! DNS record scenario.

use super::{Pipeline, PipelineState};
use cloudkit::catalog::zone_name_for_hostname;
use cloudkit::{CatalogKind, DnsRecord, Error, MatchField, ResourceSpec, Result, StatusVocabulary};
use std::net::IpAddr;

/// A record pointing `fqdn` at `address`.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    pub fqdn: String,
    pub address: IpAddr,
    /// Contact email used to create the zone when it does not exist.
    pub create_zone: Option<String>,
}

impl RecordRequest {
    /// Validates `address` as an IPv4 or IPv6 literal.
    pub fn new(fqdn: impl Into<String>, address: &str, create_zone: Option<String>) -> Result<Self> {
        let address = address
            .parse()
            .map_err(|_| Error::InvalidInput(format!("{address} is not a valid IP address")))?;
        Ok(Self {
            fqdn: fqdn.into(),
            address,
            create_zone,
        })
    }

    fn record(&self) -> DnsRecord {
        match self.address {
            IpAddr::V4(v4) => DnsRecord::a(&self.fqdn, v4.to_string()),
            IpAddr::V6(v6) => DnsRecord::aaaa(&self.fqdn, v6.to_string()),
        }
    }
}

impl Pipeline<'_> {
    /// Add an address record, creating the zone first when asked to.
    pub fn record(&self, request: &RecordRequest) -> Result<PipelineState> {
        let zone_name = zone_name_for_hostname(&request.fqdn)?;
        let validator = self.validator();

        let zone = match (
            validator.resolve_by(CatalogKind::Zone, MatchField::Name, &zone_name),
            &request.create_zone,
        ) {
            (Ok(zone), _) => zone,
            (Err(Error::NotFound { .. }), Some(email)) => {
                log::info!("Zone {} does not exist, creating it", zone_name);
                let job = self.provider.create(&ResourceSpec::DnsZone {
                    name: zone_name.clone(),
                    email: email.clone(),
                })?;
                self.converge_one(job, &StatusVocabulary::DNS_JOB)?;
                validator.resolve_by(CatalogKind::Zone, MatchField::Name, &zone_name)?
            }
            (Err(e), _) => return Err(e),
        };

        let mut state = PipelineState::default();
        state.records.push(self.add_record(&zone, &request.record())?);
        state.record_zone(zone);
        Ok(state)
    }
}
