//! Validation of user references against live provider catalogs.
//!
//! Every check fetches a fresh listing. Nothing is cached between calls, so
//! a pipeline that validates twice sees the provider's state at each point.

use crate::backend::CatalogLookup;
use crate::error::{Error, Result};
use crate::types::{CatalogEntry, CatalogKind, MatchField};

/// Resolves references against [`CatalogLookup`] listings.
pub struct CatalogValidator<'a, L: CatalogLookup + ?Sized> {
    lookup: &'a L,
}

impl<'a, L: CatalogLookup + ?Sized> CatalogValidator<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self { lookup }
    }

    /// Resolve `reference` using the kind's default match field.
    ///
    /// On a miss the error carries the whole listing so the caller can show
    /// every valid alternative.
    pub fn resolve(&self, kind: CatalogKind, reference: &str) -> Result<CatalogEntry> {
        self.resolve_by(kind, kind.default_match(), reference)
    }

    /// Resolve `reference` by an explicit field.
    pub fn resolve_by(&self, kind: CatalogKind, field: MatchField, reference: &str) -> Result<CatalogEntry> {
        let entries = self.lookup.list(kind)?;
        log::debug!("Resolving {} {:?} against {} entries", kind, reference, entries.len());

        match entries.iter().find(|e| e.field(field) == reference) {
            Some(entry) => Ok(entry.clone()),
            None => Err(Error::NotFound {
                kind,
                reference: reference.to_string(),
                alternatives: entries,
            }),
        }
    }

    /// Fail if a container named `name` already exists.
    pub fn ensure_container_absent(&self, name: &str) -> Result<()> {
        let containers = self.lookup.list(CatalogKind::Container)?;
        if containers.iter().any(|c| c.name == name) {
            return Err(Error::AlreadyExists {
                kind: CatalogKind::Container,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Find the zone that should hold `hostname`.
    pub fn resolve_zone_for_hostname(&self, hostname: &str) -> Result<CatalogEntry> {
        let zone = zone_name_for_hostname(hostname)?;
        self.resolve_by(CatalogKind::Zone, MatchField::Name, &zone)
    }
}

/// Zone name for a fully qualified hostname: its last two labels.
///
/// ```
/// use cloudkit::catalog::zone_name_for_hostname;
///
/// assert_eq!(zone_name_for_hostname("www.example.com").unwrap(), "example.com");
/// assert!(zone_name_for_hostname("example.com").is_err());
/// ```
pub fn zone_name_for_hostname(hostname: &str) -> Result<String> {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
        return Err(Error::InvalidHostname {
            hostname: hostname.to_string(),
        });
    }
    Ok(labels[labels.len() - 2..].join("."))
}
