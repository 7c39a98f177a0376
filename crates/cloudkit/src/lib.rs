//! # cloudkit
//!
//! Provisioning primitives for cloud pipelines.
//!
//! This crate provides:
//! - Provider capability traits ([`CatalogLookup`], [`ResourceControl`]) with
//!   a Rackspace HTTP backend and an in-memory mock
//! - Validation of user references against live catalogs
//! - A convergence waiter that polls batches of resources until they are ready
//!
//! ## Example
//!
//! ```
//! use cloudkit::backend::{MockBackend, ResourceControl};
//! use cloudkit::catalog::CatalogValidator;
//! use cloudkit::wait::{await_batch, Batch, ManualClock, NoObserver, WaitOptions};
//! use cloudkit::{CatalogKind, ResourceSpec, ServerSpec, StatusVocabulary};
//!
//! let provider = MockBackend::with_sample_catalog();
//! let flavor = CatalogValidator::new(&provider)
//!     .resolve(CatalogKind::Flavor, "2")
//!     .unwrap();
//!
//! let spec = ServerSpec::new("web1", "5cebb13a-f783-4f8c-8058-c4182c724ccd", flavor.id);
//! let server = provider.create(&ResourceSpec::Server(spec)).unwrap();
//!
//! let batch = await_batch(
//!     &provider,
//!     Batch::single(server),
//!     &WaitOptions::default(),
//!     &StatusVocabulary::BUILD,
//!     &ManualClock::new(),
//!     &NoObserver,
//! )
//! .unwrap();
//! assert_eq!(batch.handles()[0].status, "ACTIVE");
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod catalog;
pub mod error;
pub mod types;
pub mod wait;

pub use backend::{CatalogLookup, MockBackend, Provider, ResourceControl};
pub use error::{Error, ErrorCategory, Result};
pub use types::{
    CatalogEntry, CatalogKind, ContainerOptions, DatabaseInstanceSpec, DatabaseUser, DnsRecord,
    HealthMonitor, IpVersion, LoadBalancerSpec, MatchField, NetworkAddress, NodeSpec,
    PersonalityFile, ResourceHandle, ResourceKind, ResourceSpec, ServerSpec, StatusClass,
    StatusVocabulary, VirtualIpType,
};
