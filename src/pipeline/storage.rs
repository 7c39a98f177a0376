//! Object storage scenarios: bulk upload, CDN containers and static sites.

use super::{Pipeline, PipelineState, read_input};
use cloudkit::{CatalogKind, ContainerOptions, DnsRecord, Error, Result};
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Index page stored when the user does not supply one.
pub const DEFAULT_INDEX: &str = "<html><h1>It works!</h1></html>\n";

/// A local file staged for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub contents: Vec<u8>,
}

/// Regular files directly inside `dir`, sorted by name.
///
/// Subdirectories are skipped, not descended into.
pub fn read_directory(dir: &Path) -> Result<Vec<LocalFile>> {
    if !dir.is_dir() {
        return Err(Error::input_file(
            dir,
            io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
        ));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::input_file(dir, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        files.push(LocalFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            contents: read_input(entry.path())?,
        });
    }
    Ok(files)
}

/// Host part of a CDN URI.
pub fn cdn_host(uri: &str) -> Result<&str> {
    let rest = uri.split_once("://").map_or(uri, |(_, rest)| rest);
    match rest.split('/').next() {
        Some(host) if !host.is_empty() => Ok(host),
        _ => Err(Error::InvalidResponse(format!("CDN URI {uri} has no host"))),
    }
}

#[derive(Debug, Clone)]
pub struct SiteRequest {
    pub container: String,
    pub fqdn: String,
    pub index_name: String,
    pub index_body: Vec<u8>,
}

impl Pipeline<'_> {
    /// Store `files` in `container`, creating it unless `create` is false.
    pub fn upload(&self, container: &str, files: &[LocalFile], create: bool) -> Result<PipelineState> {
        match self.validator().resolve(CatalogKind::Container, container) {
            Ok(_) => {}
            Err(Error::NotFound { .. }) if create => {
                log::info!("Creating container {}", container);
                self.provider
                    .create_container(container, &ContainerOptions::default())?;
            }
            Err(e) => return Err(e),
        }

        let mut state = PipelineState::default();
        for file in files {
            log::info!("Uploading {} ({} bytes)", file.name, file.contents.len());
            state
                .objects
                .push(self.provider.store_object(container, &file.name, &file.contents)?);
        }
        Ok(state)
    }

    /// Create a new CDN-enabled container.
    pub fn cdn_container(&self, name: &str) -> Result<PipelineState> {
        self.validator().ensure_container_absent(name)?;

        log::info!("Creating container {}", name);
        self.provider.create_container(name, &ContainerOptions::default())?;
        let uri = self.provider.enable_cdn(name)?;

        let mut state = PipelineState::default();
        state.record_cdn_uri(uri);
        Ok(state)
    }

    /// Publish an index page from a CDN container under `fqdn`.
    pub fn site(&self, request: &SiteRequest) -> Result<PipelineState> {
        let validator = self.validator();
        let zone = validator.resolve_zone_for_hostname(&request.fqdn)?;
        validator.ensure_container_absent(&request.container)?;

        log::info!("Creating container {}", request.container);
        self.provider.create_container(
            &request.container,
            &ContainerOptions {
                web_index: Some(request.index_name.clone()),
            },
        )?;
        let uri = self.provider.enable_cdn(&request.container)?;
        let object = self
            .provider
            .store_object(&request.container, &request.index_name, &request.index_body)?;

        let mut state = PipelineState::default();
        state.objects.push(object);
        let record = DnsRecord::cname(&request.fqdn, cdn_host(&uri)?);
        state.records.push(self.add_record(&zone, &record)?);
        state.record_zone(zone);
        state.record_cdn_uri(uri);
        Ok(state)
    }
}
