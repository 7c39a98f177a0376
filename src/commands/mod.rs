// Server and load balancer scenarios
pub mod compute;

// Single-server scenarios
pub mod clone;

// DNS, databases and object storage
pub mod database;
pub mod dns;
pub mod storage;

use anyhow::{Context as _, Result};
use cloudkit::backend::rackspace::RackspaceBackend;
use cloudkit::wait::{NoObserver, ThreadClock, WaitObserver, WaitOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::Context;
use crate::config::Settings;
use crate::pipeline::{self, Pipeline, PipelineState};
use crate::progress::{ConsoleObserver, spinner};
use crate::ui;

/// Authenticate, then run `scenario` with a pipeline polling every
/// `interval` seconds (or the configured default).
pub(crate) fn run_scenario<F>(ctx: &Context, interval: Option<u64>, scenario: F) -> Result<PipelineState>
where
    F: FnOnce(&Pipeline<'_>) -> cloudkit::Result<PipelineState>,
{
    let settings = Settings::load(&ctx.overrides)?;
    log::debug!("Using region {} via {}", settings.region, settings.identity_url);

    let backend = {
        let pb = (!ctx.quiet).then(|| spinner(&format!("Authenticating in {}", settings.region)));
        let result = RackspaceBackend::connect(&settings.identity_url, &settings.credentials, &settings.region);
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        result?
    };

    let console = ConsoleObserver::new();
    let silent = NoObserver;
    let observer: &dyn WaitObserver = if ctx.quiet { &silent } else { &console };
    let wait = WaitOptions::with_interval(settings.interval_or(interval));
    let pipeline = Pipeline::new(&backend, wait, &ThreadClock, observer);

    let start = Instant::now();
    let state = scenario(&pipeline)?;
    if !ctx.quiet {
        ui::dim(&format!("Finished in {}", ui::format_elapsed(start.elapsed())));
    }
    Ok(state)
}

/// Expand `~` in a user-supplied path.
pub(crate) fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Read a public key file.
pub(crate) fn read_key(path: &Path) -> Result<Vec<u8>> {
    let path = expand(path);
    pipeline::read_input(&path).with_context(|| format!("Could not read SSH key {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_expand_leaves_absolute_paths() {
        assert_eq!(expand(Path::new("/etc/hosts")), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand(Path::new("~/.ssh/id_rsa.pub")), home.join(".ssh/id_rsa.pub"));
    }

    #[test]
    fn test_read_key() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "ssh-ed25519 AAAA me@host").unwrap();
        assert_eq!(read_key(file.path()).unwrap(), b"ssh-ed25519 AAAA me@host");
    }

    #[test]
    fn test_read_key_missing_keeps_cause() {
        let err = read_key(Path::new("/nonexistent/key.pub")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<cloudkit::Error>(),
            Some(cloudkit::Error::InputFile { .. })
        ));
    }
}
