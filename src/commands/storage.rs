use anyhow::{Context as _, Result};

use super::{expand, run_scenario};
use crate::Context;
use crate::cli::{CdnContainerArgs, SiteArgs, UploadArgs};
use crate::pipeline;
use crate::pipeline::storage::{DEFAULT_INDEX, SiteRequest, cdn_host, read_directory};
use crate::ui;

pub fn cdn_container(ctx: &Context, args: CdnContainerArgs) -> Result<()> {
    let state = run_scenario(ctx, None, |p| p.cdn_container(&args.container))?;

    ui::success(&format!("Container {} is CDN-enabled", args.container));
    if let Some(uri) = state.cdn_uri() {
        ui::kv("CDN URI", uri);
    }
    Ok(())
}

pub fn site(ctx: &Context, args: SiteArgs) -> Result<()> {
    let index_body = match &args.index_file {
        Some(path) => {
            let path = expand(path);
            pipeline::read_input(&path)
                .with_context(|| format!("Could not read index file {}", path.display()))?
        }
        None => DEFAULT_INDEX.as_bytes().to_vec(),
    };
    let request = SiteRequest {
        container: args.container,
        fqdn: args.fqdn,
        index_name: args.index,
        index_body,
    };

    let state = run_scenario(ctx, args.wait.interval, |p| p.site(&request))?;

    if let Some(uri) = state.cdn_uri() {
        ui::kv("CDN URI", uri);
        ui::kv("CNAME", &format!("{} -> {}", request.fqdn, cdn_host(uri)?));
    }
    ui::success(&format!("Site published at http://{}/", request.fqdn));
    Ok(())
}

pub fn upload(ctx: &Context, args: UploadArgs) -> Result<()> {
    let source = expand(&args.source);
    let files = read_directory(&source)?;
    if files.is_empty() {
        ui::warn(&format!("No files in {}", source.display()));
    }

    let state = run_scenario(ctx, None, |p| p.upload(&args.container, &files, !args.no_create))?;

    let bytes: usize = files.iter().map(|f| f.contents.len()).sum();
    ui::success(&format!(
        "Uploaded {} file(s), {} bytes, to {}",
        state.objects().len(),
        bytes,
        args.container
    ));
    Ok(())
}
