use anyhow::{Result, bail};
use std::time::Duration;

use super::{read_key, run_scenario};
use crate::Context;
use crate::cli::{CloneArgs, HostArgs};
use crate::pipeline::clone::{CloneRequest, HostRequest, ServerRef, random_suffix};
use crate::{report, ui};

fn source(args: &CloneArgs) -> Result<ServerRef> {
    match (&args.name, &args.id) {
        (Some(name), None) => Ok(ServerRef::Name(name.clone())),
        (None, Some(id)) => Ok(ServerRef::Id(id.clone())),
        _ => bail!("Give exactly one of --name or --id"),
    }
}

pub fn clone(ctx: &Context, args: CloneArgs) -> Result<()> {
    let request = CloneRequest {
        source: source(&args)?,
        destination: args.destination.clone(),
        delete_image: args.delete_image,
    };

    let state = run_scenario(ctx, args.wait.interval, |p| p.clone_server(&request, random_suffix))?;

    if !ctx.quiet {
        ui::header("Clone");
    }
    for server in state.servers() {
        print!("{}", report::server_block(server));
    }
    match state.images().first() {
        Some(image) => ui::kv("Image", &format!("{} ({})", image.name, image.id)),
        None => ui::dim("Snapshot image deleted"),
    }
    Ok(())
}

pub fn host(ctx: &Context, args: HostArgs) -> Result<()> {
    let public_key = args.ssh_key.as_deref().map(read_key).transpose()?;
    let request = HostRequest {
        fqdn: args.fqdn,
        image: args.image,
        flavor: args.flavor,
        public_key,
        timeout: args.timeout.map(Duration::from_secs),
    };

    let state = run_scenario(ctx, args.wait.interval, |p| p.host(&request))?;

    if !ctx.quiet {
        ui::header("Host");
    }
    for server in state.servers() {
        print!("{}", report::server_block(server));
    }
    ui::kv("DNS", &request.fqdn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn clone_args(argv: &[&str]) -> CloneArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Clone(args) => args,
            _ => panic!("expected clone"),
        }
    }

    #[test]
    fn test_source_by_name() {
        let args = clone_args(&["cumulus", "clone", "copy", "--name", "web1"]);
        assert_eq!(source(&args).unwrap(), ServerRef::Name("web1".to_string()));
    }

    #[test]
    fn test_source_by_id() {
        let args = clone_args(&["cumulus", "clone", "copy", "--id", "abc-123"]);
        assert_eq!(source(&args).unwrap(), ServerRef::Id("abc-123".to_string()));
    }
}
