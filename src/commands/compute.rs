use anyhow::{Context as _, Result};

use super::{expand, read_key, run_scenario};
use crate::Context;
use crate::cli::{BalancerArgs, ClusterArgs, GrowArgs, ServerArgs, ServersArgs, StackArgs};
use crate::pipeline::compute::{ErrorPage, StackRequest};
use crate::pipeline::{self, BalancerRequest, PipelineState, ServerRequest};
use crate::{report, ui};
use cloudkit::VirtualIpType;

fn server_request(args: &ServerArgs, public_key: Option<Vec<u8>>) -> ServerRequest {
    ServerRequest {
        base_name: args.name.clone(),
        count: args.count,
        image: args.image.clone(),
        flavor: args.flavor.clone(),
        public_key,
    }
}

fn balancer_request(args: &BalancerArgs) -> BalancerRequest {
    BalancerRequest {
        name: args.lb_name.clone(),
        port: args.port,
        node_port: args.node_port,
        protocol: args.protocol.clone(),
        virtual_ip: if args.private {
            VirtualIpType::ServiceNet
        } else {
            VirtualIpType::Public
        },
    }
}

fn print_report(ctx: &Context, title: &str, state: &PipelineState) {
    if !ctx.quiet {
        ui::header(title);
    }
    print!("{}", report::report(state.servers(), state.load_balancer()));
}

pub fn servers(ctx: &Context, args: ServersArgs) -> Result<()> {
    let key = args.ssh_key.as_deref().map(read_key).transpose()?;
    let request = server_request(&args.server, key);

    let state = run_scenario(ctx, args.wait.interval, |p| p.servers(&request))?;
    print_report(ctx, "Servers", &state);
    Ok(())
}

pub fn cluster(ctx: &Context, args: ClusterArgs) -> Result<()> {
    let servers = server_request(&args.server, None);
    let balancer = balancer_request(&args.balancer);

    let state = run_scenario(ctx, args.wait.interval, |p| p.cluster(&servers, &balancer))?;
    print_report(ctx, "Cluster", &state);
    Ok(())
}

pub fn stack(ctx: &Context, args: StackArgs) -> Result<()> {
    let key = read_key(&args.ssh_key)?;
    let page_path = expand(&args.error_page);
    let content = pipeline::read_text(&page_path)
        .with_context(|| format!("Could not read error page {}", page_path.display()))?;
    let file_name = page_path
        .file_name()
        .map_or_else(|| "error.html".to_string(), |n| n.to_string_lossy().into_owned());

    let request = StackRequest {
        servers: server_request(&args.server, Some(key)),
        balancer: balancer_request(&args.balancer),
        fqdn: args.fqdn,
        error_page: ErrorPage { file_name, content },
        container: args.container,
    };

    let state = run_scenario(ctx, args.wait.interval, |p| p.stack(&request))?;
    print_report(ctx, "Stack", &state);
    ui::kv("DNS", &request.fqdn);
    ui::kv("Error page backup", &format!("{}/{}", request.container, request.error_page.file_name));
    Ok(())
}

pub fn grow(ctx: &Context, args: GrowArgs) -> Result<()> {
    let servers = server_request(&args.server, None);

    let state = run_scenario(ctx, args.wait.interval, |p| {
        p.grow(&servers, &args.load_balancer, args.node_port)
    })?;
    print_report(ctx, "New nodes", &state);
    Ok(())
}
