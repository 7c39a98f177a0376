use anyhow::Result;

use super::run_scenario;
use crate::Context;
use crate::cli::RecordArgs;
use crate::pipeline::dns::RecordRequest;
use crate::ui;

pub fn record(ctx: &Context, args: RecordArgs) -> Result<()> {
    // Reject a bad address before authenticating.
    let request = RecordRequest::new(&args.fqdn, &args.address, args.create_zone)?;

    let state = run_scenario(ctx, args.wait.interval, |p| p.record(&request))?;

    for record in state.records() {
        ui::success(&format!("{} -> {} ({})", request.fqdn, request.address, record.status));
    }
    if let Some(zone) = state.zone() {
        ui::kv("Zone", &format!("{} ({})", zone.name, zone.id));
    }
    Ok(())
}
