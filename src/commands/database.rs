use anyhow::Result;

use super::run_scenario;
use crate::Context;
use crate::cli::DatabaseArgs;
use crate::pipeline::database::DatabaseRequest;
use crate::{report, ui};

pub fn run(ctx: &Context, args: DatabaseArgs) -> Result<()> {
    let request = DatabaseRequest {
        instance: args.instance,
        flavor: args.flavor,
        volume_gb: args.size,
        database: args.database,
        user: args.user,
        password: args.password,
    };

    let state = run_scenario(ctx, args.wait.interval, |p| p.database(&request))?;

    if !ctx.quiet {
        ui::header("Database");
    }
    for instance in state.databases() {
        println!(
            "{}",
            report::database_line(instance, &request.database, &request.user, &request.password)
        );
    }
    Ok(())
}
