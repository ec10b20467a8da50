use crate::app::AppContext;
use crate::cli::ClearArgs;
use crate::output::stats_table;

pub fn handle_stats(ctx: &AppContext) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let stats = stash.stats()?;
    println!("{}", stats_table(&stats));
    Ok(())
}

pub fn handle_vacuum(ctx: &AppContext) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let report = stash.vacuum()?;
    if !ctx.quiet() {
        println!(
            "Vacuum complete: {} old versions removed",
            report.versions_removed
        );
    }
    Ok(())
}

pub fn handle_clear(ctx: &AppContext, args: &ClearArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    if !args.yes {
        if !ctx.interactive() {
            return Err(anyhow::anyhow!(
                "Refusing to clear without confirmation. Pass --yes."
            ));
        }
        let proceed = dialoguer::Confirm::new()
            .with_prompt(format!(
                "Remove every item from {}?",
                ctx.store_path().display()
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return Err(anyhow::anyhow!("Clear cancelled"));
        }
    }
    let removed = stash.clear()?;
    if !ctx.quiet() {
        println!("Removed {} items", removed);
    }
    Ok(())
}
