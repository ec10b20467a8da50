use std::io::Read;

use crate::app::AppContext;
use crate::cli::{ExportArgs, ExportFormat, ImportArgs};

pub fn handle_export(ctx: &AppContext, args: &ExportArgs) -> anyhow::Result<()> {
    let stash = ctx.open_stash()?;
    let contents = match args.format {
        ExportFormat::Json => stash.export_json()?,
        ExportFormat::Csv => stash.export_csv()?,
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, &contents)
                .map_err(|e| anyhow::anyhow!("Failed to write export {}: {}", path, e))?;
            if !ctx.quiet() {
                eprintln!("Exported to {}", path);
            }
        }
        None => {
            print!("{}", contents);
            if !contents.ends_with('\n') {
                println!();
            }
        }
    }
    Ok(())
}

pub fn handle_import(ctx: &AppContext, args: &ImportArgs) -> anyhow::Result<()> {
    let contents = if args.file == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| anyhow::anyhow!("Failed to read stdin: {}", e))?;
        buffer
    } else {
        std::fs::read_to_string(&args.file)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", args.file, e))?
    };

    let stash = ctx.open_stash()?;
    let count = stash.import_json(&contents)?;
    if !ctx.quiet() {
        println!("Imported {} items", count);
    }
    Ok(())
}
