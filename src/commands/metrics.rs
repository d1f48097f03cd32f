use super::common::{Common, CommonArgs};
use clap::Parser;
use verdiff::Result;

#[derive(Parser, Debug)]
pub struct MetricsArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

/// List the registered metrics with their level and preferred encoding.
pub fn list_metrics(args: &MetricsArgs) -> Result<()> {
    let common = Common::new(&args.common)?;

    for def in common.registry.defs() {
        println!("{:<14} {:<9} {:<12} {}", def.name, def.level(), def.preferred_format, def.description);
    }

    Ok(())
}
