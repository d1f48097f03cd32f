use super::common::{Common, CommonArgs};
use clap::Parser;
use verdiff::Result;
use verdiff::store::StoreKey;
use verdiff::update;

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Package to check (format: `<manager>:<package>`, e.g. `pypi:requests`)
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Metrics to check [default: all registered metrics]
    #[arg(long = "metric", short = 'm', value_name = "NAME")]
    pub metrics: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Compare stored result sets against the manager's current version list
/// without touching the version repository.
pub async fn check(args: &CheckArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let (uri, manager, descriptors) = common.resolve(&args.package).await?;

    for def in common.registry.resolve(&args.metrics)? {
        let key = StoreKey {
            manager: manager.name(),
            package: manager.package(),
            metric: def.name,
        };

        let stored = common.store.load(&key)?;
        let status = update::check(stored.as_ref(), &descriptors, def.level());
        println!("{uri} {}: {status}", def.name);
    }

    Ok(())
}
