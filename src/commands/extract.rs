use super::common::{Common, CommonArgs};
use clap::Parser;
use verdiff::Result;
use verdiff::metrics::MetricsExtractor;
use verdiff::repo::RepositoryBuilder;
use verdiff::store::{StoreFormat, StoreKey};

#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Package to process (format: `<manager>:<package>`, e.g. `pypi:requests`)
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Metrics to extract [default: all registered metrics]
    #[arg(long = "metric", short = 'm', value_name = "NAME")]
    pub metrics: Vec<String>,

    /// Persistence encoding [default: each metric's preferred encoding]
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<StoreFormat>,

    /// Overwrite previously stored results
    #[arg(long)]
    pub force: bool,

    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn extract(args: &ExtractArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let prepared = common.prepare(&args.package).await?;

    let outcome = RepositoryBuilder::new(&prepared.repo)
        .build(&prepared.descriptors, &prepared.manager)
        .await?;
    println!("{}: {}", prepared.uri, outcome.summary());
    outcome.ensure_usable()?;

    let extractor = MetricsExtractor::new(&prepared.repo, &common.registry);
    let results = extractor.extract(&args.metrics)?;

    for (name, set) in &results {
        let def = common.registry.get(name)?;
        let format = args.format.unwrap_or(def.preferred_format);
        let key = StoreKey {
            manager: prepared.manager.name(),
            package: prepared.manager.package(),
            metric: name,
        };

        let location = common.store.persist(&key, set, format, args.force)?;
        println!("Wrote {} '{name}' result(s) to '{}'", set.len(), location.display());
    }

    Ok(())
}
