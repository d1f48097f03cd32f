use super::common::{Common, CommonArgs};
use clap::Parser;
use std::collections::HashSet;
use verdiff::Result;
use verdiff::metrics::MetricsExtractor;
use verdiff::repo::RepositoryBuilder;
use verdiff::store::StoreKey;
use verdiff::update;

#[derive(Parser, Debug)]
pub struct UpdateArgs {
    /// Package to update (format: `<manager>:<package>`, e.g. `pypi:requests`)
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    /// Metrics to update [default: all registered metrics]
    #[arg(long = "metric", short = 'm', value_name = "NAME")]
    pub metrics: Vec<String>,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Bring stored result sets up to date with the manager's current version
/// list, computing only the keys that are missing. Previously stored keys
/// are never recomputed or overwritten.
pub async fn update(args: &UpdateArgs) -> Result<()> {
    let common = Common::new(&args.common)?;
    let prepared = common.prepare(&args.package).await?;

    let outcome = RepositoryBuilder::new(&prepared.repo)
        .build(&prepared.descriptors, &prepared.manager)
        .await?;
    println!("{}: {}", prepared.uri, outcome.summary());
    outcome.ensure_usable()?;

    let extractor = MetricsExtractor::new(&prepared.repo, &common.registry);

    for def in common.registry.resolve(&args.metrics)? {
        let key = StoreKey {
            manager: prepared.manager.name(),
            package: prepared.manager.package(),
            metric: def.name,
        };

        let Some(mut existing) = common.store.load(&key)? else {
            // Nothing stored yet, so this is a plain full extraction.
            let mut results = extractor.extract(&[def.name])?;
            let set = results.shift_remove(def.name).unwrap_or_default();
            let location = common.store.persist(&key, &set, def.preferred_format, false)?;
            println!("Extracted {} '{}' result(s) to '{}'", set.len(), def.name, location.display());
            continue;
        };

        let missing = update::missing_versions(&existing, &prepared.descriptors, def.level());
        if missing.is_empty() {
            println!("'{}' is up to date", def.name);
            continue;
        }

        let only: HashSet<String> = missing.into_iter().collect();
        let mut fresh = extractor.extract_restricted(&[def.name], Some(&only))?;
        let added = update::merge_append_only(&mut existing, fresh.shift_remove(def.name).unwrap_or_default());

        for format in common.store.stored_formats(&key)? {
            let _ = common.store.persist(&key, &existing, format, true)?;
        }

        println!("Added {added} new '{}' result(s)", def.name);
    }

    Ok(())
}
