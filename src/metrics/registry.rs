//! Process-wide metric lookup.
//!
//! The registry is populated once at process start and read-only afterward;
//! it is passed by reference to whatever needs to resolve metric names. An
//! unknown name is an error, never a silent default.

use crate::Result;
use crate::metrics::collection::{ChangedLines, FunctionDb, TotalCounts};
use crate::metrics::{MetricDef, MetricImpl, MetricLevel};
use crate::store::StoreFormat;
use ohno::{app_err, bail};
use std::collections::BTreeMap;

/// Lookup from metric name to implementation.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: BTreeMap<&'static str, MetricDef>,
}

impl MetricRegistry {
    /// Registry holding the built-in metric collection.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::default();

        registry.register(MetricDef {
            name: "totalcounts",
            description: "total file and line counts for each version",
            preferred_format: StoreFormat::JsonSingle,
            implementation: MetricImpl::Snapshot(Box::new(TotalCounts)),
        });

        registry.register(MetricDef {
            name: "changedlines",
            description: "lines added and removed between versions",
            preferred_format: StoreFormat::JsonSingle,
            implementation: MetricImpl::Delta(Box::new(ChangedLines)),
        });

        registry.register(MetricDef {
            name: "functiondb",
            description: "function signature database for each version",
            preferred_format: StoreFormat::Archive,
            implementation: MetricImpl::Snapshot(Box::new(FunctionDb)),
        });

        registry
    }

    /// Add a metric. Only meaningful during process start, before the
    /// registry is handed out; a duplicate name is a programming error and
    /// panics.
    pub fn register(&mut self, def: MetricDef) {
        let name = def.name;
        assert!(self.metrics.insert(name, def).is_none(), "metric '{name}' registered twice");
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Result<&MetricDef> {
        self.metrics
            .get(name)
            .ok_or_else(|| app_err!("Metric '{name}' is not known"))
    }

    /// All registered metrics with their level tags.
    pub fn list(&self) -> impl Iterator<Item = (&'static str, MetricLevel)> + '_ {
        self.metrics.values().map(|def| (def.name, def.level()))
    }

    /// All registered metric definitions, in name order.
    pub fn defs(&self) -> impl Iterator<Item = &MetricDef> {
        self.metrics.values()
    }

    /// Resolve a list of requested names, or every registered metric when the
    /// request is empty.
    pub fn resolve<'a, S: AsRef<str>>(&'a self, names: &[S]) -> Result<Vec<&'a MetricDef>> {
        if names.is_empty() {
            return Ok(self.metrics.values().collect());
        }

        let mut defs = Vec::with_capacity(names.len());
        for name in names {
            let def = self.get(name.as_ref())?;
            if defs.iter().any(|d: &&MetricDef| d.name == def.name) {
                bail!("Metric '{}' requested more than once", def.name);
            }
            defs.push(def);
        }

        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_contents() {
        let registry = MetricRegistry::builtin();
        let listed: Vec<_> = registry.list().collect();

        assert!(listed.contains(&("totalcounts", MetricLevel::Snapshot)));
        assert!(listed.contains(&("changedlines", MetricLevel::Delta)));
        assert!(listed.contains(&("functiondb", MetricLevel::Snapshot)));
    }

    #[test]
    fn unknown_metric_is_not_found() {
        let registry = MetricRegistry::builtin();
        assert!(registry.get("nope").is_err());
        assert!(registry.resolve(&["totalcounts", "nope"]).is_err());
    }

    #[test]
    fn empty_request_resolves_to_all() {
        let registry = MetricRegistry::builtin();
        let defs = registry.resolve::<&str>(&[]).unwrap();
        assert_eq!(defs.len(), registry.list().count());
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let registry = MetricRegistry::builtin();
        assert!(registry.resolve(&["totalcounts", "totalcounts"]).is_err());
    }
}
