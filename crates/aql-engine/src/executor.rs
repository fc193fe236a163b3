//! Query orchestration.
//!
//! [`QueryExecutor`] owns the configuration and the model catalog and routes
//! every parsed statement either to training (CREATE) or to estimation
//! (SELECT). Training follows persist-then-register ordering, so a failure
//! can never leave a half-registered model behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use aql_core::{
    AggregateFn, Backend, EngineConfig, Error, QueryDescriptor, RangePredicate, Result,
    SamplingMethod,
};
use aql_estimator::{
    FitOptions, KernelDensity, LabeledRow, MixtureBundle, PolyRegression,
};
use serde::Serialize;

use crate::catalog::{CatalogEntry, ModelCatalog};
use crate::integral::{self, AggregateEstimate};
use crate::model::{
    DensityPayload, ModelWrapper, Population, RegressionPayload, SurrogatePayload,
};
use crate::sampling::{self, SampleSet, Sampler};
use crate::{parser, warehouse};

/// Structured result of one executed statement.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryOutput {
    /// A model was trained, persisted, and registered.
    Created {
        /// The new model's name.
        model: String,
        /// Wall time spent training.
        elapsed_secs: f64,
    },
    /// An ungrouped aggregate estimate.
    Scalar {
        /// The estimate.
        value: f64,
        /// Wall time spent estimating.
        elapsed_secs: f64,
    },
    /// A per-group aggregate estimate.
    Grouped {
        /// Group value → estimate. Groups whose estimate failed are absent;
        /// an undefined AVG serializes as null.
        values: BTreeMap<String, AggregateEstimate>,
        /// Wall time spent estimating.
        elapsed_secs: f64,
    },
}

enum SelectResult {
    One(f64),
    Many(BTreeMap<String, AggregateEstimate>),
}

/// The orchestration state machine.
pub struct QueryExecutor {
    config: EngineConfig,
    catalog: ModelCatalog,
    table_header: Option<Vec<String>>,
    declared_total: Option<u64>,
    sampler_seed: Option<u64>,
}

impl QueryExecutor {
    /// Open an executor over the configured warehouse, loading every
    /// pre-existing model into the catalog.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.warehouse_dir)?;
        let mut catalog = ModelCatalog::new();
        let n_loaded = catalog.populate_from_storage(&config.warehouse_dir)?;
        if n_loaded > 0 {
            tracing::info!(models = n_loaded, "loaded pre-existing models");
        }
        Ok(Self {
            config,
            catalog,
            table_header: None,
            declared_total: None,
            sampler_seed: None,
        })
    }

    /// The catalog, for inspection.
    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// The active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Supply a header row for headerless sources (`None` reverts to
    /// reading headers from the file).
    pub fn set_table_header(&mut self, header: Option<&str>) {
        self.table_header = header.map(|h| {
            h.split(self.config.csv_split_char).map(|c| c.trim().to_string()).collect()
        });
    }

    /// Declare the true population size of the next training source (used
    /// when the source is itself a pre-drawn sample file).
    pub fn set_table_count(&mut self, n_total: u64) {
        self.declared_total = Some(n_total);
    }

    /// Fix the sampling RNG seed for reproducible training.
    pub fn set_sampler_seed(&mut self, seed: u64) {
        self.sampler_seed = Some(seed);
    }

    /// Parse and execute one statement.
    pub fn execute(&mut self, sql: &str) -> Result<QueryOutput> {
        let descriptor = parser::parse(sql)?;
        self.execute_descriptor(descriptor)
    }

    /// Execute an already-parsed statement.
    pub fn execute_descriptor(&mut self, query: QueryDescriptor) -> Result<QueryOutput> {
        match query {
            QueryDescriptor::CreateModel {
                name,
                source,
                x_header,
                y_header,
                ratio,
                method,
                group_by,
            } => self.create_model(name, source, x_header, y_header, ratio, method, group_by),
            QueryDescriptor::SelectAggregate { model, agg, y_header, range, group_by } => {
                self.select_aggregate(model, agg, y_header, range, group_by)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Training
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn create_model(
        &mut self,
        name: String,
        source: String,
        x_header: String,
        y_header: String,
        ratio: f64,
        method: SamplingMethod,
        group_by: Option<String>,
    ) -> Result<QueryOutput> {
        let started = Instant::now();
        let warehouse_dir = self.config.warehouse_dir.clone();
        let source_path = self.resolve_source(&source);

        // Fail before any sampling or fitting if the target key is taken.
        if warehouse::single_path(&warehouse_dir, &name).exists() {
            return Err(Error::ModelAlreadyExists(name));
        }
        if let Some(attr) = &group_by {
            if warehouse::group_dir(&warehouse_dir, &name, attr).exists() {
                return Err(Error::ModelAlreadyExists(name));
            }
        }

        tracing::info!(model = %name, source = %source_path.display(), "start creating model");

        let mut sampler =
            Sampler::new(self.config.csv_split_char).with_headers(self.table_header.clone());
        if let Some(seed) = self.sampler_seed {
            sampler = sampler.with_seed(seed);
        }
        let sample = sampler.make_sample(
            &source_path,
            &x_header,
            &y_header,
            group_by.as_deref(),
            ratio,
            method,
        )?;
        if sample.is_empty() {
            return Err(Error::Validation(format!(
                "sampling '{}' produced no usable rows",
                source_path.display()
            )));
        }
        if self.config.save_sample {
            let sample_path = warehouse_dir.join(format!("{name}.csv"));
            sampling::write_sample_csv(
                &sample,
                &sample_path,
                &x_header,
                &y_header,
                group_by.as_deref(),
                self.config.csv_split_char,
            )?;
        }

        match &group_by {
            None => self.train_simple(&name, &source, &x_header, &y_header, &sample)?,
            Some(attr) => match self.config.backend {
                Backend::Qreg => self.train_collection(
                    &name,
                    &source,
                    &source_path,
                    &x_header,
                    &y_header,
                    attr,
                    &sample,
                )?,
                Backend::Mdn => {
                    self.train_bundle(&name, &source, &x_header, &y_header, attr, sample)?
                }
            },
        }

        let elapsed_secs = started.elapsed().as_secs_f64();
        tracing::debug!(model = %name, elapsed_secs, "model created");
        if self.config.verbose {
            println!("time cost: {elapsed_secs:.4}s");
        }
        Ok(QueryOutput::Created { model: name, elapsed_secs })
    }

    /// Ungrouped: one density/regression pair over the whole sample.
    fn train_simple(
        &mut self,
        name: &str,
        table: &str,
        x_header: &str,
        y_header: &str,
        sample: &SampleSet,
    ) -> Result<()> {
        let density = KernelDensity::fit(&sample.xs)?;
        let degree = 2.min(sample.len() - 1);
        let regression = PolyRegression::fit(&sample.xs, &sample.ys, degree)?;

        let (x_min, x_max) = observed_bounds(&sample.xs);
        let wrapper = ModelWrapper {
            name: name.to_string(),
            table: table.to_string(),
            x_header: x_header.to_string(),
            y_header: y_header.to_string(),
            groupby_attribute: None,
            groupby_value: None,
            n_total: Population::Scalar(self.declared_total.unwrap_or(sample.n_scanned)),
            n_sample: Population::Scalar(sample.len() as u64),
            x_min: Some(x_min),
            x_max: Some(x_max),
            payload: SurrogatePayload::Simple {
                density: DensityPayload::Kde(density),
                regression: Some(RegressionPayload::Poly(regression)),
            },
        };

        warehouse::save_single(&self.config.warehouse_dir, &wrapper)?;
        self.catalog.register(wrapper)?;
        Ok(())
    }

    /// Grouped, per-leaf backend: one independently-fit leaf per observed
    /// group; totals come from a counting pass over the source.
    #[allow(clippy::too_many_arguments)]
    fn train_collection(
        &mut self,
        name: &str,
        table: &str,
        source_path: &Path,
        x_header: &str,
        y_header: &str,
        attribute: &str,
        sample: &SampleSet,
    ) -> Result<()> {
        let totals = sampling::group_counts_from_source(
            source_path,
            attribute,
            self.config.csv_split_char,
            self.table_header.as_deref(),
        )?;
        let sampled = sample.group_counts();
        let groups = sample.groups.as_ref().ok_or_else(|| {
            Error::Computation("grouped training sample is missing group labels".to_string())
        })?;

        let mut by_group: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for (i, group) in groups.iter().enumerate() {
            let slot = by_group.entry(group.as_str()).or_default();
            slot.0.push(sample.xs[i]);
            slot.1.push(sample.ys[i]);
        }

        let mut leaves = BTreeMap::new();
        for (group, (xs, ys)) in by_group {
            let density = KernelDensity::fit(&xs)?;
            let degree = 2.min(xs.len() - 1);
            let regression = PolyRegression::fit(&xs, &ys, degree)?;
            let n_sampled = sampled.get(group).copied().unwrap_or(xs.len() as u64);
            let n_total = totals.get(group).copied().unwrap_or(n_sampled);

            leaves.insert(
                group.to_string(),
                ModelWrapper {
                    name: name.to_string(),
                    table: table.to_string(),
                    x_header: x_header.to_string(),
                    y_header: y_header.to_string(),
                    groupby_attribute: Some(attribute.to_string()),
                    groupby_value: Some(group.to_string()),
                    n_total: Population::Scalar(n_total),
                    n_sample: Population::Scalar(n_sampled),
                    x_min: None,
                    x_max: None,
                    payload: SurrogatePayload::Simple {
                        density: DensityPayload::Kde(density),
                        regression: Some(RegressionPayload::Poly(regression)),
                    },
                },
            );
        }

        let dir_key = warehouse::groupby_dir_name(name, attribute);
        warehouse::save_group(&self.config.warehouse_dir, &dir_key, &leaves)?;
        self.catalog.register_group(dir_key, leaves)?;
        Ok(())
    }

    /// Grouped, bundle backend: coerce group labels to numbers, fit one
    /// shared estimator across all groups, and take per-group totals from
    /// the precomputed summary instead of rescanning the source.
    fn train_bundle(
        &mut self,
        name: &str,
        table: &str,
        x_header: &str,
        y_header: &str,
        attribute: &str,
        mut sample: SampleSet,
    ) -> Result<()> {
        sample.retain_numeric_groups();
        if sample.is_empty() {
            return Err(Error::Validation(
                "no rows with numeric group labels survive coercion".to_string(),
            ));
        }

        let summary_path = self.config.warehouse_dir.join(warehouse::GROUP_COUNTS_FILE);
        let totals = sampling::group_counts_from_summary(&summary_path, ',').map_err(|e| {
            Error::Validation(format!(
                "bundle training needs per-group totals in '{}': {e}",
                summary_path.display()
            ))
        })?;

        let groups = sample.groups.as_ref().ok_or_else(|| {
            Error::Computation("grouped training sample is missing group labels".to_string())
        })?;
        let rows: Vec<LabeledRow> = groups
            .iter()
            .zip(sample.xs.iter().zip(&sample.ys))
            .map(|(group, (&x, &y))| LabeledRow { group: group.clone(), x, y })
            .collect();

        let opts = FitOptions {
            num_epoch: self.config.num_epoch,
            num_gaussians: self.config.num_gaussians,
        };
        let bundle = MixtureBundle::fit(&rows, &opts)?;

        let wrapper = ModelWrapper {
            name: name.to_string(),
            table: table.to_string(),
            x_header: x_header.to_string(),
            y_header: y_header.to_string(),
            groupby_attribute: Some(attribute.to_string()),
            groupby_value: None,
            n_total: Population::PerGroup(totals),
            n_sample: Population::PerGroup(sample.group_counts()),
            x_min: None,
            x_max: None,
            payload: SurrogatePayload::Bundle(bundle),
        };

        warehouse::save_single(&self.config.warehouse_dir, &wrapper)?;
        self.catalog.register(wrapper)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Estimation
    // -----------------------------------------------------------------------

    fn select_aggregate(
        &self,
        model: String,
        agg: AggregateFn,
        y_header: String,
        range: Option<RangePredicate>,
        group_by: Option<String>,
    ) -> Result<QueryOutput> {
        let started = Instant::now();
        let range = range.ok_or_else(|| {
            Error::UnsupportedQuery(
                "SELECT without a range predicate is not supported".to_string(),
            )
        })?;
        if range.upper < range.lower {
            return Err(Error::Validation(format!(
                "range upper bound {} is below lower bound {}",
                range.upper, range.lower
            )));
        }

        let result = match &group_by {
            None => self.estimate_ungrouped(&model, agg, &y_header, &range)?,
            Some(attr) => match self.config.backend {
                Backend::Qreg => self.estimate_per_leaf(&model, agg, attr, &range)?,
                Backend::Mdn => self.estimate_bundle(&model, agg, attr, &range)?,
            },
        };

        let elapsed_secs = started.elapsed().as_secs_f64();
        tracing::debug!(model = %model, %agg, elapsed_secs, "estimate complete");
        if self.config.verbose {
            println!("time cost: {elapsed_secs:.4}s");
        }
        Ok(match result {
            SelectResult::One(value) => QueryOutput::Scalar { value, elapsed_secs },
            SelectResult::Many(values) => QueryOutput::Grouped { values, elapsed_secs },
        })
    }

    fn estimate_ungrouped(
        &self,
        model: &str,
        agg: AggregateFn,
        y_header: &str,
        range: &RangePredicate,
    ) -> Result<SelectResult> {
        let key = warehouse::canonical_file_name(model);
        let entry = self.catalog.lookup(&key)?;
        let CatalogEntry::Single(wrapper) = entry else {
            return Err(Error::Validation(format!(
                "'{model}' is a per-group collection; add GROUP BY"
            )));
        };
        if let Some(attr) = &wrapper.groupby_attribute {
            return Err(Error::Validation(format!(
                "model '{model}' was trained with GROUP BY {attr}; add a matching GROUP BY"
            )));
        }
        if wrapper.y_header != y_header {
            tracing::debug!(
                requested = y_header,
                trained = wrapper.y_header,
                "aggregate column differs from the trained dependent variable"
            );
        }

        let (lb, ub) = clamp_range(wrapper, range);
        let estimate = if lb > ub {
            empty_range_estimate(agg)
        } else {
            integral::estimate_single(
                agg,
                &*wrapper.surrogate(),
                lb,
                ub,
                self.config.mesh_grid_num,
                &wrapper.n_total,
            )?
        };
        match estimate {
            AggregateEstimate::Value(value) => Ok(SelectResult::One(value)),
            AggregateEstimate::Undefined => Err(Error::UndefinedAverage),
        }
    }

    /// Per-leaf backend: the engine runs once per leaf with that leaf's own
    /// bounds and counts. A failing leaf is excluded, never fatal to the
    /// other groups.
    fn estimate_per_leaf(
        &self,
        model: &str,
        agg: AggregateFn,
        attribute: &str,
        range: &RangePredicate,
    ) -> Result<SelectResult> {
        let key = warehouse::groupby_dir_name(model, attribute);
        let entry = self.catalog.lookup(&key)?;
        let CatalogEntry::Grouped(leaves) = entry else {
            return Err(Error::Validation(format!(
                "'{key}' is not a per-group collection"
            )));
        };

        let mut values = BTreeMap::new();
        for (group, leaf) in leaves {
            let (lb, ub) = clamp_range(leaf, range);
            let outcome = if lb > ub {
                Ok(empty_range_estimate(agg))
            } else {
                integral::estimate_single(
                    agg,
                    &*leaf.surrogate(),
                    lb,
                    ub,
                    self.config.mesh_grid_num,
                    &leaf.n_total,
                )
            };
            match outcome {
                Ok(estimate) => {
                    values.insert(group.clone(), estimate);
                }
                Err(e) => {
                    tracing::warn!(group = %group, error = %e, "leaf estimate failed; group excluded");
                }
            }
        }
        Ok(SelectResult::Many(values))
    }

    /// Bundle backend: one batched call across every group.
    fn estimate_bundle(
        &self,
        model: &str,
        agg: AggregateFn,
        attribute: &str,
        range: &RangePredicate,
    ) -> Result<SelectResult> {
        let key = warehouse::canonical_file_name(model);
        let entry = self.catalog.lookup(&key)?;
        let CatalogEntry::Single(wrapper) = entry else {
            return Err(Error::Validation(format!(
                "'{model}' is a per-group collection; the configured backend expects a bundle"
            )));
        };
        let SurrogatePayload::Bundle(bundle) = &wrapper.payload else {
            return Err(Error::Validation(format!(
                "model '{model}' was not trained with GROUP BY"
            )));
        };
        if wrapper.groupby_attribute.as_deref() != Some(attribute) {
            return Err(Error::Validation(format!(
                "model '{model}' is grouped by '{}', not '{attribute}'",
                wrapper.groupby_attribute.as_deref().unwrap_or("<none>")
            )));
        }

        let groups = bundle.group_values();
        let (lb, ub) = clamp_range(wrapper, range);
        let values = if lb > ub {
            groups.into_iter().map(|g| (g, empty_range_estimate(agg))).collect()
        } else {
            integral::estimate(
                agg,
                &*wrapper.surrogate(),
                lb,
                ub,
                &groups,
                self.config.mesh_grid_num,
                &wrapper.n_total,
            )?
        };
        Ok(SelectResult::Many(values))
    }

    /// An existing path is used verbatim; anything else resolves relative
    /// to the warehouse root.
    fn resolve_source(&self, source: &str) -> PathBuf {
        let path = Path::new(source);
        if path.is_file() {
            path.to_path_buf()
        } else {
            self.config.warehouse_dir.join(source)
        }
    }
}

/// Smallest and largest value actually observed in `xs`, used as the
/// model's stored x-domain. Returns `(+inf, -inf)` for an empty slice.
fn observed_bounds(xs: &[f64]) -> (f64, f64) {
    xs.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
        (lo.min(x), hi.max(x))
    })
}

/// Intersect the requested range with the model's stored x-domain.
fn clamp_range(wrapper: &ModelWrapper, range: &RangePredicate) -> (f64, f64) {
    (range.lower.max(wrapper.x_lb()), range.upper.min(wrapper.x_ub()))
}

/// Outcome of integrating over an empty range, without touching the
/// estimator: COUNT and SUM are zero, AVG is undefined.
fn empty_range_estimate(agg: AggregateFn) -> AggregateEstimate {
    match agg {
        AggregateFn::Count | AggregateFn::Sum => AggregateEstimate::Value(0.0),
        AggregateFn::Avg => AggregateEstimate::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_range_outcomes() {
        assert_eq!(empty_range_estimate(AggregateFn::Count), AggregateEstimate::Value(0.0));
        assert_eq!(empty_range_estimate(AggregateFn::Sum), AggregateEstimate::Value(0.0));
        assert_eq!(empty_range_estimate(AggregateFn::Avg), AggregateEstimate::Undefined);
    }

    #[test]
    fn test_output_serializes_with_kind_tag() {
        let out = QueryOutput::Scalar { value: 4.25, elapsed_secs: 0.01 };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["kind"], "scalar");
        assert_eq!(json["value"], 4.25);
    }
}
