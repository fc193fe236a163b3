//! In-process model catalog.
//!
//! Maps warehouse keys to loaded models: one entry per ungrouped/bundle
//! model, one entry per per-group collection. The catalog is owned by the
//! orchestrator and passed explicitly; there is no process-wide singleton.
//! A collection directory becomes visible only after every leaf in it has
//! been loaded.

use std::collections::BTreeMap;
use std::path::Path;

use aql_core::{Error, Result};

use crate::model::ModelWrapper;
use crate::warehouse::{self, MODEL_SUFFIX};

/// One catalog entry.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    /// An ungrouped or bundle model.
    Single(ModelWrapper),
    /// A per-group collection: group value → leaf.
    Grouped(BTreeMap<String, ModelWrapper>),
}

/// Index from warehouse keys to loaded models.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ModelCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an ungrouped or bundle model under its canonical key.
    /// Returns the key used.
    pub fn register(&mut self, model: ModelWrapper) -> Result<String> {
        if model.groupby_value.is_some() {
            return Err(Error::Validation(format!(
                "model '{}' is a collection leaf; register the whole collection",
                model.name
            )));
        }
        let key = warehouse::canonical_file_name(&model.name);
        self.entries.insert(key.clone(), CatalogEntry::Single(model));
        Ok(key)
    }

    /// Register a complete per-group collection under its directory key.
    pub fn register_group(
        &mut self,
        dir_key: String,
        leaves: BTreeMap<String, ModelWrapper>,
    ) -> Result<String> {
        if leaves.is_empty() {
            return Err(Error::Validation(format!(
                "collection '{dir_key}' has no leaves"
            )));
        }
        self.entries.insert(dir_key.clone(), CatalogEntry::Grouped(leaves));
        Ok(dir_key)
    }

    /// Look up an entry by key.
    pub fn lookup(&self, key: &str) -> Result<&CatalogEntry> {
        self.entries.get(key).ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Whether a key is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scan the warehouse root and register everything found.
    ///
    /// Top-level record files register individually; each subdirectory is
    /// read completely and registered as one atomic collection entry keyed
    /// by the directory name. Returns the number of top-level entries
    /// loaded.
    pub fn populate_from_storage(&mut self, root: &Path) -> Result<usize> {
        let mut n_loaded = 0_usize;
        for dir_entry in std::fs::read_dir(root)? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            let file_name = dir_entry.file_name().to_string_lossy().into_owned();

            if path.is_file() && file_name.ends_with(MODEL_SUFFIX) {
                let model = warehouse::load(&path)?;
                self.register(model)?;
                n_loaded += 1;
            } else if path.is_dir() {
                let mut leaves = BTreeMap::new();
                for leaf_entry in std::fs::read_dir(&path)? {
                    let leaf_path = leaf_entry?.path();
                    let leaf_name = leaf_path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if !(leaf_path.is_file() && leaf_name.ends_with(MODEL_SUFFIX)) {
                        continue;
                    }
                    let leaf = warehouse::load(&leaf_path)?;
                    let group = leaf
                        .groupby_value
                        .clone()
                        .unwrap_or_else(|| leaf_name.trim_end_matches(MODEL_SUFFIX).to_string());
                    leaves.insert(group, leaf);
                }
                if leaves.is_empty() {
                    tracing::debug!(dir = %path.display(), "skipping directory with no model records");
                    continue;
                }
                // The whole directory has been read; insert as one entry.
                self.register_group(file_name, leaves)?;
                n_loaded += 1;
            }
        }
        Ok(n_loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DensityPayload, Population, SurrogatePayload};
    use aql_estimator::KernelDensity;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("aql_catalog_{}_{}_{}", std::process::id(), nanos, tag));
        p
    }

    fn model(name: &str, group: Option<&str>) -> ModelWrapper {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        ModelWrapper {
            name: name.to_string(),
            table: "t.csv".to_string(),
            x_header: "x".to_string(),
            y_header: "y".to_string(),
            groupby_attribute: group.map(|_| "g".to_string()),
            groupby_value: group.map(|g| g.to_string()),
            n_total: Population::Scalar(100),
            n_sample: Population::Scalar(20),
            x_min: None,
            x_max: None,
            payload: SurrogatePayload::Simple {
                density: DensityPayload::Kde(KernelDensity::fit(&xs).unwrap()),
                regression: None,
            },
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut catalog = ModelCatalog::new();
        let key = catalog.register(model("m", None)).unwrap();
        assert_eq!(key, "m.model.json");
        assert!(matches!(catalog.lookup(&key).unwrap(), CatalogEntry::Single(_)));
        assert!(matches!(catalog.lookup("nope"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_leaf_cannot_register_alone() {
        let mut catalog = ModelCatalog::new();
        assert!(catalog.register(model("m", Some("1"))).is_err());
    }

    #[test]
    fn test_empty_collection_rejected() {
        let mut catalog = ModelCatalog::new();
        assert!(catalog.register_group("k".to_string(), BTreeMap::new()).is_err());
    }

    #[test]
    fn test_populate_loads_files_and_directories_atomically() {
        let root = tmp_root("populate");
        warehouse::save_single(&root, &model("solo", None)).unwrap();

        let mut leaves = BTreeMap::new();
        for g in ["1", "2", "3"] {
            leaves.insert(g.to_string(), model("grp", Some(g)));
        }
        warehouse::save_group(&root, &warehouse::groupby_dir_name("grp", "g"), &leaves).unwrap();

        // An unrelated file must be ignored.
        std::fs::write(root.join("num_of_points.txt"), "1,10\n").unwrap();

        let mut catalog = ModelCatalog::new();
        let n = catalog.populate_from_storage(&root).unwrap();
        assert_eq!(n, 2);
        assert_eq!(catalog.len(), 2);

        // The 3-leaf directory is one entry with exactly 3 keys.
        match catalog.lookup("grp_groupby_g").unwrap() {
            CatalogEntry::Grouped(map) => {
                assert_eq!(map.len(), 3);
                assert!(map.contains_key("1") && map.contains_key("2") && map.contains_key("3"));
            }
            CatalogEntry::Single(_) => panic!("expected a grouped entry"),
        }

        let _ = std::fs::remove_dir_all(&root);
    }
}
