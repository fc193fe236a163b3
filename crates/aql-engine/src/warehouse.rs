//! Durable storage of model records.
//!
//! Layout under the warehouse root:
//! - `<model-name>.model.json` — one record for an ungrouped or bundle model
//! - `<model-name>_groupby_<attr>/<group>.model.json` — one record per group
//!   value of a per-group collection
//! - `num_of_points.txt` — optional precomputed per-group totals consumed by
//!   bundle training
//!
//! Records are versioned JSON; loading checks the schema version so a stale
//! warehouse fails loudly instead of deserializing garbage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aql_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::model::ModelWrapper;

/// Fixed on-disk suffix for model record files.
pub const MODEL_SUFFIX: &str = ".model.json";

/// Schema version written into every record.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// File name of the precomputed per-group totals summary.
pub const GROUP_COUNTS_FILE: &str = "num_of_points.txt";

#[derive(Debug, Serialize, Deserialize)]
struct ModelRecord {
    schema_version: String,
    model: ModelWrapper,
}

/// Canonical file name of an ungrouped or bundle model.
pub fn canonical_file_name(model_name: &str) -> String {
    format!("{model_name}{MODEL_SUFFIX}")
}

/// Directory name of a per-group collection.
pub fn groupby_dir_name(model_name: &str, attribute: &str) -> String {
    format!("{model_name}_groupby_{attribute}")
}

/// Path of an ungrouped or bundle model record.
pub fn single_path(root: &Path, model_name: &str) -> PathBuf {
    root.join(canonical_file_name(model_name))
}

/// Path of a per-group collection directory.
pub fn group_dir(root: &Path, model_name: &str, attribute: &str) -> PathBuf {
    root.join(groupby_dir_name(model_name, attribute))
}

/// Group values can be arbitrary field contents; keep leaf file names tame.
fn leaf_file_name(group: &str) -> String {
    let safe: String = group
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{safe}{MODEL_SUFFIX}")
}

/// Persist an ungrouped or bundle model. Returns the file path written.
pub fn save_single(root: &Path, model: &ModelWrapper) -> Result<PathBuf> {
    model.validate()?;
    std::fs::create_dir_all(root)?;
    let path = single_path(root, &model.name);
    write_record(&path, model)?;
    Ok(path)
}

/// Persist a per-group collection under its directory key. Returns the
/// directory path written.
pub fn save_group(
    root: &Path,
    dir_key: &str,
    leaves: &BTreeMap<String, ModelWrapper>,
) -> Result<PathBuf> {
    let dir = root.join(dir_key);
    std::fs::create_dir_all(&dir)?;
    for (group, leaf) in leaves {
        leaf.validate()?;
        write_record(&dir.join(leaf_file_name(group)), leaf)?;
    }
    Ok(dir)
}

fn write_record(path: &Path, model: &ModelWrapper) -> Result<()> {
    let record = ModelRecord {
        schema_version: SCHEMA_VERSION.to_string(),
        model: model.clone(),
    };
    let json = serde_json::to_string_pretty(&record)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load one model record, checking the schema version.
pub fn load(path: &Path) -> Result<ModelWrapper> {
    let text = std::fs::read_to_string(path)?;
    let record: ModelRecord = serde_json::from_str(&text)?;
    if record.schema_version != SCHEMA_VERSION {
        return Err(Error::Validation(format!(
            "unsupported model schema version '{}' in {} (expected '{}')",
            record.schema_version,
            path.display(),
            SCHEMA_VERSION
        )));
    }
    record.model.validate()?;
    Ok(record.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DensityPayload, Population, SurrogatePayload};
    use aql_estimator::KernelDensity;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("aql_warehouse_{}_{}_{}", std::process::id(), nanos, tag));
        p
    }

    fn count_only_model(name: &str) -> ModelWrapper {
        let xs: Vec<f64> = (0..20).map(|i| i as f64).collect();
        ModelWrapper {
            name: name.to_string(),
            table: "t.csv".to_string(),
            x_header: "x".to_string(),
            y_header: "y".to_string(),
            groupby_attribute: None,
            groupby_value: None,
            n_total: Population::Scalar(200),
            n_sample: Population::Scalar(20),
            x_min: Some(0.0),
            x_max: Some(19.0),
            payload: SurrogatePayload::Simple {
                density: DensityPayload::Kde(KernelDensity::fit(&xs).unwrap()),
                regression: None,
            },
        }
    }

    #[test]
    fn test_key_derivation() {
        assert_eq!(canonical_file_name("sales"), "sales.model.json");
        assert_eq!(groupby_dir_name("sales", "store"), "sales_groupby_store");
    }

    #[test]
    fn test_leaf_file_name_sanitized() {
        assert_eq!(leaf_file_name("12.5"), "12.5.model.json");
        assert_eq!(leaf_file_name("a/b"), "a_b.model.json");
    }

    #[test]
    fn test_single_roundtrip() {
        let root = tmp_root("single");
        let model = count_only_model("m1");
        let path = save_single(&root, &model).unwrap();
        assert!(path.ends_with("m1.model.json"));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.name, "m1");
        assert_eq!(loaded.n_total, Population::Scalar(200));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_load_rejects_wrong_schema() {
        let root = tmp_root("schema");
        let model = count_only_model("m2");
        let path = save_single(&root, &model).unwrap();
        let text = std::fs::read_to_string(&path)
            .unwrap()
            .replace(SCHEMA_VERSION, "0.0.1");
        std::fs::write(&path, text).unwrap();
        assert!(load(&path).is_err());

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_group_directory_layout() {
        let root = tmp_root("group");
        let mut leaves = BTreeMap::new();
        for g in ["1", "2", "3"] {
            let mut leaf = count_only_model("m3");
            leaf.groupby_attribute = Some("store".to_string());
            leaf.groupby_value = Some(g.to_string());
            leaves.insert(g.to_string(), leaf);
        }
        let dir = save_group(&root, &groupby_dir_name("m3", "store"), &leaves).unwrap();
        let n_files = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(n_files, 3);

        let _ = std::fs::remove_dir_all(&root);
    }
}
