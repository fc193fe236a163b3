//! Sampling service over delimited sources.
//!
//! Training never scans a source twice for the same information: one pass
//! draws the sample (Bernoulli row fraction or absolute-size reservoir) and
//! counts the rows seen. Per-group totals come from a dedicated counting
//! pass, or from a precomputed summary file when a full scan is too
//! expensive.

use std::collections::BTreeMap;
use std::path::Path;

use aql_core::{Error, Result, SamplingMethod};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Columns drawn from a source, plus scan bookkeeping.
#[derive(Debug, Clone)]
pub struct SampleSet {
    /// Independent-variable values.
    pub xs: Vec<f64>,
    /// Dependent-variable values.
    pub ys: Vec<f64>,
    /// Group labels, when a group column was requested.
    pub groups: Option<Vec<String>>,
    /// Data rows seen in the source (sampled or not).
    pub n_scanned: u64,
}

impl SampleSet {
    /// Number of sampled rows.
    pub fn len(&self) -> usize {
        self.xs.len()
    }

    /// Whether the sample is empty.
    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Sampled row count per group label.
    pub fn group_counts(&self) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        if let Some(groups) = &self.groups {
            for g in groups {
                *counts.entry(g.clone()).or_insert(0_u64) += 1;
            }
        }
        counts
    }

    /// Keep only rows whose group label parses as a number, trimming the
    /// label. Rows without a group column are all dropped.
    pub fn retain_numeric_groups(&mut self) {
        let keep: Vec<bool> = match &self.groups {
            None => vec![false; self.xs.len()],
            Some(groups) => groups.iter().map(|g| g.trim().parse::<f64>().is_ok()).collect(),
        };
        let mut idx = 0;
        self.xs.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        let mut idx = 0;
        self.ys.retain(|_| {
            let k = keep[idx];
            idx += 1;
            k
        });
        if let Some(groups) = &mut self.groups {
            let mut idx = 0;
            groups.retain(|_| {
                let k = keep[idx];
                idx += 1;
                k
            });
            groups.iter_mut().for_each(|g| *g = g.trim().to_string());
        }
    }
}

/// One parsed source row.
type Row = (f64, f64, Option<String>);

/// Draws samples from delimited files.
#[derive(Debug, Clone)]
pub struct Sampler {
    delimiter: char,
    headers: Option<Vec<String>>,
    seed: Option<u64>,
}

impl Sampler {
    /// Sampler for sources delimited by `delimiter`.
    pub fn new(delimiter: char) -> Self {
        Self { delimiter, headers: None, seed: None }
    }

    /// Supply the header row externally (for headerless sources).
    pub fn with_headers(mut self, headers: Option<Vec<String>>) -> Self {
        self.headers = headers;
        self
    }

    /// Fix the RNG seed (tests and reproducible runs).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Draw a sample of the `x`/`y` (and optionally `group`) columns.
    ///
    /// `ratio ≤ 1` keeps each row independently with that probability;
    /// `ratio > 1` draws a uniform reservoir of that absolute size. Rows
    /// whose x or y fail to parse as numbers are skipped (still counted as
    /// scanned).
    pub fn make_sample(
        &self,
        source: &Path,
        x: &str,
        y: &str,
        group: Option<&str>,
        ratio: f64,
        method: SamplingMethod,
    ) -> Result<SampleSet> {
        if !(ratio > 0.0) {
            return Err(Error::Validation(format!("sampling size must be > 0, got {ratio}")));
        }
        match method {
            SamplingMethod::Uniform => {}
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter as u8)
            .has_headers(self.headers.is_none())
            .flexible(true)
            .from_path(source)
            .map_err(|e| csv_error(source, e))?;

        let header_row: Vec<String> = match &self.headers {
            Some(h) => h.clone(),
            None => reader
                .headers()
                .map_err(|e| csv_error(source, e))?
                .iter()
                .map(|h| h.trim().to_string())
                .collect(),
        };
        let xi = column_index(&header_row, x, source)?;
        let yi = column_index(&header_row, y, source)?;
        let gi = group.map(|g| column_index(&header_row, g, source)).transpose()?;

        let mut rng = self.rng();
        let mut n_scanned = 0_u64;
        let mut n_eligible = 0_u64;
        let mut kept: Vec<Row> = Vec::new();
        let absolute = ratio > 1.0;
        let target = ratio as usize;

        for record in reader.records() {
            let record = record.map_err(|e| csv_error(source, e))?;
            n_scanned += 1;

            let Some(parsed) = parse_row(&record, xi, yi, gi) else {
                continue;
            };
            n_eligible += 1;

            if absolute {
                // Uniform reservoir of `target` rows.
                if kept.len() < target {
                    kept.push(parsed);
                } else {
                    let j = rng.gen_range(0..n_eligible);
                    if (j as usize) < target {
                        kept[j as usize] = parsed;
                    }
                }
            } else if rng.gen::<f64>() < ratio {
                kept.push(parsed);
            }
        }

        let mut xs = Vec::with_capacity(kept.len());
        let mut ys = Vec::with_capacity(kept.len());
        let mut groups = gi.map(|_| Vec::with_capacity(kept.len()));
        for (xv, yv, gv) in kept {
            xs.push(xv);
            ys.push(yv);
            if let (Some(groups), Some(gv)) = (&mut groups, gv) {
                groups.push(gv);
            }
        }
        Ok(SampleSet { xs, ys, groups, n_scanned })
    }
}

fn parse_row(record: &csv::StringRecord, xi: usize, yi: usize, gi: Option<usize>) -> Option<Row> {
    let xv: f64 = record.get(xi)?.trim().parse().ok()?;
    let yv: f64 = record.get(yi)?.trim().parse().ok()?;
    if !xv.is_finite() || !yv.is_finite() {
        return None;
    }
    let gv = match gi {
        None => None,
        Some(gi) => {
            let raw = record.get(gi)?.trim();
            if raw.is_empty() {
                return None;
            }
            Some(raw.to_string())
        }
    };
    Some((xv, yv, gv))
}

fn column_index(headers: &[String], name: &str, source: &Path) -> Result<usize> {
    headers.iter().position(|h| h == name).ok_or_else(|| {
        Error::Validation(format!(
            "column '{}' not found in {} (available: {})",
            name,
            source.display(),
            headers.join(", ")
        ))
    })
}

fn csv_error(source: &Path, e: csv::Error) -> Error {
    Error::Validation(format!("failed to read '{}': {}", source.display(), e))
}

/// Count rows per group value with a full pass over the source.
pub fn group_counts_from_source(
    source: &Path,
    attribute: &str,
    delimiter: char,
    headers: Option<&[String]>,
) -> Result<BTreeMap<String, u64>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(headers.is_none())
        .flexible(true)
        .from_path(source)
        .map_err(|e| csv_error(source, e))?;

    let header_row: Vec<String> = match headers {
        Some(h) => h.to_vec(),
        None => reader
            .headers()
            .map_err(|e| csv_error(source, e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect(),
    };
    let gi = column_index(&header_row, attribute, source)?;

    let mut counts = BTreeMap::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(source, e))?;
        let Some(value) = record.get(gi) else { continue };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        *counts.entry(value.to_string()).or_insert(0_u64) += 1;
    }
    Ok(counts)
}

/// Read per-group totals from a precomputed summary file
/// (`<group><sep><count>` per line). Avoids rescanning a large source just
/// for cardinalities.
pub fn group_counts_from_summary(path: &Path, sep: char) -> Result<BTreeMap<String, u64>> {
    let text = std::fs::read_to_string(path)?;
    let mut counts = BTreeMap::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(sep);
        let group = fields.next().unwrap_or_default().trim();
        let count = fields.next().map(str::trim).ok_or_else(|| {
            Error::Validation(format!(
                "summary file {} line {}: expected '<group>{sep}<count>'",
                path.display(),
                lineno + 1
            ))
        })?;
        let count: u64 = count.parse().map_err(|_| {
            Error::Validation(format!(
                "summary file {} line {}: bad count '{count}'",
                path.display(),
                lineno + 1
            ))
        })?;
        counts.insert(group.to_string(), count);
    }
    Ok(counts)
}

/// Materialize a sample as CSV next to the model artifacts.
pub fn write_sample_csv(
    sample: &SampleSet,
    path: &Path,
    x: &str,
    y: &str,
    group: Option<&str>,
    delimiter: char,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter as u8)
        .from_path(path)
        .map_err(|e| csv_error(path, e))?;

    let mut header = vec![x, y];
    if let Some(g) = group {
        header.push(g);
    }
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;

    for i in 0..sample.len() {
        let xv = sample.xs[i].to_string();
        let yv = sample.ys[i].to_string();
        let mut row = vec![xv, yv];
        if let Some(groups) = &sample.groups {
            row.push(groups[i].clone());
        }
        writer.write_record(&row).map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn tmp_file(tag: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let mut p = std::env::temp_dir();
        p.push(format!("aql_sampling_{}_{}_{}.csv", std::process::id(), nanos, tag));
        p
    }

    fn write_source(tag: &str, rows: usize) -> PathBuf {
        let path = tmp_file(tag);
        let mut text = String::from("x,y,store\n");
        for i in 0..rows {
            text.push_str(&format!("{},{},{}\n", i, 2 * i, i % 3 + 1));
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_full_sample_keeps_every_parsable_row() {
        let path = write_source("full", 50);
        let sample = Sampler::new(',')
            .with_seed(7)
            .make_sample(&path, "x", "y", None, 1.0, SamplingMethod::Uniform)
            .unwrap();
        assert_eq!(sample.len(), 50);
        assert_eq!(sample.n_scanned, 50);
        assert!(sample.groups.is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_reservoir_hits_absolute_size() {
        let path = write_source("reservoir", 200);
        let sample = Sampler::new(',')
            .with_seed(7)
            .make_sample(&path, "x", "y", Some("store"), 20.0, SamplingMethod::Uniform)
            .unwrap();
        assert_eq!(sample.len(), 20);
        assert_eq!(sample.n_scanned, 200);
        assert_eq!(sample.groups.as_ref().unwrap().len(), 20);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_column_is_reported() {
        let path = write_source("badcol", 5);
        let err = Sampler::new(',')
            .make_sample(&path, "nope", "y", None, 1.0, SamplingMethod::Uniform)
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_unparsable_rows_skipped_but_scanned() {
        let path = tmp_file("dirty");
        std::fs::write(&path, "x,y\n1,2\nbad,3\n4,\n5,6\n").unwrap();
        let sample = Sampler::new(',')
            .make_sample(&path, "x", "y", None, 1.0, SamplingMethod::Uniform)
            .unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample.n_scanned, 4);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_group_counts_from_source() {
        let path = write_source("counts", 30);
        let counts = group_counts_from_source(&path, "store", ',', None).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.values().sum::<u64>(), 30);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_group_counts_from_summary() {
        let path = tmp_file("summary");
        std::fs::write(&path, "1,100\n2,250\n\n3,50\n").unwrap();
        let counts = group_counts_from_summary(&path, ',').unwrap();
        assert_eq!(counts["1"], 100);
        assert_eq!(counts["2"], 250);
        assert_eq!(counts["3"], 50);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_summary_rejects_bad_count() {
        let path = tmp_file("badsummary");
        std::fs::write(&path, "1,abc\n").unwrap();
        assert!(group_counts_from_summary(&path, ',').is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_retain_numeric_groups() {
        let mut sample = SampleSet {
            xs: vec![1.0, 2.0, 3.0],
            ys: vec![10.0, 20.0, 30.0],
            groups: Some(vec![" 5 ".to_string(), "oops".to_string(), "7".to_string()]),
            n_scanned: 3,
        };
        sample.retain_numeric_groups();
        assert_eq!(sample.xs, vec![1.0, 3.0]);
        assert_eq!(sample.ys, vec![10.0, 30.0]);
        assert_eq!(sample.groups.as_ref().unwrap(), &vec!["5".to_string(), "7".to_string()]);
    }

    #[test]
    fn test_external_headers_for_headerless_source() {
        let path = tmp_file("headerless");
        std::fs::write(&path, "1,2\n3,4\n").unwrap();
        let sample = Sampler::new(',')
            .with_headers(Some(vec!["x".to_string(), "y".to_string()]))
            .make_sample(&path, "x", "y", None, 1.0, SamplingMethod::Uniform)
            .unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample.xs, vec![1.0, 3.0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sample_roundtrip_through_csv() {
        let sample = SampleSet {
            xs: vec![1.5, 2.5],
            ys: vec![3.0, 4.0],
            groups: Some(vec!["a".to_string(), "b".to_string()]),
            n_scanned: 2,
        };
        let path = tmp_file("materialized");
        write_sample_csv(&sample, &path, "x", "y", Some("g"), ',').unwrap();

        let re = Sampler::new(',')
            .make_sample(&path, "x", "y", Some("g"), 1.0, SamplingMethod::Uniform)
            .unwrap();
        assert_eq!(re.xs, sample.xs);
        assert_eq!(re.ys, sample.ys);
        assert_eq!(re.groups, sample.groups);
        let _ = std::fs::remove_file(&path);
    }
}
