use crate::dataset::{Example, FeatureSet, Label};
use crate::error::{TrainingError, TrainingResult};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Keep the merged matrix in CSR form; otherwise densify after merging.
    pub sparse: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self { sparse: true }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    y: Option<Label>,
    #[serde(default)]
    x: BTreeMap<String, serde_json::Value>,
}

/// Load and merge the named feature files `<dir>/<name><suffix>` into one featureset.
///
/// Every file must cover exactly the same ids. Rows follow the id order of the
/// first file; columns are the sorted union of all feature names.
pub fn load_featureset<S: AsRef<str>>(
    dir: &Path,
    names: &[S],
    suffix: &str,
    options: &LoadOptions,
) -> TrainingResult<FeatureSet> {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    let Some(first_name) = names.first() else {
        return Err(TrainingError::input("featureset must name at least one feature file"));
    };

    let mut seen = HashSet::new();
    for name in &names {
        if !seen.insert(*name) {
            return Err(TrainingError::input(format!(
                "featureset {names:?} lists '{name}' more than once; a feature file cannot be merged with itself"
            )));
        }
    }

    let mut merged = read_examples(&dir.join(format!("{first_name}{suffix}")))?;
    let row_of: HashMap<String, usize> = merged.iter().enumerate().map(|(i, e)| (e.id.clone(), i)).collect();

    for name in &names[1..] {
        let path = dir.join(format!("{name}{suffix}"));
        let examples = read_examples(&path)?;

        if examples.len() != merged.len() || examples.iter().any(|e| !row_of.contains_key(&e.id)) {
            return Err(TrainingError::input(format!(
                "ids in '{name}' do not match ids in '{first_name}' ({} vs {} examples); merged feature files must cover the same examples",
                examples.len(),
                merged.len()
            )));
        }

        for example in examples {
            let target = &mut merged[row_of[&example.id]];
            if let Some(label) = example.label {
                if let Some(existing) = target.label.as_ref().filter(|existing| **existing != label) {
                    return Err(TrainingError::input(format!(
                        "label mismatch for id '{}': '{existing}' vs '{label}' in '{name}'",
                        example.id
                    )));
                }
                target.label.get_or_insert(label);
            }
            for (feature, value) in example.features {
                if target.features.insert(feature.clone(), value).is_some() {
                    return Err(TrainingError::input(format!(
                        "feature '{feature}' for id '{}' is defined by more than one feature file",
                        example.id
                    )));
                }
            }
        }
    }

    let featureset = FeatureSet::from_examples(names.join("+"), &merged)?;
    tracing::info!(
        featureset = featureset.name(),
        examples = featureset.len(),
        features = featureset.vocabulary().len(),
        "loaded featureset"
    );

    Ok(if options.sparse { featureset } else { featureset.into_dense() })
}

/// Read one feature file, dispatching on its extension.
///
/// `.jsonlines`, `.jsonl` and `.ndjson` files hold one `{"id", "y", "x"}` record
/// per line; `.tsv` and `.csv` files hold `id` and `y` columns plus one column
/// per feature.
pub fn read_examples(path: &Path) -> TrainingResult<Vec<Example>> {
    if !path.exists() {
        return Err(TrainingError::input(format!("feature file does not exist: {}", path.display())));
    }

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_lowercase();
    let examples = match ext.as_str() {
        "jsonlines" | "jsonl" | "ndjson" => read_jsonl_examples(path)?,
        "tsv" => read_delimited_examples(path, b'\t')?,
        "csv" => read_delimited_examples(path, b',')?,
        other => {
            return Err(TrainingError::input(format!(
                "unsupported feature file extension '.{other}': {}",
                path.display()
            )));
        }
    };

    let mut ids = HashSet::with_capacity(examples.len());
    for ex in &examples {
        if !ids.insert(ex.id.as_str()) {
            return Err(TrainingError::input(format!("duplicate id '{}' in {}", ex.id, path.display())));
        }
    }

    Ok(examples)
}

fn read_jsonl_examples(path: &Path) -> TrainingResult<Vec<Example>> {
    let contents = std::fs::read_to_string(path)?;
    let mut examples = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: JsonRecord = serde_json::from_str(line).map_err(|e| {
            TrainingError::input(format!("failed to parse {} line {}: {}", path.display(), idx + 1, e))
        })?;

        let id = match record.id {
            None | Some(serde_json::Value::Null) => format!("EXAMPLE_{}", examples.len()),
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(TrainingError::input(format!(
                    "{} line {}: id must be a string or number, got {other}",
                    path.display(),
                    idx + 1
                )));
            }
        };

        let mut features = BTreeMap::new();
        for (name, value) in record.x {
            let (name, value) = feature_value(name, &value).ok_or_else(|| {
                TrainingError::input(format!(
                    "{} line {}: unsupported value {value} for feature",
                    path.display(),
                    idx + 1
                ))
            })?;
            features.insert(name, value);
        }

        examples.push(Example { id, label: record.y, features });
    }

    Ok(examples)
}

/// Numbers map to themselves, booleans to 0/1 and strings to a `name=value` indicator.
fn feature_value(name: String, value: &serde_json::Value) -> Option<(String, f64)> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().map(|v| (name, v)),
        serde_json::Value::Bool(b) => Some((name, f64::from(u8::from(*b)))),
        serde_json::Value::String(s) => Some((format!("{name}={s}"), 1.0)),
        _ => None,
    }
}

fn read_delimited_examples(path: &Path, delimiter: u8) -> TrainingResult<Vec<Example>> {
    let mut reader = csv::ReaderBuilder::new().delimiter(delimiter).has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let id_col = headers.iter().position(|h| h == "id");
    let label_col = headers.iter().position(|h| h == "y");

    let mut examples = Vec::new();
    for record in reader.records() {
        let record = record?;
        let id = id_col
            .and_then(|c| record.get(c))
            .map_or_else(|| format!("EXAMPLE_{}", examples.len()), ToString::to_string);
        let label = label_col.and_then(|c| record.get(c)).filter(|s| !s.is_empty()).map(|s| {
            s.parse::<f64>().map_or_else(|_| Label::Text(s.to_string()), Label::Number)
        });

        let mut features = BTreeMap::new();
        for (col, (header, raw)) in headers.iter().zip(record.iter()).enumerate() {
            if Some(col) == id_col || Some(col) == label_col || raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>() {
                Ok(v) => features.insert(header.to_string(), v),
                Err(_) => features.insert(format!("{header}={raw}"), 1.0),
            };
        }

        examples.push(Example { id, label, features });
    }

    Ok(examples)
}

/// Write examples as `.jsonlines` records.
pub fn write_jsonl_examples(path: &Path, examples: &[Example]) -> TrainingResult<()> {
    let mut out = String::new();
    for ex in examples {
        let record = serde_json::json!({ "id": ex.id, "y": ex.label, "x": ex.features });
        out.push_str(&serde_json::to_string(&record)?);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}
