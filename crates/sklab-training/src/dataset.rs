use crate::error::{TrainingError, TrainingResult};
use crate::matrix::{CsrMatrix, FeatureMatrix};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Stable identifier for a featureset (content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeaturesetId(pub String);

impl fmt::Display for FeaturesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A class label or numeric target.
///
/// Labels are totally ordered: numbers (by value) sort before text (lexically).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Number(f64),
    Text(String),
}

impl Label {
    /// Numeric value, parsing text labels such as `"3"` when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl PartialEq for Label {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Label {}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Number(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Number(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Label {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// A single labeled example as read from a feature file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub label: Option<Label>,
    pub features: BTreeMap<String, f64>,
}

/// Frozen feature-name → column index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Build from feature names; duplicates are collapsed and names sorted.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self::from(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

impl From<Vec<String>> for Vocabulary {
    fn from(names: Vec<String>) -> Self {
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Self { names, index }
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.names
    }
}

/// Merged examples: ids, optional labels and a feature matrix over a vocabulary.
///
/// Row order is the first-seen id order of the first loaded file.
#[derive(Debug, Clone)]
pub struct FeatureSet {
    name: String,
    ids: Vec<String>,
    labels: Option<Vec<Label>>,
    features: FeatureMatrix,
    vocabulary: Vocabulary,
}

impl FeatureSet {
    pub fn new(
        name: impl Into<String>,
        ids: Vec<String>,
        labels: Option<Vec<Label>>,
        features: FeatureMatrix,
        vocabulary: Vocabulary,
    ) -> TrainingResult<Self> {
        let name = name.into();
        if features.n_rows() != ids.len() {
            return Err(TrainingError::input(format!(
                "featureset '{name}' has {} ids but {} feature rows",
                ids.len(),
                features.n_rows()
            )));
        }
        if features.n_cols() != vocabulary.len() {
            return Err(TrainingError::input(format!(
                "featureset '{name}' has {} columns but {} feature names",
                features.n_cols(),
                vocabulary.len()
            )));
        }
        if let Some(labels) = &labels {
            if labels.len() != ids.len() {
                return Err(TrainingError::input(format!(
                    "featureset '{name}' has {} ids but {} labels",
                    ids.len(),
                    labels.len()
                )));
            }
        }
        let mut seen = HashSet::with_capacity(ids.len());
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(TrainingError::input(format!("featureset '{name}' has duplicate id '{id}'")));
            }
        }
        Ok(Self { name, ids, labels, features, vocabulary })
    }

    /// Build from in-memory examples, using the sorted union of feature names as columns.
    pub fn from_examples(name: impl Into<String>, examples: &[Example]) -> TrainingResult<Self> {
        let vocabulary = Vocabulary::from_names(examples.iter().flat_map(|e| e.features.keys().cloned()));
        let rows = examples
            .iter()
            .map(|e| {
                e.features
                    .iter()
                    .filter_map(|(k, v)| vocabulary.column(k).map(|c| (c, *v)))
                    .collect()
            })
            .collect();
        let features = FeatureMatrix::Sparse(CsrMatrix::from_rows(vocabulary.len(), rows));
        let labels = collect_labels(examples.iter().map(|e| e.label.clone()))?;
        let ids = examples.iter().map(|e| e.id.clone()).collect();
        Self::new(name, ids, labels, features, vocabulary)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn labels(&self) -> Option<&[Label]> {
        self.labels.as_deref()
    }

    pub fn require_labels(&self) -> TrainingResult<&[Label]> {
        self.labels()
            .ok_or_else(|| TrainingError::input(format!("featureset '{}' has no labels", self.name)))
    }

    pub fn features(&self) -> &FeatureMatrix {
        &self.features
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    #[must_use]
    pub fn into_dense(mut self) -> Self {
        self.features = self.features.into_dense();
        self
    }

    /// Rows at `rows`, in that order, sharing this featureset's vocabulary.
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            name: self.name.clone(),
            ids: rows.iter().map(|&r| self.ids[r].clone()).collect(),
            labels: self.labels.as_ref().map(|l| rows.iter().map(|&r| l[r].clone()).collect()),
            features: self.features.select_rows(rows),
            vocabulary: self.vocabulary.clone(),
        }
    }

    /// Features re-indexed onto `target`: unseen names are dropped, missing ones stay zero.
    pub fn project(&self, target: &Vocabulary) -> FeatureMatrix {
        if *target == self.vocabulary {
            return self.features.clone();
        }
        let remap: Vec<Option<usize>> = self.vocabulary.names().iter().map(|n| target.column(n)).collect();
        let mut rows = vec![Vec::new(); self.len()];
        self.features.for_each_nonzero(|r, c, v| {
            if let Some(col) = remap[c] {
                rows[r].push((col, v));
            }
        });
        FeatureMatrix::Sparse(CsrMatrix::from_rows(target.len(), rows))
    }

    /// Content hash over ids, labels and non-zero features.
    pub fn fingerprint(&self) -> FeaturesetId {
        let mut rows = vec![Vec::new(); self.len()];
        self.features.for_each_nonzero(|r, c, v| rows[r].push((c, v)));

        let mut hasher = Sha256::new();
        for (i, id) in self.ids.iter().enumerate() {
            hasher.update(id.as_bytes());
            hasher.update(b"\t");
            if let Some(labels) = &self.labels {
                hasher.update(labels[i].to_string().as_bytes());
            }
            for (c, v) in &rows[i] {
                hasher.update(b"\t");
                hasher.update(self.vocabulary.names()[*c].as_bytes());
                hasher.update(b"=");
                hasher.update(v.to_string().as_bytes());
            }
            hasher.update(b"\n");
        }
        FeaturesetId(hex::encode(hasher.finalize()))
    }
}

/// All-or-none label collection: either every example is labeled or none is.
pub(crate) fn collect_labels<I>(labels: I) -> TrainingResult<Option<Vec<Label>>>
where
    I: IntoIterator<Item = Option<Label>>,
{
    let labels: Vec<Option<Label>> = labels.into_iter().collect();
    let labeled = labels.iter().filter(|l| l.is_some()).count();
    if labeled == 0 {
        return Ok(None);
    }
    if labeled != labels.len() {
        return Err(TrainingError::input(format!(
            "{} of {} examples are missing labels",
            labels.len() - labeled,
            labels.len()
        )));
    }
    Ok(Some(labels.into_iter().flatten().collect()))
}
