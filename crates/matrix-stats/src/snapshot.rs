use crate::{
    covariance::CovarianceTable,
    moments::FieldMoments,
    quantile::{MarkerUpdate, QuantileEstimator},
    StatsError, DEFAULT_QUANTILE,
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Quantile estimated for every field, strictly between 0 and 1.
    pub quantile: f64,
    pub sort_initial_markers: bool,
    pub marker_update: MarkerUpdate,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            quantile: DEFAULT_QUANTILE,
            sort_initial_markers: true,
            marker_update: MarkerUpdate::Standard,
        }
    }
}

impl SnapshotConfig {
    /// Parses a config written in RON, e.g. `(quantile: 0.5)`. Missing fields take their
    /// defaults.
    pub fn from_ron(s: &str) -> Result<Self, StatsError> {
        let config: SnapshotConfig =
            ron::de::from_str(s).map_err(|e| StatsError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), StatsError> {
        if self.quantile > 0.0 && self.quantile < 1.0 {
            Ok(())
        } else {
            Err(StatsError::InvalidConfig(format!(
                "quantile must be between 0 and 1, got {}",
                self.quantile
            )))
        }
    }
}

/// Running statistics for the observations of one shard, or for a coordinator's running total.
///
/// Every observation is expected to carry a value for every tracked field; the per-field
/// moments and the covariances are only comparable when that holds. A snapshot changes only
/// through [`add`](Self::add) and [`merge`](Self::merge), neither of which is synchronized:
/// parallel scans should each own a snapshot and merge afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSnapshot {
    config: SnapshotConfig,
    count: u64,
    fields: HashMap<String, FieldMoments>,
    covariances: CovarianceTable,
    estimators: HashMap<String, QuantileEstimator>,
    quantiles: HashMap<String, f64>,
    quantile_estimate: Option<f64>,
}

impl Default for StatisticsSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsSnapshot {
    pub fn new() -> Self {
        StatisticsSnapshot {
            config: SnapshotConfig::default(),
            count: 0,
            fields: HashMap::new(),
            covariances: CovarianceTable::new(),
            estimators: HashMap::new(),
            quantiles: HashMap::new(),
            quantile_estimate: None,
        }
    }

    pub fn with_config(config: SnapshotConfig) -> Result<Self, StatsError> {
        config.validate()?;
        Ok(StatisticsSnapshot {
            config,
            ..Self::new()
        })
    }

    pub fn from_observation<S: AsRef<str>>(
        names: &[S],
        values: &[f64],
    ) -> Result<Self, StatsError> {
        let mut snapshot = Self::new();
        snapshot.add(names, values)?;
        Ok(snapshot)
    }

    pub(crate) fn from_parts(
        count: u64,
        fields: HashMap<String, FieldMoments>,
        covariances: CovarianceTable,
        quantile_estimate: Option<f64>,
    ) -> Self {
        StatisticsSnapshot {
            count,
            fields,
            covariances,
            quantile_estimate,
            ..Self::new()
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Number of observations added, directly or through merges.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn field(&self, name: &str) -> Option<&FieldMoments> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldMoments)> {
        self.fields.iter().map(|(name, moments)| (name.as_str(), moments))
    }

    pub fn covariances(&self) -> &CovarianceTable {
        &self.covariances
    }

    /// Raw co-moment of two distinct fields; `covariance(a, b) == covariance(b, a)`.
    pub fn covariance(&self, a: &str, b: &str) -> Option<f64> {
        self.covariances.get(a, b)
    }

    /// The latest quantile estimate published for `field`. Absent until the field has five
    /// observations. After a merge this is a count-weighted average of the merged estimates.
    pub fn quantile(&self, field: &str) -> Option<f64> {
        self.quantiles.get(field).copied()
    }

    /// The estimate published last, i.e. for the last field of the latest observation that
    /// produced one. This single value is all of the quantile state that survives encoding.
    pub fn quantile_estimate(&self) -> Option<f64> {
        self.quantile_estimate
    }

    pub fn estimator(&self, field: &str) -> Option<&QuantileEstimator> {
        self.estimators.get(field)
    }

    /// Adds one observation, `values[i]` being the value of field `names[i]`.
    ///
    /// The input is validated and every new accumulator value computed before anything is
    /// written, so on error the snapshot is left exactly as it was.
    pub fn add<S: AsRef<str>>(&mut self, names: &[S], values: &[f64]) -> Result<(), StatsError> {
        validate_observation(names, values)?;

        let n = self.count + 1;
        let mut moments = Vec::with_capacity(names.len());
        let mut deltas = Vec::with_capacity(names.len());
        for (name, &x) in names.iter().zip(values) {
            let name = name.as_ref();
            let updated = self
                .fields
                .get(name)
                .copied()
                .unwrap_or_default()
                .accumulated(x)?;
            deltas.push((name, x * n as f64 - updated.sum));
            moments.push(updated);
        }
        let covariances = self.covariances.pending(&deltas, n)?;

        self.count = n;
        for ((name, _), updated) in deltas.iter().zip(moments) {
            match self.fields.get_mut(*name) {
                Some(current) => *current = updated,
                None => {
                    self.fields.insert((*name).to_owned(), updated);
                }
            }
        }
        self.covariances.apply(covariances);
        for (name, &x) in names.iter().zip(values) {
            self.observe_quantile(name.as_ref(), x);
        }
        Ok(())
    }

    fn observe_quantile(&mut self, name: &str, x: f64) {
        if !self.estimators.contains_key(name) {
            let estimator = QuantileEstimator::with_marker_sorting(
                self.config.quantile,
                self.config.sort_initial_markers,
            )
            .with_marker_update(self.config.marker_update);
            self.estimators.insert(name.to_owned(), estimator);
        }
        let published = self
            .estimators
            .get_mut(name)
            .and_then(|estimator| estimator.add(x));
        if let Some(estimate) = published {
            match self.quantiles.get_mut(name) {
                Some(published) => *published = estimate,
                None => {
                    self.quantiles.insert(name.to_owned(), estimate);
                }
            }
            self.quantile_estimate = Some(estimate);
        }
    }

    /// Folds `other` into `self`, giving (up to floating point error) the statistics of both
    /// observation streams added to a single snapshot.
    ///
    /// Moments and covariances are combined exactly. Quantiles are not: P² marker state cannot
    /// be merged, so the merged estimate is the count-weighted average of the two estimates,
    /// and the estimators of `self` keep describing only the observations added to it
    /// directly. Merging an empty snapshot is a no-op; merging into an empty snapshot copies
    /// the statistics of `other` but keeps the config of `self`. On error `self` is unchanged.
    pub fn merge(&mut self, other: &StatisticsSnapshot) -> Result<(), StatsError> {
        if other.is_empty() {
            return Ok(());
        }
        *self = self.combine(other)?;
        Ok(())
    }

    pub fn combine(&self, other: &StatisticsSnapshot) -> Result<Self, StatsError> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.config.quantile != other.config.quantile {
            return Err(StatsError::IncompatibleQuantile {
                expected: self.config.quantile,
                found: other.config.quantile,
            });
        }
        if self.is_empty() {
            return Ok(StatisticsSnapshot {
                config: self.config,
                ..other.clone()
            });
        }

        let mut fields = self.fields.clone();
        let mut mean_shift = HashMap::with_capacity(other.fields.len());
        for (name, theirs) in &other.fields {
            let merged = match fields.get(name) {
                Some(ours) => {
                    mean_shift.insert(name.clone(), theirs.mean - ours.mean);
                    ours.combine(theirs)?
                }
                None => *theirs,
            };
            fields.insert(name.clone(), merged);
        }
        let covariances =
            self.covariances
                .combine(&other.covariances, self.count, other.count, &mean_shift)?;

        let mut quantiles = self.quantiles.clone();
        for (name, &theirs) in &other.quantiles {
            let merged = match quantiles.get(name) {
                Some(&ours) => weighted_average(
                    ours,
                    self.fields.get(name).map_or(0, FieldMoments::count),
                    theirs,
                    other.fields.get(name).map_or(0, FieldMoments::count),
                ),
                None => theirs,
            };
            quantiles.insert(name.clone(), merged);
        }
        let quantile_estimate = match (self.quantile_estimate, other.quantile_estimate) {
            (Some(ours), Some(theirs)) => Some(weighted_average(
                ours,
                self.count,
                theirs,
                other.count,
            )),
            (ours, theirs) => ours.or(theirs),
        };

        let mut estimators = self.estimators.clone();
        for (name, estimator) in &other.estimators {
            estimators
                .entry(name.clone())
                .or_insert_with(|| estimator.clone());
        }

        debug!(
            "merged {} observations of {} fields into {} observations of {} fields",
            other.count,
            other.fields.len(),
            self.count,
            self.fields.len()
        );
        Ok(StatisticsSnapshot {
            config: self.config,
            count: self.count + other.count,
            fields,
            covariances,
            estimators,
            quantiles,
            quantile_estimate,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StatsError> {
        crate::serialization::encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StatsError> {
        crate::serialization::decode(bytes)
    }
}

/// Left fold of `partials` into a single snapshot, as done by a coordinator.
pub fn merge_all<I>(partials: I) -> Result<StatisticsSnapshot, StatsError>
where
    I: IntoIterator<Item = StatisticsSnapshot>,
{
    let mut total = StatisticsSnapshot::new();
    for partial in partials {
        if total.is_empty() {
            total = partial;
        } else {
            total.merge(&partial)?;
        }
    }
    Ok(total)
}

fn weighted_average(a: f64, a_weight: u64, b: f64, b_weight: u64) -> f64 {
    let total = (a_weight + b_weight) as f64;
    if total == 0.0 {
        return (a + b) / 2.0;
    }
    (a * a_weight as f64 + b * b_weight as f64) / total
}

fn validate_observation<S: AsRef<str>>(names: &[S], values: &[f64]) -> Result<(), StatsError> {
    if names.is_empty() {
        return Err(StatsError::MissingFieldNames);
    } else if values.is_empty() {
        return Err(StatsError::MissingFieldValues);
    } else if names.len() != values.len() {
        return Err(StatsError::LengthMismatch {
            names: names.len(),
            values: values.len(),
        });
    }
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_ref()) {
            return Err(StatsError::DuplicateField(name.as_ref().to_owned()));
        }
    }
    Ok(())
}
