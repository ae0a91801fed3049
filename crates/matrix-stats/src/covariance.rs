// Pairwise co-moments follow the `sxy` handling of the Youngs-Cramer algorithm as used by Postgres:
// https://github.com/postgres/postgres/blob/472e518a44eacd9caac7d618f1b6451672ca4481/src/backend/utils/adt/float.c#L3260
use crate::{DecodeError, StatsError};
use std::collections::HashMap;

/// An unordered pair of distinct field names, stored with the lexicographically smaller name
/// first so that `(a, b)` and `(b, a)` share one slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    first: String,
    second: String,
}

impl PairKey {
    /// Returns `None` for a self-pair, which is never stored.
    pub fn new(a: &str, b: &str) -> Option<Self> {
        use std::cmp::Ordering::*;
        let (first, second) = match a.cmp(b) {
            Less => (a, b),
            Greater => (b, a),
            Equal => return None,
        };
        Some(PairKey {
            first: first.to_owned(),
            second: second.to_owned(),
        })
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }
}

/// Raw co-moments `sum((x - mean_x) * (y - mean_y))` for every pair of fields observed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovarianceTable {
    pairs: HashMap<PairKey, f64>,
}

/// Co-moment values computed for one observation but not yet written to the table.
#[derive(Debug)]
pub(crate) struct PendingCovariances(Vec<(PairKey, f64)>);

impl CovarianceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        self.pairs.get(&PairKey::new(a, b)?).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, f64)> {
        self.pairs.iter().map(|(k, v)| (k, *v))
    }

    // The recurrence is Sxy = Sxy_old + 1/(n(n-1)) * (nx - Sx) * (ny - Sy), where the deltas
    // (nx - Sx) are taken after the sums were updated. At n = 1 both deltas are 0, so a pair
    // seen for the first time contributes nothing on the very first observation, and its
    // full cross term on any later one.
    pub(crate) fn pending(
        &self,
        deltas: &[(&str, f64)],
        n: u64,
    ) -> Result<PendingCovariances, StatsError> {
        let n64 = n as f64;
        let scale = if n > 1 {
            (n64 * (n64 - 1.0)).recip()
        } else {
            0.0
        };
        let mut updates = Vec::with_capacity(deltas.len() * deltas.len().saturating_sub(1) / 2);
        for (i, &(f, df)) in deltas.iter().enumerate() {
            for &(g, dg) in &deltas[i + 1..] {
                let key = match PairKey::new(f, g) {
                    Some(key) => key,
                    None => continue,
                };
                let old = self.pairs.get(&key).copied().unwrap_or(0.0);
                let mut value = old + df * dg * scale;
                if value.is_infinite() {
                    if old.is_finite() && df.is_finite() && dg.is_finite() {
                        return Err(StatsError::DoubleOverflow);
                    }
                    value = f64::NAN;
                }
                updates.push((key, value));
            }
        }
        Ok(PendingCovariances(updates))
    }

    pub(crate) fn apply(&mut self, pending: PendingCovariances) {
        for (key, value) in pending.0 {
            self.pairs.insert(key, value);
        }
    }

    // Pairwise combination of two disjoint sets A and B, n = nA + nB:
    //      Sxy = SxyA + SxyB + nA * nB / n * (meanB_x - meanA_x) * (meanB_y - meanA_y)
    // `mean_shift` holds meanB - meanA for the fields observed on both sides; a pair with a
    // field missing from either side has no cross term.
    pub(crate) fn combine(
        &self,
        other: &Self,
        na: u64,
        nb: u64,
        mean_shift: &HashMap<String, f64>,
    ) -> Result<Self, StatsError> {
        let na = na as f64;
        let nb = nb as f64;
        let f = na * nb / (na + nb);
        let mut pairs = self.pairs.clone();
        for key in other.pairs.keys() {
            pairs.entry(key.clone()).or_insert(0.0);
        }
        for (key, value) in pairs.iter_mut() {
            let a = *value;
            let b = other.pairs.get(key).copied().unwrap_or(0.0);
            let cross = match (mean_shift.get(&key.first), mean_shift.get(&key.second)) {
                (Some(dx), Some(dy)) => f * dx * dy,
                _ => 0.0,
            };
            *value = a + b + cross;
            if value.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(StatsError::DoubleOverflow);
            }
        }
        Ok(CovarianceTable { pairs })
    }

    /// The wire layout: the smaller field name maps to the larger one.
    pub(crate) fn to_nested(&self) -> HashMap<String, HashMap<String, f64>> {
        let mut nested: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for (key, value) in &self.pairs {
            nested
                .entry(key.first.clone())
                .or_default()
                .insert(key.second.clone(), *value);
        }
        nested
    }

    pub(crate) fn from_nested(
        nested: HashMap<String, HashMap<String, f64>>,
    ) -> Result<Self, DecodeError> {
        let mut pairs = HashMap::new();
        for (a, inner) in nested {
            for (b, value) in inner {
                let key = PairKey::new(&a, &b).ok_or_else(|| {
                    DecodeError::Corrupted(format!("covariance of field `{a}` with itself"))
                })?;
                if pairs.insert(key, value).is_some() {
                    return Err(DecodeError::Corrupted(format!(
                        "covariance of `{a}` and `{b}` stored twice"
                    )));
                }
            }
        }
        Ok(CovarianceTable { pairs })
    }
}
