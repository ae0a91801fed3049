// matrix_stats accumulates per-field descriptive statistics (moments, pairwise covariances and a
// streaming quantile) for multi-field observations, and combines partial results computed on
// separate shards without re-reading any observation.
// The one-pass and parallel moment formulas are the ones from Pebay's "Formulas for Robust,
// One-Pass Parallel Computation of Covariances and Arbitrary-Order Statistical Moments":
// https://www.osti.gov/biblio/1028931
// The quantile estimator is the P² algorithm of Jain & Chlamtac:
// https://www.cse.wustl.edu/~jain/papers/ftp/psqr.pdf
//

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

use thiserror::Error;

pub mod covariance;
pub mod moments;
pub mod quantile;
pub mod serialization;
pub mod snapshot;

pub use covariance::{CovarianceTable, PairKey};
pub use moments::FieldMoments;
pub use quantile::{MarkerState, MarkerUpdate, QuantileEstimator};
pub use serialization::{decode, encode, DecodeError};
pub use snapshot::{merge_all, SnapshotConfig, StatisticsSnapshot};

/// Quantile tracked by a snapshot unless configured otherwise.
pub const DEFAULT_QUANTILE: f64 = 0.9;

#[derive(Debug, PartialEq, Error)]
pub enum StatsError {
    #[error("cannot add statistics without field names")]
    MissingFieldNames,
    #[error("cannot add statistics without field values")]
    MissingFieldValues,
    #[error("number of field values ({values}) does not match number of field names ({names})")]
    LengthMismatch { names: usize, values: usize },
    #[error("field `{0}` appears more than once in a single observation")]
    DuplicateField(String),
    #[error("finite inputs overflowed a double precision accumulator")]
    DoubleOverflow,
    #[error("cannot merge statistics tracking quantile {found} into statistics tracking quantile {expected}")]
    IncompatibleQuantile { expected: f64, found: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("could not encode statistics: {0}")]
    Encode(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}
