//! Binary transport format for [`StatisticsSnapshot`].
//!
//! A snapshot is written as nine values, in this order:
//!
//! | value            | type                            |
//! |------------------|---------------------------------|
//! | observation count| `i64`                           |
//! | sums             | `map<string, f64>`              |
//! | counts           | `map<string, i64>`              |
//! | means            | `map<string, f64>`              |
//! | m2               | `map<string, f64>`              |
//! | m3               | `map<string, f64>`              |
//! | m4               | `map<string, f64>`              |
//! | covariances      | `map<string, map<string, f64>>` |
//! | quantile estimate| `f64`                           |
//!
//! Every value is preceded by a `u32` type tag and maps are an `u64` entry count followed by
//! the entries, in no particular order (bincode's encoding of a tagged [`WireValue`]).
//! Covariances are stored under the smaller field name of each pair. Only the last published
//! quantile estimate is transmitted, NaN standing for "none yet": the P² marker state is
//! dropped, so snapshots merged after a round trip can only average their estimates.
use crate::{covariance::CovarianceTable, FieldMoments, StatisticsSnapshot, StatsError};
use bincode::Options;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("statistics buffer ended early")]
    Truncated,
    #[error("value {position} of the statistics buffer is a {found}, expected a {expected}")]
    TypeMismatch {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("{0} unexpected bytes after the statistics")]
    TrailingBytes(usize),
    #[error("corrupted statistics: {0}")]
    Corrupted(String),
}

#[derive(Debug, Serialize, Deserialize)]
enum WireValue {
    Long(i64),
    Double(f64),
    DoubleMap(HashMap<String, f64>),
    LongMap(HashMap<String, i64>),
    NestedDoubleMap(HashMap<String, HashMap<String, f64>>),
}

impl WireValue {
    fn kind(&self) -> &'static str {
        use WireValue::*;
        match self {
            Long(_) => "long",
            Double(_) => "double",
            DoubleMap(_) => "map of doubles",
            LongMap(_) => "map of longs",
            NestedDoubleMap(_) => "map of maps of doubles",
        }
    }
}

/// Writes `snapshot` in the layout above.
///
/// NaN marks a missing quantile estimate, so an estimate that is itself NaN (which NaN
/// observations can produce) decodes as no estimate at all. Every other value, moments and
/// covariances included, round trips bit for bit.
pub fn encode(snapshot: &StatisticsSnapshot) -> Result<Vec<u8>, StatsError> {
    let count = i64::try_from(snapshot.count())
        .map_err(|_| StatsError::Encode(format!("count {} too large", snapshot.count())))?;
    let per_field = |f: fn(&FieldMoments) -> f64| {
        WireValue::DoubleMap(
            snapshot
                .fields()
                .map(|(name, moments)| (name.to_owned(), f(moments)))
                .collect(),
        )
    };
    let mut counts = HashMap::new();
    for (name, moments) in snapshot.fields() {
        let n = i64::try_from(moments.count)
            .map_err(|_| StatsError::Encode(format!("count of `{name}` too large")))?;
        counts.insert(name.to_owned(), n);
    }

    let values = [
        WireValue::Long(count),
        per_field(|m| m.sum),
        WireValue::LongMap(counts),
        per_field(|m| m.mean),
        per_field(|m| m.m2),
        per_field(|m| m.m3),
        per_field(|m| m.m4),
        WireValue::NestedDoubleMap(snapshot.covariances().to_nested()),
        WireValue::Double(snapshot.quantile_estimate().unwrap_or(f64::NAN)),
    ];

    let size = values
        .iter()
        .map(bincode::serialized_size)
        .sum::<Result<u64, _>>()
        .map_err(|e| StatsError::Encode(e.to_string()))?;
    let mut bytes = Vec::with_capacity(size as usize);
    for value in &values {
        bincode::serialize_into(&mut bytes, value).map_err(|e| StatsError::Encode(e.to_string()))?;
    }
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<StatisticsSnapshot, StatsError> {
    let mut reader = WireReader {
        input: bytes,
        position: 0,
    };
    let count = reader.long()?;
    let sums = reader.double_map()?;
    let counts = reader.long_map()?;
    let means = reader.double_map()?;
    let m2 = reader.double_map()?;
    let m3 = reader.double_map()?;
    let m4 = reader.double_map()?;
    let covariances = reader.nested_double_map()?;
    let quantile = reader.double()?;
    if !reader.input.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.input.len()).into());
    }

    let count = u64::try_from(count)
        .map_err(|_| DecodeError::Corrupted(format!("negative observation count {count}")))?;
    for (what, map_len) in [
        ("counts", counts.len()),
        ("means", means.len()),
        ("m2", m2.len()),
        ("m3", m3.len()),
        ("m4", m4.len()),
    ] {
        if map_len != sums.len() {
            return Err(DecodeError::Corrupted(format!(
                "{map_len} {what} for {} fields",
                sums.len()
            ))
            .into());
        }
    }

    let mut fields = HashMap::with_capacity(sums.len());
    for (name, sum) in sums {
        let missing = |what: &str| DecodeError::Corrupted(format!("no {what} for field `{name}`"));
        let field_count = *counts.get(&name).ok_or_else(|| missing("count"))?;
        let moments = FieldMoments {
            count: u64::try_from(field_count).map_err(|_| {
                DecodeError::Corrupted(format!("negative count {field_count} for `{name}`"))
            })?,
            sum,
            mean: *means.get(&name).ok_or_else(|| missing("mean"))?,
            m2: *m2.get(&name).ok_or_else(|| missing("m2"))?,
            m3: *m3.get(&name).ok_or_else(|| missing("m3"))?,
            m4: *m4.get(&name).ok_or_else(|| missing("m4"))?,
        };
        fields.insert(name, moments);
    }
    let covariances = CovarianceTable::from_nested(covariances)?;
    let quantile = if quantile.is_nan() {
        None
    } else {
        Some(quantile)
    };

    debug!(
        "decoded statistics of {} observations over {} fields from {} bytes",
        count,
        fields.len(),
        bytes.len()
    );
    Ok(StatisticsSnapshot::from_parts(
        count,
        fields,
        covariances,
        quantile,
    ))
}

struct WireReader<'b> {
    input: &'b [u8],
    position: usize,
}

macro_rules! expect_value {
    ($name: ident, $variant: ident, $t: ty, $expected: literal) => {
        fn $name(&mut self) -> Result<$t, DecodeError> {
            match self.next()? {
                WireValue::$variant(v) => Ok(v),
                other => Err(DecodeError::TypeMismatch {
                    position: self.position - 1,
                    expected: $expected,
                    found: other.kind(),
                }),
            }
        }
    };
}

impl<'b> WireReader<'b> {
    // The limit keeps a corrupt length prefix from allocating more than the input holds.
    fn next(&mut self) -> Result<WireValue, DecodeError> {
        let value = bincode::options()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(self.input.len() as u64)
            .deserialize_from(&mut self.input)
            .map_err(from_bincode)?;
        self.position += 1;
        Ok(value)
    }

    expect_value!(long, Long, i64, "long");
    expect_value!(double, Double, f64, "double");
    expect_value!(double_map, DoubleMap, HashMap<String, f64>, "map of doubles");
    expect_value!(long_map, LongMap, HashMap<String, i64>, "map of longs");
    expect_value!(
        nested_double_map,
        NestedDoubleMap,
        HashMap<String, HashMap<String, f64>>,
        "map of maps of doubles"
    );
}

fn from_bincode(e: bincode::Error) -> DecodeError {
    match *e {
        bincode::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            DecodeError::Truncated
        }
        // a value longer than what is left of the input
        bincode::ErrorKind::SizeLimit => DecodeError::Truncated,
        other => DecodeError::Corrupted(other.to_string()),
    }
}
