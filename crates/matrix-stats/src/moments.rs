use crate::StatsError;
use serde::{Deserialize, Serialize};

/// Running moments of a single field.
///
/// `m2`, `m3` and `m4` are the raw central-moment sums `sum((x - mean)^k)`; they are not
/// divided by the count. The normalized accessors below divide without checking the count,
/// so variance is meaningless for `count < 2`, skewness for `count < 3` and kurtosis for
/// `count < 4` (the result is NaN or infinite rather than an error).
#[derive(Debug, PartialEq, Copy, Clone, Default, Serialize, Deserialize)]
pub struct FieldMoments {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub m2: f64, // sum((x-mean)^2)
    pub m3: f64, // sum((x-mean)^3)
    pub m4: f64, // sum((x-mean)^4)
}

impl FieldMoments {
    pub fn new() -> Self {
        Self::default()
    }

    fn n64(&self) -> f64 {
        self.count as f64
    }

    // The one-pass update: with n the count after this observation, d = x - mean and
    // dn = d / n,
    //      mean += dn
    //      m2 += d * dn * (n - 1)
    //      m3 += d * dn * (n - 1) * dn * (n - 2) - 3 * dn * m2_old
    //      m4 += d * dn * (n - 1) * dn^2 * (n^2 - 3n + 3) + 6 * dn^2 * m2_old - 4 * dn * m3_old
    // Every right hand side reads the moments from before the update.
    /// Returns these moments with `x` folded in, leaving `self` untouched.
    pub fn accumulated(&self, x: f64) -> Result<Self, StatsError> {
        let mut r = FieldMoments {
            count: self.count + 1,
            sum: self.sum + x,
            ..*self
        };
        if self.count == 0 {
            r.mean = x;
            r.m2 = 0.0;
            r.m3 = 0.0;
            r.m4 = 0.0;
            // first input, leave the moments alone unless it is infinite
            if !x.is_finite() {
                r.set_moments_nan();
            }
            return Ok(r);
        }

        let n = r.n64();
        let d = x - self.mean;
        let dn = d / n;
        let dn2 = dn * dn;
        let t1 = d * dn * (n - 1.0);
        r.mean = self.mean + dn;
        r.m2 = self.m2 + t1;
        r.m3 = self.m3 + t1 * dn * (n - 2.0) - 3.0 * dn * self.m2;
        r.m4 = self.m4 + t1 * dn2 * (n * n - 3.0 * n + 3.0) + 6.0 * dn2 * self.m2
            - 4.0 * dn * self.m3;

        if r.has_infinite() {
            if self.sum.is_finite() && x.is_finite() {
                return Err(StatsError::DoubleOverflow);
            }
            // an infinite input makes every central moment a product of infinities
            r.set_moments_nan();
        }
        Ok(r)
    }

    pub fn accum(&mut self, x: f64) -> Result<(), StatsError> {
        *self = self.accumulated(x)?;
        Ok(())
    }

    pub fn new_from_vec(v: Vec<f64>) -> Result<Self, StatsError> {
        let mut r = FieldMoments::new();
        for x in v {
            r.accum(x)?;
        }
        Ok(r)
    }

    fn has_infinite(&self) -> bool {
        self.sum.is_infinite()
            || self.mean.is_infinite()
            || self.m2.is_infinite()
            || self.m3.is_infinite()
            || self.m4.is_infinite()
    }

    fn set_moments_nan(&mut self) {
        self.m2 = f64::NAN;
        self.m3 = f64::NAN;
        self.m4 = f64::NAN;
    }

    // Pairwise combination of two disjoint sets A and B, n = nA + nB, d = meanB - meanA:
    //      mean = (nA * meanA + nB * meanB) / n
    //      m2 = m2A + m2B + d^2 * nA * nB / n
    //      m3 = m3A + m3B + d^3 * nA * nB * (nA - nB) / n^2 + 3d * (nA * m2B - nB * m2A) / n
    //      m4 = m4A + m4B + d^4 * nA * nB * (nA^2 - nA * nB + nB^2) / n^3
    //           + 6d^2 * (nA^2 * m2B + nB^2 * m2A) / n^2 + 4d * (nA * m3B - nB * m3A) / n
    pub fn combine(&self, other: &Self) -> Result<Self, StatsError> {
        if other.count == 0 {
            return Ok(*self);
        } else if self.count == 0 {
            return Ok(*other);
        }
        let na = self.n64();
        let nb = other.n64();
        let n = na + nb;
        let n2 = n * n;
        let d = other.mean - self.mean;
        let d2 = d * d;
        let d3 = d * d2;
        let d4 = d2 * d2;
        let r = FieldMoments {
            count: self.count + other.count,
            sum: self.sum + other.sum,
            mean: (na * self.mean + nb * other.mean) / n,
            m2: self.m2 + other.m2 + d2 * na * nb / n,
            m3: self.m3
                + other.m3
                + d3 * na * nb * (na - nb) / n2
                + 3.0 * d * (na * other.m2 - nb * self.m2) / n,
            m4: self.m4
                + other.m4
                + d4 * na * nb * (na * na - na * nb + nb * nb) / (n2 * n)
                + 6.0 * d2 * (na * na * other.m2 + nb * nb * self.m2) / n2
                + 4.0 * d * (na * other.m3 - nb * self.m3) / n,
        };
        if r.has_infinite() && !self.has_infinite() && !other.has_infinite() {
            return Err(StatsError::DoubleOverflow);
        }
        Ok(r)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn var_pop(&self) -> f64 {
        self.m2 / self.n64()
    }

    pub fn var_samp(&self) -> f64 {
        self.m2 / (self.n64() - 1.0)
    }

    pub fn stddev_pop(&self) -> f64 {
        self.var_pop().sqrt()
    }

    /// `sqrt(n) * m3 / m2^1.5`
    pub fn skewness(&self) -> f64 {
        self.n64().sqrt() * self.m3 / self.m2.powf(1.5)
    }

    /// Excess kurtosis, `n * m4 / m2^2 - 3`
    pub fn kurtosis(&self) -> f64 {
        self.n64() * self.m4 / (self.m2 * self.m2) - 3.0
    }
}
