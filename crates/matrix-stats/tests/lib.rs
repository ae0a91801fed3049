use approx::assert_relative_eq;
use matrix_stats::{merge_all, FieldMoments, StatisticsSnapshot};
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn accumulate(field: &str, values: &[f64]) -> StatisticsSnapshot {
    let mut s = StatisticsSnapshot::new();
    for &v in values {
        s.add(&[field], &[v]).unwrap();
    }
    s
}

// sum((x - mean)^k) computed the slow way
fn two_pass(values: &[f64]) -> (f64, [f64; 3], [f64; 3]) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let mut central = [0.0; 3];
    let mut absolute = [0.0; 3];
    for &v in values {
        let d = v - mean;
        for (k, (c, a)) in central.iter_mut().zip(absolute.iter_mut()).enumerate() {
            let p = (k + 2) as i32;
            *c += d.powi(p);
            *a += d.abs().powi(p);
        }
    }
    (mean, central, absolute)
}

fn close(a: f64, b: f64, scale: f64) -> bool {
    (a - b).abs() <= 1e-9 * (1.0 + scale)
}

fn moments_close(a: &FieldMoments, b: &FieldMoments, values: &[f64]) -> bool {
    let (mean, _, absolute) = two_pass(values);
    a.count == b.count
        && close(a.sum, b.sum, values.iter().map(|v| v.abs()).sum())
        && close(a.mean, b.mean, mean.abs())
        && close(a.m2, b.m2, absolute[0])
        && close(a.m3, b.m3, absolute[1])
        && close(a.m4, b.m4, absolute[2])
}

fn bounded(values: Vec<f64>) -> Vec<f64> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .map(|v| v % 1000.0)
        .collect()
}

#[test]
fn single_field_sequence() {
    init_logging();
    let s = accumulate("x", &[1.0, 2.0, 3.0, 4.0, 5.0]);
    let x = s.field("x").unwrap();
    assert_eq!(s.count(), 5);
    assert_eq!(x.count, 5);
    assert_relative_eq!(x.mean, 3.0);
    assert_relative_eq!(x.m2, 10.0);
    assert_relative_eq!(x.var_pop(), 2.0);
}

#[test]
fn two_shards() {
    init_logging();
    let shard1 = accumulate("x", &[1.0, 2.0, 3.0]);
    let shard2 = accumulate("x", &[4.0, 5.0, 6.0]);
    let direct = accumulate("x", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let mut merged = shard1.clone();
    merged.merge(&shard2).unwrap();
    let x = merged.field("x").unwrap();
    assert_eq!(merged.count(), 6);
    assert_eq!(x.count, 6);
    assert_relative_eq!(x.mean, 3.5);
    assert_relative_eq!(x.m2, direct.field("x").unwrap().m2, max_relative = 1e-12);
    assert_relative_eq!(x.m2, 17.5, max_relative = 1e-12);
    assert_relative_eq!(x.m3, 0.0, epsilon = 1e-12);
    assert_relative_eq!(x.m4, 88.375, max_relative = 1e-12);
}

#[test]
fn perfectly_correlated_fields() {
    init_logging();
    let mut shards = vec![StatisticsSnapshot::new(), StatisticsSnapshot::new()];
    for i in 1..=10 {
        let x = i as f64;
        shards[i % 2].add(&["x", "y"], &[x, 2.0 * x]).unwrap();
    }
    let merged = merge_all(shards).unwrap();
    let x = merged.field("x").unwrap();
    let y = merged.field("y").unwrap();
    let covariance = merged.covariance("y", "x").unwrap() / merged.count() as f64;

    assert_eq!(merged.count(), 10);
    assert_relative_eq!(x.var_pop(), 8.25, max_relative = 1e-12);
    assert_relative_eq!(covariance, 2.0 * x.var_pop(), max_relative = 1e-12);
    let correlation = covariance / (x.stddev_pop() * y.stddev_pop());
    assert_relative_eq!(correlation, 1.0, max_relative = 1e-12);
}

#[test]
fn merge_all_of_many_shards() {
    init_logging();
    let values: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 * 0.25 - 7.0).collect();
    let direct = accumulate("v", &values);
    let merged = merge_all(values.chunks(17).map(|c| accumulate("v", c))).unwrap();
    assert!(moments_close(
        merged.field("v").unwrap(),
        direct.field("v").unwrap(),
        &values
    ));
    assert!(merge_all(Vec::new()).unwrap().is_empty());
}

#[test]
fn merge_after_transport() {
    init_logging();
    let a: Vec<f64> = (0..40).map(|i| (i as f64).sqrt()).collect();
    let b: Vec<f64> = (0..60).map(|i| (i as f64 * 0.3).cos() * 10.0).collect();
    let mut rows_a = StatisticsSnapshot::new();
    let mut rows_b = StatisticsSnapshot::new();
    for &v in &a {
        rows_a.add(&["p", "q"], &[v, v * v]).unwrap();
    }
    for &v in &b {
        rows_b.add(&["p", "q"], &[v, -v]).unwrap();
    }

    let in_memory = rows_a.combine(&rows_b).unwrap();
    let transported = StatisticsSnapshot::from_bytes(&rows_a.to_bytes().unwrap())
        .unwrap()
        .combine(&StatisticsSnapshot::from_bytes(&rows_b.to_bytes().unwrap()).unwrap())
        .unwrap();

    for field in ["p", "q"] {
        assert_eq!(in_memory.field(field), transported.field(field));
    }
    assert_eq!(
        in_memory.covariance("p", "q"),
        transported.covariance("p", "q")
    );
    assert_eq!(in_memory.quantile_estimate(), transported.quantile_estimate());
    let (qa, qb) = (
        rows_a.quantile_estimate().unwrap(),
        rows_b.quantile_estimate().unwrap(),
    );
    assert_relative_eq!(
        transported.quantile_estimate().unwrap(),
        (qa * 40.0 + qb * 60.0) / 100.0
    );
}

#[quickcheck]
fn sequential_matches_two_pass(values: Vec<f64>) -> TestResult {
    let values = bounded(values);
    if values.is_empty() {
        return TestResult::discard();
    }
    let s = accumulate("x", &values);
    let x = s.field("x").unwrap();
    let (mean, central, absolute) = two_pass(&values);
    TestResult::from_bool(
        x.count == values.len() as u64
            && close(x.mean, mean, mean.abs())
            && close(x.m2, central[0], absolute[0])
            && close(x.m3, central[1], absolute[1])
            && close(x.m4, central[2], absolute[2]),
    )
}

#[quickcheck]
fn merge_matches_union(values: Vec<f64>, split: usize) -> TestResult {
    let values = bounded(values);
    if values.is_empty() {
        return TestResult::discard();
    }
    let split = split % (values.len() + 1);
    let mut merged = accumulate("x", &values[..split]);
    merged.merge(&accumulate("x", &values[split..])).unwrap();
    let direct = accumulate("x", &values);
    TestResult::from_bool(
        merged.count() == direct.count()
            && moments_close(
                merged.field("x").unwrap(),
                direct.field("x").unwrap(),
                &values,
            ),
    )
}

#[quickcheck]
fn merge_is_associative(a: Vec<f64>, b: Vec<f64>, c: Vec<f64>) -> TestResult {
    let (a, b, c) = (bounded(a), bounded(b), bounded(c));
    if a.is_empty() || b.is_empty() || c.is_empty() {
        return TestResult::discard();
    }
    let (sa, sb, sc) = (accumulate("x", &a), accumulate("x", &b), accumulate("x", &c));
    let left = sa.combine(&sb).unwrap().combine(&sc).unwrap();
    let right = sa.combine(&sb.combine(&sc).unwrap()).unwrap();
    let all: Vec<f64> = a.iter().chain(&b).chain(&c).copied().collect();
    TestResult::from_bool(moments_close(
        left.field("x").unwrap(),
        right.field("x").unwrap(),
        &all,
    ))
}

#[quickcheck]
fn covariance_merge_matches_union(rows: Vec<(i16, i16)>, split: usize) -> TestResult {
    if rows.len() < 2 {
        return TestResult::discard();
    }
    let split = split % (rows.len() + 1);
    let accumulate_rows = |rows: &[(i16, i16)]| {
        let mut s = StatisticsSnapshot::new();
        for &(x, y) in rows {
            s.add(&["x", "y"], &[f64::from(x), f64::from(y)]).unwrap();
        }
        s
    };
    let merged = accumulate_rows(&rows[..split])
        .combine(&accumulate_rows(&rows[split..]))
        .unwrap();
    let direct = accumulate_rows(&rows);

    let n = rows.len() as f64;
    let mx = rows.iter().map(|r| f64::from(r.0)).sum::<f64>() / n;
    let my = rows.iter().map(|r| f64::from(r.1)).sum::<f64>() / n;
    let scale: f64 = rows
        .iter()
        .map(|r| ((f64::from(r.0) - mx) * (f64::from(r.1) - my)).abs())
        .sum();
    let expected: f64 = rows
        .iter()
        .map(|r| (f64::from(r.0) - mx) * (f64::from(r.1) - my))
        .sum();
    let merged = merged.covariance("x", "y").unwrap();
    let direct = direct.covariance("x", "y").unwrap();
    TestResult::from_bool(close(merged, expected, scale) && close(direct, expected, scale))
}
