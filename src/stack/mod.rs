//! Weighted, time-shifted summation of store records.
//!
//! Two entry points compute the same reduction:
//!
//! - [`sum_timeseries`] evaluates it at every sample of an output window.
//! - [`sum_static`] evaluates it at a single sample for many targets at once.
//!
//! Both resolve their parameters into the same list of shifted terms and
//! evaluate every sample through `stack_at`, which accumulates the terms
//! in ascending order into an `f64`. The value of `sum_static` at sample `it`
//! is therefore bit-identical to `sum_timeseries` at `it`.
//!
//! A delay `d` (seconds) shifts a record by `d / deltat` samples. The
//! integer part moves the record; the fractional part `f` is handled by
//! linear interpolation between neighbouring samples:
//!
//! ```text
//! contribution(it) = w * ((1 - f) * r(it - i0) + f * r(it - i0 - 1))
//! ```

mod pool;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{GfError, GfResult};
use crate::record::{Record, Waveform};
use crate::sum_params::SumParams;

/// Largest shift, in samples, a delay may produce.
const MAX_SHIFT_SAMPLES: f64 = 2_147_483_647.0;

/// Largest output window [`sum_timeseries`] will allocate.
pub const MAX_OUTPUT_SAMPLES: usize = 1 << 28;

/// Read access to records, as needed by the stacking routines.
pub trait RecordSource: Sync {
    /// Sampling interval in seconds.
    fn deltat(&self) -> f64;

    /// Decoded record `irecord`.
    ///
    /// A sparse slot yields [`GfError::NotFound`].
    fn record(&self, irecord: u64) -> GfResult<Arc<Record>>;
}

/// What to do when a referenced record is absent from a sparse store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingRecordPolicy {
    /// Abort the computation with [`GfError::NotFound`].
    #[default]
    Error,
    /// Treat the record as all zeros.
    Zero,
}

/// A contiguous range of absolute sample indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleWindow {
    /// First sample index.
    pub itmin: i64,
    /// Number of samples.
    pub nsamples: usize,
}

impl SampleWindow {
    /// Creates a window.
    #[must_use]
    pub const fn new(itmin: i64, nsamples: usize) -> Self {
        Self { itmin, nsamples }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Shift {
    whole: i64,
    frac: f64,
}

impl Shift {
    #[allow(clippy::cast_possible_truncation)]
    fn from_delay(delay: f64, deltat: f64) -> GfResult<Self> {
        let samples = delay / deltat;
        if !samples.is_finite() || samples.abs() > MAX_SHIFT_SAMPLES {
            return Err(GfError::invalid_input(format!(
                "delay {delay} s is out of range for deltat {deltat} s"
            )));
        }
        let whole = samples.floor();
        Ok(Self {
            whole: whole as i64,
            frac: samples - whole,
        })
    }
}

struct Term {
    record: Arc<Record>,
    shift: Shift,
    weight: f64,
}

impl Term {
    #[inline]
    fn contribution(&self, it: i64) -> f64 {
        // Saturated indices lie outside every waveform span.
        let at = it.saturating_sub(self.shift.whole);
        let a = f64::from(self.record.value_at(at));
        let b = f64::from(self.record.value_at(at.saturating_sub(1)));
        let f = self.shift.frac;
        self.weight * ((1.0 - f) * a + f * b)
    }

    /// Sample span `[start, end)` the shifted record can be non-zero on.
    fn span(&self) -> Option<(i64, i64)> {
        let (start, end) = self.record.span()?;
        let tail = i64::from(self.shift.frac > 0.0);
        Some((start + self.shift.whole, end + self.shift.whole + tail))
    }
}

/// Sum of all term contributions at sample `it`, in term order.
#[inline]
fn stack_at(terms: &[Term], it: i64) -> f64 {
    let mut acc = 0.0f64;
    for term in terms {
        acc += term.contribution(it);
    }
    acc
}

fn resolve_terms<S>(
    source: &S,
    params: &SumParams,
    policy: MissingRecordPolicy,
) -> GfResult<Vec<Term>>
where
    S: RecordSource + ?Sized,
{
    params.validate()?;
    let deltat = source.deltat();
    let mut terms = Vec::with_capacity(params.len());
    let mut substituted = 0usize;

    let triples = params
        .irecords
        .iter()
        .zip(&params.delays)
        .zip(&params.weights);
    for ((&irecord, &delay), &weight) in triples {
        let shift = Shift::from_delay(delay, deltat)?;
        let record = match source.record(irecord) {
            Ok(record) => record,
            Err(GfError::NotFound { .. }) if policy == MissingRecordPolicy::Zero => {
                substituted += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        terms.push(Term {
            record,
            shift,
            weight,
        });
    }

    if substituted > 0 {
        warn!(
            substituted,
            total = params.len(),
            "missing records treated as zero"
        );
    }
    Ok(terms)
}

fn default_window(terms: &[Term]) -> SampleWindow {
    let mut bounds: Option<(i64, i64)> = None;
    for (start, end) in terms.iter().filter_map(Term::span) {
        bounds = Some(match bounds {
            Some((lo, hi)) => (lo.min(start), hi.max(end)),
            None => (start, end),
        });
    }
    match bounds {
        Some((lo, hi)) => SampleWindow::new(lo, usize::try_from(hi - lo).unwrap_or(usize::MAX)),
        // Only static records: every sample holds the same value.
        None if terms.iter().any(|t| matches!(*t.record, Record::Static { .. })) => {
            SampleWindow::new(0, 1)
        }
        None => SampleWindow::new(0, 0),
    }
}

/// Stacks `params` into a waveform.
///
/// Without a `window` the output covers every sample on which any shifted
/// waveform record is non-zero. Records that do not cover a sample contribute
/// zero there.
#[allow(clippy::cast_possible_wrap)]
pub fn sum_timeseries<S>(
    source: &S,
    params: &SumParams,
    window: Option<SampleWindow>,
    policy: MissingRecordPolicy,
) -> GfResult<Waveform>
where
    S: RecordSource + ?Sized,
{
    let terms = resolve_terms(source, params, policy)?;
    let window = window.unwrap_or_else(|| default_window(&terms));
    if window.nsamples > MAX_OUTPUT_SAMPLES {
        return Err(GfError::invalid_input(format!(
            "output window of {} samples exceeds the limit of {MAX_OUTPUT_SAMPLES}",
            window.nsamples
        )));
    }
    if window.nsamples > 0
        && window
            .itmin
            .checked_add(window.nsamples as i64 - 1)
            .is_none()
    {
        return Err(GfError::invalid_input(format!(
            "output window starting at sample {} overflows the sample index range",
            window.itmin
        )));
    }

    let values = (0..window.nsamples as i64)
        .map(|i| stack_at(&terms, window.itmin + i))
        .collect();

    debug!(
        nterms = terms.len(),
        itmin = window.itmin,
        nsamples = window.nsamples,
        "stacked time series"
    );
    Ok(Waveform {
        itmin: window.itmin,
        deltat: source.deltat(),
        values,
    })
}

/// Stacked value at absolute sample `it` for every entry of `params`.
///
/// Each entry is one target; targets are spread over `worker_count` threads.
/// Results do not depend on `worker_count`.
pub fn sum_static<S>(
    source: &S,
    params: &[SumParams],
    it: i64,
    worker_count: usize,
    policy: MissingRecordPolicy,
) -> GfResult<Vec<f64>>
where
    S: RecordSource + ?Sized,
{
    let values = pool::run_indexed(params.len(), worker_count, |itarget| {
        let terms = resolve_terms(source, &params[itarget], policy)?;
        Ok(stack_at(&terms, it))
    })?;
    debug!(ntargets = params.len(), it, worker_count, "stacked static values");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MemorySource {
        deltat: f64,
        records: HashMap<u64, Arc<Record>>,
    }

    impl MemorySource {
        fn new(deltat: f64, records: Vec<(u64, Record)>) -> Self {
            Self {
                deltat,
                records: records.into_iter().map(|(k, r)| (k, Arc::new(r))).collect(),
            }
        }
    }

    impl RecordSource for MemorySource {
        fn deltat(&self) -> f64 {
            self.deltat
        }

        fn record(&self, irecord: u64) -> GfResult<Arc<Record>> {
            self.records
                .get(&irecord)
                .cloned()
                .ok_or(GfError::NotFound { irecord })
        }
    }

    fn source() -> MemorySource {
        MemorySource::new(
            0.5,
            vec![
                (0, Record::waveform(2, vec![1.0, 2.0, 3.0])),
                (1, Record::waveform(-1, vec![0.5, -0.25])),
                (2, Record::Zero),
                (3, Record::static_value(4.0)),
            ],
        )
    }

    #[test]
    fn test_integer_delay_shifts_samples() {
        let params = SumParams::new(vec![0], vec![1.0], vec![2.0]).unwrap();
        let out = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).unwrap();
        assert_eq!(out.itmin, 4);
        assert_eq!(out.values, vec![2.0, 4.0, 6.0]);
        assert_eq!(out.deltat, 0.5);
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let params = SumParams::new(vec![0], vec![0.25], vec![1.0]).unwrap();
        let out = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).unwrap();
        assert_eq!(out.itmin, 2);
        assert_eq!(out.values, vec![0.5, 1.5, 2.5, 1.5]);
    }

    #[test]
    fn test_misaligned_records_are_zero_padded() {
        let params = SumParams::new(vec![0, 1], vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let out = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).unwrap();
        assert_eq!(out.itmin, -1);
        assert_eq!(out.values, vec![0.5, -0.25, 0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_explicit_window() {
        let params = SumParams::new(vec![0, 3], vec![0.0, 0.0], vec![1.0, 0.5]).unwrap();
        let out = sum_timeseries(
            &source(),
            &params,
            Some(SampleWindow::new(0, 4)),
            MissingRecordPolicy::Error,
        )
        .unwrap();
        assert_eq!(out.values, vec![2.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_static_matches_timeseries() {
        let params = vec![
            SumParams::new(vec![0, 1, 2], vec![0.3, -0.7, 1.1], vec![0.1, 3.0, -2.0]).unwrap(),
            SumParams::new(vec![1, 0, 3], vec![1.25, 0.0, 0.0], vec![1.0, 1.0 / 3.0, 0.2]).unwrap(),
        ];
        let src = source();
        for it in -3..8 {
            let statics = sum_static(&src, &params, it, 2, MissingRecordPolicy::Error).unwrap();
            for (p, value) in params.iter().zip(&statics) {
                let trace = sum_timeseries(
                    &src,
                    p,
                    Some(SampleWindow::new(-3, 11)),
                    MissingRecordPolicy::Error,
                )
                .unwrap();
                assert_eq!(trace.value_at(it).to_bits(), value.to_bits());
            }
        }
    }

    #[test]
    fn test_empty_params_yield_zero() {
        let empty = SumParams::default();
        let out = sum_timeseries(&source(), &empty, None, MissingRecordPolicy::Error).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.value_at(10), 0.0);

        let values =
            sum_static(&source(), &[empty.clone(), empty], 5, 4, MissingRecordPolicy::Error)
                .unwrap();
        assert_eq!(values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_record_policy() {
        let params = SumParams::new(vec![0, 99], vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
        let err = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).unwrap_err();
        assert!(matches!(err, GfError::NotFound { irecord: 99 }));

        let out = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Zero).unwrap();
        assert_eq!(out.values, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_static_only_default_window() {
        let params = SumParams::new(vec![3], vec![0.0], vec![0.5]).unwrap();
        let out = sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).unwrap();
        assert_eq!(out.values, vec![2.0]);
    }

    #[test]
    fn test_rejects_unreasonable_delay() {
        let params = SumParams::new(vec![0], vec![1.0e12], vec![1.0]).unwrap();
        assert!(sum_timeseries(&source(), &params, None, MissingRecordPolicy::Error).is_err());
    }

    #[test]
    fn test_extreme_sample_indices() {
        // Waveform shifted by +2 samples, static record by -1.5 samples.
        let params = SumParams::new(vec![0, 3], vec![1.0, -0.75], vec![1.0, 2.0]).unwrap();
        for it in [i64::MIN, i64::MAX] {
            let values =
                sum_static(&source(), &[params.clone()], it, 1, MissingRecordPolicy::Error)
                    .unwrap();
            assert_eq!(values, vec![8.0]);
        }

        let window = SampleWindow::new(i64::MAX - 1, 2);
        let out = sum_timeseries(&source(), &params, Some(window), MissingRecordPolicy::Error)
            .unwrap();
        assert_eq!(out.values, vec![8.0, 8.0]);

        let window = SampleWindow::new(i64::MAX, 2);
        let err = sum_timeseries(&source(), &params, Some(window), MissingRecordPolicy::Error)
            .unwrap_err();
        assert!(matches!(err, GfError::InvalidInput { .. }));
    }
}
