use serde::Serialize;
use std::cmp::Ordering;

/// One recorded grade for a (student, subject, sequence) slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeState {
    Absent,
    Scored(f64),
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Mean of the scored sequences. Absences are not zeros: they leave both the
/// sum and the denominator untouched, and an all-absent subject has no average.
/// An overflowing sum also has no average.
pub fn subject_average<I>(grades: I) -> Option<f64>
where
    I: IntoIterator<Item = GradeState>,
{
    let mut sum = 0.0_f64;
    let mut count: usize = 0;
    for g in grades {
        if let GradeState::Scored(v) = g {
            sum += v;
            count += 1;
        }
    }
    if count > 0 && sum.is_finite() {
        Some(sum / (count as f64))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub average: Option<f64>,
    pub graded_count: usize,
}

/// Min/max/mean over students' subject averages. Undefined averages are
/// dropped before reducing.
pub fn subject_stats<I>(averages: I) -> SubjectStats
where
    I: IntoIterator<Item = Option<f64>>,
{
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;
    let mut sum = 0.0_f64;
    let mut count: usize = 0;
    for v in averages.into_iter().flatten() {
        min = Some(min.map_or(v, |m| m.min(v)));
        max = Some(max.map_or(v, |m| m.max(v)));
        sum += v;
        count += 1;
    }
    SubjectStats {
        min,
        max,
        average: if count > 0 {
            Some(sum / (count as f64))
        } else {
            None
        },
        graded_count: count,
    }
}

/// Coefficient-weighted mean of `(average, coefficient)` pairs.
///
/// Pairs without an average are left out of both numerator and denominator,
/// as are non-positive coefficients. Returns `None` when nothing carries weight
/// or when the weighted sums overflow.
pub fn weighted_average<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (Option<f64>, f64)>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for (avg, coeff) in pairs {
        let Some(avg) = avg else {
            continue;
        };
        if coeff <= 0.0 {
            continue;
        }
        sum += avg * coeff;
        denom += coeff;
    }
    // Overflowing weights would otherwise yield inf/inf = NaN.
    if !sum.is_finite() || !denom.is_finite() {
        return None;
    }
    if denom > 0.0 {
        Some(sum / denom)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankEntry {
    pub average: f64,
    pub rank: usize,
}

/// Standard competition ranking ("1224"), highest average first.
///
/// Entries with no average are not ranked. Equal averages (exact `f64`
/// comparison) share a rank and keep their input order; the next distinct
/// average is ranked `1 + number of entries strictly above it`.
pub fn competition_ranks<K, I>(entries: I) -> Vec<(K, RankEntry)>
where
    I: IntoIterator<Item = (K, Option<f64>)>,
{
    let mut ranked: Vec<(K, f64)> = entries
        .into_iter()
        .filter_map(|(k, avg)| avg.map(|a| (k, a)))
        .collect();
    // Stable: ties stay in input order.
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut out = Vec::with_capacity(ranked.len());
    let mut prev: Option<(f64, usize)> = None;
    for (i, (key, average)) in ranked.into_iter().enumerate() {
        let rank = match prev {
            Some((p, r)) if p == average => r,
            _ => i + 1,
        };
        prev = Some((average, rank));
        out.push((key, RankEntry { average, rank }));
    }
    out
}

/// Share of ranked students at or above `pass_mark`; `None` for an empty class.
pub fn success_rate(averages: &[f64], pass_mark: f64) -> Option<f64> {
    if averages.is_empty() {
        return None;
    }
    let passed = averages.iter().filter(|a| **a >= pass_mark).count();
    Some(passed as f64 / averages.len() as f64)
}
