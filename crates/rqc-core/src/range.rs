use serde::{Deserialize, Serialize};

/// Gap tolerance used when merging and walking ranges.
pub const EPSILON: f64 = 1e-6;

/// Scale used to quantize range endpoints into dedup keys.
const KEY_SCALE: f64 = 1e6;

/// A closed interval on the chainage axis. A point has `start == end`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRange {
    pub start: f64,
    pub end: f64,
}

impl PositionRange {
    /// Orders the endpoints; NaN and infinities become 0.
    pub fn normalize(start: f64, end: f64) -> Self {
        let start = if start.is_finite() { start } else { 0.0 };
        let end = if end.is_finite() { end } else { 0.0 };
        if start > end {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn point(at: f64) -> Self {
        Self::normalize(at, at)
    }

    pub fn is_point(&self) -> bool {
        (self.end - self.start).abs() <= EPSILON
    }

    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    /// Strict overlap: touching ranges and zero-length ranges do not overlap.
    pub fn overlaps(&self, other: &PositionRange) -> bool {
        self.start.max(other.start) < self.end.min(other.end)
    }

    /// Inclusive overlap: shared endpoints and points count.
    pub fn intersects(&self, other: &PositionRange) -> bool {
        self.start <= other.end + EPSILON && other.start <= self.end + EPSILON
    }

    /// The part of `self` inside `target`.
    pub fn clip(&self, target: &PositionRange) -> Option<PositionRange> {
        if !self.intersects(target) {
            return None;
        }
        let start = self.start.max(target.start);
        let end = self.end.min(target.end);
        Some(PositionRange::normalize(start, end.max(start)))
    }

    /// Endpoints quantized to micro-units, for identity comparisons.
    pub fn key(&self) -> (i64, i64) {
        (quantize(self.start), quantize(self.end))
    }
}

impl std::fmt::Display for PositionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

fn quantize(v: f64) -> i64 {
    (v * KEY_SCALE).round() as i64
}

pub fn overlaps(a: &PositionRange, b: &PositionRange) -> bool {
    a.overlaps(b)
}

/// Sorts and merges ranges into a minimal disjoint list. Gaps up to
/// [`EPSILON`] are absorbed.
pub fn merge_ranges(ranges: &[PositionRange]) -> Vec<PositionRange> {
    let mut sorted: Vec<PositionRange> = ranges.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut merged: Vec<PositionRange> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match merged.last_mut() {
            Some(last) if r.start <= last.end + EPSILON => {
                if r.end > last.end {
                    last.end = r.end;
                }
            }
            _ => merged.push(r),
        }
    }
    merged
}

/// True iff `merged` (sorted, disjoint) leaves no gap inside `target`.
/// An empty list covers nothing, not even a point.
pub fn is_fully_covered(target: &PositionRange, merged: &[PositionRange]) -> bool {
    let mut cursor = target.start;
    let mut touched = false;
    for r in merged {
        if r.end < cursor - EPSILON {
            continue;
        }
        if r.start > cursor + EPSILON {
            return false;
        }
        touched = true;
        if r.end > cursor {
            cursor = r.end;
        }
        if cursor >= target.end - EPSILON {
            return true;
        }
    }
    touched && cursor >= target.end - EPSILON
}
