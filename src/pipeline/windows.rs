//! Rolling statistics over incoming observation values
//!
//! Observability only: nothing here feeds back into the store or the feature
//! vectors. Entries age out lazily when a summary is requested.

/// Trailing window length in seconds
pub const WINDOW_SECS: i64 = 60 * 60;

/// Summary statistic reported for the window
///
/// Earlier deployments reported the mean, later ones the median; both are
/// supported and the choice is a config option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    Mean,
    Median,
}

impl Statistic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Median => "median",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mean" => Some(Statistic::Mean),
            "median" => Some(Statistic::Median),
            _ => None,
        }
    }

    fn compute(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Statistic::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Statistic::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
        }
    }
}

/// Interface for a single time-bounded window
pub trait RollingWindow {
    /// Add a value that arrived at `arrival` (Unix seconds)
    fn record(&mut self, value: f64, arrival: i64);

    /// Remove entries that arrived before the cutoff
    fn evict_before(&mut self, cutoff_timestamp: i64);

    fn is_empty(&self) -> bool;

    fn len(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct TrailingWindow {
    entries: Vec<(f64, i64)>,
    window_duration: i64,
    statistic: Statistic,
}

impl TrailingWindow {
    /// One-hour window
    pub fn new(statistic: Statistic) -> Self {
        Self::with_duration(WINDOW_SECS, statistic)
    }

    pub fn with_duration(window_duration: i64, statistic: Statistic) -> Self {
        Self {
            entries: Vec::with_capacity(256),
            window_duration,
            statistic,
        }
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// Prune entries older than `now - window` and summarise the rest
    pub fn summary(&mut self, now: i64) -> Option<f64> {
        self.evict_before(now - self.window_duration);
        let values: Vec<f64> = self.entries.iter().map(|(v, _)| *v).collect();
        self.statistic.compute(&values)
    }
}

impl RollingWindow for TrailingWindow {
    fn record(&mut self, value: f64, arrival: i64) {
        self.entries.push((value, arrival));
    }

    fn evict_before(&mut self, cutoff_timestamp: i64) {
        self.entries.retain(|(_, t)| *t >= cutoff_timestamp);
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
