//! File-backed metrics: one `MetricsPoint` JSON object per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use strata_scoring::metrics::{MetricsError, MetricsPoint, MetricsSource, TimeSeries};

use crate::error::{Error, Result};

/// Replays recorded or forecasted metrics. "Upcoming" points are those at or
/// after the anchor timestamp.
#[derive(Debug, Clone, Default)]
pub struct JsonlMetricsSource {
    points: Vec<MetricsPoint>,
    anchor_ms: u64,
}

impl JsonlMetricsSource {
    pub fn new(mut points: Vec<MetricsPoint>) -> Self {
        points.sort_by_key(|p| p.timestamp_ms);
        Self {
            points,
            anchor_ms: 0,
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        let mut points = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let point: MetricsPoint = serde_json::from_str(&line)
                .map_err(|e| Error::Serde(format!("{}:{}: {e}", path.display(), lineno + 1)))?;
            points.push(point);
        }
        tracing::debug!(path = %path.display(), points = points.len(), "loaded metrics");
        Ok(Self::new(points))
    }

    pub fn with_anchor(mut self, anchor_ms: u64) -> Self {
        self.anchor_ms = anchor_ms;
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl MetricsSource for JsonlMetricsSource {
    fn read_between_times(
        &self,
        start_ms: u64,
        end_ms: u64,
    ) -> std::result::Result<TimeSeries, MetricsError> {
        if start_ms > end_ms {
            return Err(MetricsError::Malformed(format!(
                "empty time range {start_ms}..{end_ms}"
            )));
        }
        Ok(TimeSeries {
            points: self
                .points
                .iter()
                .filter(|p| (start_ms..=end_ms).contains(&p.timestamp_ms))
                .cloned()
                .collect(),
        })
    }

    fn read_k_upcoming(&self, k: usize) -> std::result::Result<TimeSeries, MetricsError> {
        Ok(TimeSeries {
            points: self
                .points
                .iter()
                .filter(|p| p.timestamp_ms >= self.anchor_ms)
                .take(k)
                .cloned()
                .collect(),
        })
    }
}
