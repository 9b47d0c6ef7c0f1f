use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/*----- */
// Variance record
/*----- */
// One observation of price movement between opportunity detection and the
// pre-execution revalidation fetch.
#[derive(Debug, Clone, Copy)]
pub struct VarianceRecord {
    pub time: DateTime<Utc>,
    pub buy_variance_percent: f64,
    pub sell_variance_percent: f64,
    pub total_variance_percent: f64,
    // Share of the detected profit the variance has eaten
    pub profit_impact_percent: f64,
}

impl VarianceRecord {
    pub fn new(
        buy_variance_percent: f64,
        sell_variance_percent: f64,
        profit_impact_percent: f64,
    ) -> Self {
        Self {
            time: Utc::now(),
            buy_variance_percent,
            sell_variance_percent,
            total_variance_percent: buy_variance_percent + sell_variance_percent,
            profit_impact_percent,
        }
    }
}

/*----- */
// Variance history
/*----- */
#[derive(Debug)]
pub struct VarianceHistory {
    data: VecDeque<VarianceRecord>,
    capacity: usize,
}

impl VarianceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: VarianceRecord) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn stats(&self) -> VarianceStats {
        if self.data.is_empty() {
            return VarianceStats::default();
        }

        let count = self.data.len() as f64;
        let mut total = 0.0;
        let mut max = f64::MIN;
        let mut impact = 0.0;
        for record in self.data.iter() {
            total += record.total_variance_percent;
            impact += record.profit_impact_percent;
            if record.total_variance_percent > max {
                max = record.total_variance_percent;
            }
        }

        VarianceStats {
            avg_variance: total / count,
            max_variance: max,
            recent_count: self.data.len(),
            avg_profit_impact: impact / count,
        }
    }
}

impl Default for VarianceHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

/*----- */
// Derived telemetry
/*----- */
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VarianceStats {
    pub avg_variance: f64,
    pub max_variance: f64,
    pub recent_count: usize,
    pub avg_profit_impact: f64,
}
