//! Runtime counters: ingest/dedup/search throughput and search latency.

use std::time::Duration;

/// Latency samples kept for percentile estimates. Older samples are
/// overwritten once the buffer is full.
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Collects runtime metrics for the catalog.
#[derive(Debug)]
pub struct MetricsCollector {
    search_latencies_us: Vec<f64>,
    next_sample: usize,
    total_searches: u64,
    total_ingests: u64,
    dedup_hits: u64,
    provider_failures: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            search_latencies_us: Vec::new(),
            next_sample: 0,
            total_searches: 0,
            total_ingests: 0,
            dedup_hits: 0,
            provider_failures: 0,
        }
    }

    /// Record a search with its duration.
    pub fn record_search(&mut self, duration: Duration) {
        self.total_searches += 1;
        let sample = duration.as_micros() as f64;
        if self.search_latencies_us.len() < MAX_LATENCY_SAMPLES {
            self.search_latencies_us.push(sample);
        } else {
            self.search_latencies_us[self.next_sample] = sample;
            self.next_sample = (self.next_sample + 1) % MAX_LATENCY_SAMPLES;
        }
    }

    /// Record a completed ingest (a new record stored and indexed).
    pub fn record_ingest(&mut self) {
        self.total_ingests += 1;
    }

    /// Record an ingest answered from the store without a provider call.
    pub fn record_dedup_hit(&mut self) {
        self.dedup_hits += 1;
    }

    /// Record a provider call that failed after retries.
    pub fn record_provider_failure(&mut self) {
        self.provider_failures += 1;
    }

    pub fn total_searches(&self) -> u64 {
        self.total_searches
    }

    pub fn total_ingests(&self) -> u64 {
        self.total_ingests
    }

    pub fn dedup_hits(&self) -> u64 {
        self.dedup_hits
    }

    pub fn provider_failures(&self) -> u64 {
        self.provider_failures
    }

    /// Average search latency in microseconds.
    pub fn avg_search_latency_us(&self) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.search_latencies_us.iter().sum();
        sum / self.search_latencies_us.len() as f64
    }

    /// Get a percentile of search latency (e.g., 50.0, 95.0, 99.0).
    pub fn percentile_search_latency_us(&self, percentile: f64) -> f64 {
        if self.search_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted = self.search_latencies_us.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let mut m = MetricsCollector::new();
        m.record_ingest();
        m.record_ingest();
        m.record_dedup_hit();
        m.record_provider_failure();

        assert_eq!(m.total_ingests(), 2);
        assert_eq!(m.dedup_hits(), 1);
        assert_eq!(m.provider_failures(), 1);
        assert_eq!(m.total_searches(), 0);
    }

    #[test]
    fn test_metrics_latency() {
        let mut m = MetricsCollector::new();
        m.record_search(Duration::from_micros(100));
        m.record_search(Duration::from_micros(200));
        m.record_search(Duration::from_micros(300));

        assert_eq!(m.total_searches(), 3);
        assert!((m.avg_search_latency_us() - 200.0).abs() < 1.0);
        assert!((m.percentile_search_latency_us(50.0) - 200.0).abs() < 1.0);
    }

    #[test]
    fn test_metrics_empty() {
        let m = MetricsCollector::new();
        assert_eq!(m.avg_search_latency_us(), 0.0);
        assert_eq!(m.percentile_search_latency_us(99.0), 0.0);
    }

    #[test]
    fn test_metrics_sample_cap() {
        let mut m = MetricsCollector::new();
        for _ in 0..MAX_LATENCY_SAMPLES {
            m.record_search(Duration::from_micros(1));
        }
        for _ in 0..100 {
            m.record_search(Duration::from_micros(1_000_000));
        }

        assert_eq!(m.total_searches(), (MAX_LATENCY_SAMPLES + 100) as u64);
        assert_eq!(m.search_latencies_us.len(), MAX_LATENCY_SAMPLES);
        // The cheap early samples still dominate the median
        assert!((m.percentile_search_latency_us(50.0) - 1.0).abs() < 1.0);
    }
}
