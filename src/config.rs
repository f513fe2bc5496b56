//! Configuration types.

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum classifier confidence to accept a result.
    pub confidence_threshold: f32,
    /// Maximum in-flight classification requests.
    pub max_concurrent_classify: usize,
    /// Daily cap on classification-service calls.
    pub daily_quota: u32,
    /// Scan window for the first run against an empty database, in days.
    pub initial_scan_days: i64,
    /// Scan window for every later run, in days.
    pub daily_scan_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_concurrent_classify: 4,
            daily_quota: 450,
            initial_scan_days: 240, // ~8 months
            daily_scan_days: 7,
        }
    }
}
