use anyhow::bail;
use uuid::Uuid;

pub const DEFAULT_ABSENCE_THRESHOLD: usize = 3;
pub const DEFAULT_ALERT_WINDOW: usize = 10;

/// Knobs the aggregation functions take explicitly instead of reading globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Consecutive absences at which a student is flagged.
    pub absence_threshold: usize,
    /// Number of most recent non-cancelled schedules the roster scan looks at.
    pub alert_window: usize,
    /// Service a record without a service time is attributed to.
    pub default_service_time_id: Option<Uuid>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            absence_threshold: DEFAULT_ABSENCE_THRESHOLD,
            alert_window: DEFAULT_ALERT_WINDOW,
            default_service_time_id: None,
        }
    }
}

impl AggregatorConfig {
    pub fn new(
        absence_threshold: usize,
        alert_window: usize,
        default_service_time_id: Option<Uuid>,
    ) -> anyhow::Result<Self> {
        if absence_threshold == 0 {
            bail!("absence threshold must be at least 1");
        }
        if alert_window == 0 {
            bail!("alert window must cover at least one schedule");
        }

        Ok(Self {
            absence_threshold,
            alert_window,
            default_service_time_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = AggregatorConfig::default();
        assert_eq!(config.absence_threshold, 3);
        assert_eq!(config.alert_window, 10);
        assert_eq!(config.default_service_time_id, None);
    }

    #[test]
    fn rejects_zero_threshold_and_window() {
        assert!(AggregatorConfig::new(0, 10, None).is_err());
        assert!(AggregatorConfig::new(3, 0, None).is_err());
        assert!(AggregatorConfig::new(2, 5, None).is_ok());
    }
}
