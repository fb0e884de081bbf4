use std::time::Instant;

use crate::response::HealthResponse;
use crate::store::WindowStore;

/// Reports liveness along with how many rate limit windows are being tracked.
#[derive(Debug, Clone)]
pub struct HealthChecker {
    started: Instant,
    environment: String,
    stores: Vec<WindowStore>,
}

impl HealthChecker {
    pub fn new(environment: impl Into<String>, stores: Vec<WindowStore>) -> Self {
        Self {
            started: Instant::now(),
            environment: environment.into(),
            stores,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn tracked_keys(&self) -> usize {
        self.stores.iter().map(WindowStore::len).sum()
    }

    pub fn check_health(&self) -> HealthResponse {
        HealthResponse::up(self.uptime_secs(), &self.environment, self.tracked_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_health_counts_keys_across_stores() {
        let first = WindowStore::new();
        let second = WindowStore::new();
        first.increment("a", Duration::from_secs(60));
        first.increment("b", Duration::from_secs(60));
        second.increment("a", Duration::from_secs(60));

        let checker = HealthChecker::new("test", vec![first, second]);
        let health = checker.check_health();
        assert_eq!(health.status, "UP");
        assert_eq!(health.environment, "test");
        assert_eq!(health.tracked_keys, 3);

        let json = serde_json::to_string(&health).unwrap();
        assert!(json.contains("\"status\":\"UP\""));
    }
}
