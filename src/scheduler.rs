//! Fixed-rate trigger for the polling service

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::service::PollingService;

/// Start ticking `service` every `period`.
///
/// Each tick is awaited before the next is taken; ticks missed while a slow
/// poll runs are skipped rather than queued.
pub fn spawn_poller(service: Arc<PollingService>, period: Duration) -> JoinHandle<()> {
    info!("Starting poller every {}ms", period.as_millis());

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            if let Some(report) = service.tick().await {
                debug!(
                    "Poll: {} read, {} simulated, {} failed",
                    report.read, report.simulated, report.failed
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::device::MockDeviceClient;
    use crate::error::DeviceError;
    use crate::registry::VariableRegistry;

    #[tokio::test(start_paused = true)]
    async fn test_poller_drives_ticks_until_aborted() {
        let mut client = MockDeviceClient::new();
        client
            .expect_open()
            .returning(|_| Err(DeviceError::Connection("offline".to_string())));

        let registry = Arc::new(VariableRegistry::new());
        let service = Arc::new(PollingService::new(
            Arc::new(client),
            registry.clone(),
            DeviceConfig {
                simulation_seed: Some(5),
                ..DeviceConfig::default()
            },
        ));
        service.connect_configured().await;

        let handle = spawn_poller(service.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(520)).await;
        handle.abort();

        let samples = registry.get("DB2.DBW0").unwrap().stats.sample_count;
        // one cold-start sample plus roughly ten ticks
        assert!(samples >= 5, "only {} samples", samples);

        let settled = samples;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            registry.get("DB2.DBW0").unwrap().stats.sample_count,
            settled
        );
    }
}
