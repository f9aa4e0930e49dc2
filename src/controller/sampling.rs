use anyhow::Result;
use std::time::Duration;
use tracing::debug;

use crate::domain::InverterClient;

/// Averages several PV/consumption samples to damp sensor noise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningMean {
    samples: usize,
    spacing: Duration,
}

impl Default for RunningMean {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(3))
    }
}

impl RunningMean {
    pub fn new(samples: usize, spacing: Duration) -> Self {
        Self {
            samples: samples.max(1),
            spacing,
        }
    }

    /// Mean (PV power, house consumption) over the configured samples
    pub async fn read(&self, inverter: &dyn InverterClient) -> Result<(f64, f64)> {
        debug!(
            samples = self.samples,
            seconds = self.samples as u64 * self.spacing.as_secs(),
            "computing pv running mean"
        );
        let (mut ppv_sum, mut consumption_sum) = (0.0, 0.0);
        for i in 0..self.samples {
            let (ppv, consumption) = inverter.read_pv_and_consumption().await?;
            ppv_sum += ppv;
            consumption_sum += consumption;
            if i + 1 < self.samples {
                tokio::time::sleep(self.spacing).await;
            }
        }
        let n = self.samples as f64;
        Ok((ppv_sum / n, consumption_sum / n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockInverterClient;

    #[tokio::test(start_paused = true)]
    async fn test_mean_of_samples() {
        let mut inverter = MockInverterClient::new();
        let mut readings = vec![(1000.0, 500.0), (2000.0, 700.0), (3000.0, 900.0)].into_iter();
        inverter
            .expect_read_pv_and_consumption()
            .times(3)
            .returning(move || Ok(readings.next().unwrap_or((0.0, 0.0))));

        let started = tokio::time::Instant::now();
        let mean = RunningMean::new(3, Duration::from_secs(3));
        assert_eq!(mean.read(&inverter).await.unwrap(), (2000.0, 700.0));
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_failure_aborts_sampling() {
        let mut inverter = MockInverterClient::new();
        inverter
            .expect_read_pv_and_consumption()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("timeout")));

        assert!(RunningMean::default().read(&inverter).await.is_err());
    }
}
