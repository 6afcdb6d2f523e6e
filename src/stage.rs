//! Motion capability for a single axis.
//!
//! [`Movable`] is the small async contract generic motion code is written
//! against. [`AxisStage`] implements it for one axis of a connected AMC100,
//! so sequencing code does not need to know about handles, approach flags or
//! moving-status polling.
//!
//! # Example
//!
//! ```rust,ignore
//! let stage = AxisStage::new(amc.clone(), handle, 0);
//! stage.enable().await?;
//! stage.move_abs(250_000.0).await?;
//! stage.wait_settled().await?;
//! ```

use crate::device::Amc100;
use crate::types::{Axis, DeviceHandle, MovingStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default upper bound for [`Movable::wait_settled`].
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between moving-status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Capability: Motion Control
///
/// Devices that can move to a position along one axis.
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to absolute position
    ///
    /// # Arguments
    /// * `position` - Target position in device-native units
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to current position
    async fn move_rel(&self, distance: f64) -> Result<()>;

    /// Get current position in device-native units.
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to settle
    ///
    /// Returns an error on timeout or hardware error.
    async fn wait_settled(&self) -> Result<()>;

    /// Stop motion immediately
    ///
    /// # Default Implementation
    /// Returns an error indicating stop is not supported.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

/// One AMC100 axis seen as a [`Movable`].
///
/// Positions are in the actor's native unit: nm for linear actors, µ° for
/// goniometers and rotators. Fractional values are rounded to the nearest
/// integer unit.
pub struct AxisStage {
    amc: Arc<Amc100>,
    handle: DeviceHandle,
    axis: Axis,
    settle_timeout: Duration,
    poll_interval: Duration,
}

impl AxisStage {
    /// Stage on `axis` of the session `handle`.
    pub fn new(amc: Arc<Amc100>, handle: DeviceHandle, axis: Axis) -> Self {
        Self {
            amc,
            handle,
            axis,
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Change the settle timeout.
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Change the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Axis driven by this stage.
    pub fn axis(&self) -> Axis {
        self.axis
    }

    /// Switch the output stage on.
    pub async fn enable(&self) -> Result<()> {
        self.amc
            .set_output(self.handle, self.axis, true)
            .await
            .with_context(|| format!("Failed to enable output on axis {}", self.axis))?;
        Ok(())
    }

    fn to_native(&self, value: f64) -> Result<i32> {
        if !value.is_finite() {
            anyhow::bail!("Position {} is not finite", value);
        }
        let rounded = value.round();
        if rounded < f64::from(i32::MIN) || rounded > f64::from(i32::MAX) {
            anyhow::bail!("Position {} out of range for axis {}", value, self.axis);
        }
        Ok(rounded as i32)
    }
}

#[async_trait]
impl Movable for AxisStage {
    async fn move_abs(&self, position: f64) -> Result<()> {
        let target = self.to_native(position)?;
        tracing::debug!(axis = self.axis, target, "move_abs");
        self.amc
            .set_target_position(self.handle, self.axis, target)
            .await
            .with_context(|| format!("Failed to set target on axis {}", self.axis))?;
        self.amc
            .set_approach(self.handle, self.axis, true)
            .await
            .with_context(|| format!("Failed to start approach on axis {}", self.axis))?;
        Ok(())
    }

    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = self.position().await?;
        self.move_abs(current + distance).await
    }

    async fn position(&self) -> Result<f64> {
        let position = self
            .amc
            .position(self.handle, self.axis)
            .await
            .with_context(|| format!("Failed to read position of axis {}", self.axis))?;
        Ok(f64::from(position))
    }

    async fn wait_settled(&self) -> Result<()> {
        let deadline = Instant::now() + self.settle_timeout;
        loop {
            let status = self
                .amc
                .moving_status(self.handle, self.axis)
                .await
                .with_context(|| format!("Failed to poll axis {}", self.axis))?;
            match status {
                MovingStatus::Idle => return Ok(()),
                MovingStatus::Pending => {
                    anyhow::bail!("Axis {} is pending: output disabled or end of travel", self.axis)
                }
                MovingStatus::Moving => {}
            }
            if Instant::now() >= deadline {
                anyhow::bail!(
                    "Axis {} did not settle within {:?}",
                    self.axis,
                    self.settle_timeout
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn stop(&self) -> Result<()> {
        self.amc
            .set_approach(self.handle, self.axis, false)
            .await
            .context("Failed to cancel approach")?;
        self.amc
            .set_continuous_forward(self.handle, self.axis, false)
            .await
            .context("Failed to stop continuous motion")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulatedTransport;

    async fn stage() -> (Arc<Amc100>, AxisStage) {
        let amc = Arc::new(Amc100::new(SimulatedTransport::single("sim", "STG-1")));
        let handle = amc.connect("sim").await.unwrap();
        let stage = AxisStage::new(amc.clone(), handle, 0)
            .with_poll_interval(Duration::from_millis(1))
            .with_settle_timeout(Duration::from_millis(200));
        (amc, stage)
    }

    #[tokio::test]
    async fn absolute_and_relative_moves() {
        let (_amc, stage) = stage().await;
        stage.enable().await.unwrap();
        stage.move_abs(12_000.4).await.unwrap();
        stage.wait_settled().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 12_000.0);

        stage.move_rel(-2_000.0).await.unwrap();
        stage.wait_settled().await.unwrap();
        assert_eq!(stage.position().await.unwrap(), 10_000.0);
    }

    #[tokio::test]
    async fn move_without_output_does_not_settle() {
        let (_amc, stage) = stage().await;
        stage.move_abs(50_000.0).await.unwrap();
        let err = stage.wait_settled().await.unwrap_err();
        assert!(err.to_string().contains("pending"));
        stage.stop().await.unwrap();
        stage.wait_settled().await.unwrap();
    }

    #[tokio::test]
    async fn non_finite_target_is_rejected() {
        let (_amc, stage) = stage().await;
        assert!(stage.move_abs(f64::NAN).await.is_err());
        assert!(stage.move_abs(1e12).await.is_err());
    }

    #[tokio::test]
    async fn continuous_motion_times_out() {
        let (amc, stage) = stage().await;
        stage.enable().await.unwrap();
        let handle = amc.handles().await[0];
        amc.set_continuous_forward(handle, 0, true).await.unwrap();
        let err = stage.wait_settled().await.unwrap_err();
        assert!(err.to_string().contains("did not settle"));
        stage.stop().await.unwrap();
    }
}
