//! Actions changing the sensor resolution.

use hidpp::{
    feature::adjustable_dpi::v0::AdjustableDpiFeatureV0,
    protocol::v20::Hidpp20Error,
};
use tracing::{error, info, warn};

use super::ActionContext;

/// Cycles through a list of DPI values.
pub struct CycleDpiAction {
    dpis: Vec<u16>,
    ctx: ActionContext,
}

impl CycleDpiAction {
    pub fn new(dpis: Vec<u16>, ctx: ActionContext) -> Self {
        Self {
            dpis,
            ctx,
        }
    }

    pub fn dpis(&self) -> &[u16] {
        &self.dpis
    }

    pub async fn press(&self) {
        let Some(device) = self.ctx.device() else {
            return;
        };

        let res: Result<Option<(u8, u16)>, Hidpp20Error> = async {
            match device.feature::<AdjustableDpiFeatureV0>().await? {
                Some(feature) => self.cycle(&feature).await.map(Some),
                None => Ok(None),
            }
        }
        .await;

        match res {
            Ok(Some((sensor, dpi))) => {
                info!(device_index = device.device_index, sensor, dpi, "changed DPI");
            },
            Ok(None) => {
                warn!(
                    device_index = device.device_index,
                    "the device does not support DPI changes"
                );
            },
            Err(err) => {
                error!(device_index = device.device_index, "could not cycle DPI: {err}");
            },
        }
    }

    /// Moves the first sensor set to a listed value on to the next one.
    ///
    /// If no sensor is set to a listed value, sensor `0` is set to the first
    /// one, or back to its default if the list is empty.
    async fn cycle(&self, feature: &AdjustableDpiFeatureV0) -> Result<(u8, u16), Hidpp20Error> {
        let sensors = feature.get_sensor_count().await?;

        for sensor in 0..sensors {
            let (current, _) = feature.get_sensor_dpi(sensor).await?;
            if let Some(pos) = self.dpis.iter().position(|&dpi| dpi == current) {
                let next = self.dpis[(pos + 1) % self.dpis.len()];
                feature.set_sensor_dpi(sensor, next).await?;
                return Ok((sensor, next));
            }
        }

        let dpi = match self.dpis.first() {
            Some(&dpi) => dpi,
            None => feature.get_sensor_dpi(0).await?.1,
        };
        feature.set_sensor_dpi(0, dpi).await?;

        Ok((0, dpi))
    }
}

/// Adds a fixed amount to the DPI of every sensor.
pub struct ChangeDpiAction {
    inc: i32,
    ctx: ActionContext,
}

impl ChangeDpiAction {
    pub fn new(inc: i32, ctx: ActionContext) -> Self {
        Self {
            inc,
            ctx,
        }
    }

    pub fn inc(&self) -> i32 {
        self.inc
    }

    pub async fn press(&self) {
        let Some(device) = self.ctx.device() else {
            return;
        };

        let res = async {
            let Some(feature) = device.feature::<AdjustableDpiFeatureV0>().await? else {
                warn!(
                    device_index = device.device_index,
                    "the device does not support DPI changes"
                );
                return Ok(());
            };

            for sensor in 0..feature.get_sensor_count().await? {
                let (current, _) = feature.get_sensor_dpi(sensor).await?;

                // The device decides whether it accepts the value.
                let Ok(dpi) = u16::try_from(i32::from(current) + self.inc) else {
                    warn!(sensor, current, inc = self.inc, "DPI out of range, not changing it");
                    continue;
                };

                feature.set_sensor_dpi(sensor, dpi).await?;
                info!(device_index = device.device_index, sensor, dpi, "changed DPI");
            }

            Ok::<_, Hidpp20Error>(())
        }
        .await;

        if let Err(err) = res {
            error!(device_index = device.device_index, "could not change DPI: {err}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use hidpp::mock::{MockDevice, MockReply};

    use crate::{
        action::{Action, testing},
        config::ActionConfig,
    };

    /// A device with one sensor per entry, each given as `(current, default)`.
    pub fn dpi_device(sensors: &Arc<Mutex<Vec<(u16, u16)>>>) -> MockDevice {
        let sensors = Arc::clone(sensors);
        MockDevice::new(0x01).with_feature(0x2201, move |function, params| {
            let mut sensors = sensors.lock().unwrap();
            match function.to_lo() {
                0 => MockReply::Ok(vec![sensors.len() as u8]),
                2 => {
                    let Some(&(current, default)) = sensors.get(params[0] as usize) else {
                        return MockReply::Err(0x02);
                    };
                    let [cur_hi, cur_lo] = current.to_be_bytes();
                    let [def_hi, def_lo] = default.to_be_bytes();
                    MockReply::Ok(vec![params[0], cur_hi, cur_lo, def_hi, def_lo])
                },
                3 => {
                    sensors[params[0] as usize].0 = u16::from_be_bytes([params[1], params[2]]);
                    MockReply::Ok(vec![])
                },
                _ => MockReply::Err(0x07),
            }
        })
    }

    async fn press(config: ActionConfig, sensors: Vec<(u16, u16)>) -> Vec<u16> {
        let sensors = Arc::new(Mutex::new(sensors));
        let mock = dpi_device(&sensors);
        let (_device, _, ctx) = testing::context(&mock).await;

        Action::from_config(&config, &ctx).unwrap().press().await;

        let current = sensors.lock().unwrap().iter().map(|&(current, _)| current).collect();
        current
    }

    fn cycle(dpis: &[u16]) -> ActionConfig {
        ActionConfig::CycleDpi {
            dpis: dpis.to_vec(),
        }
    }

    #[tokio::test]
    async fn cycle_wraps_around() {
        let dpis = [800, 1200, 1600];
        assert_eq!(press(cycle(&dpis), vec![(1600, 1000)]).await, vec![800]);
        assert_eq!(press(cycle(&dpis), vec![(800, 1000)]).await, vec![1200]);
    }

    #[tokio::test]
    async fn cycle_updates_only_the_first_matching_sensor() {
        let dpis = [800, 1200, 1600];
        assert_eq!(
            press(cycle(&dpis), vec![(1000, 1000), (1200, 1000), (1600, 1000)]).await,
            vec![1000, 1600, 1600]
        );
    }

    #[tokio::test]
    async fn cycle_falls_back_to_sensor_zero() {
        let dpis = [800, 1200, 1600];
        assert_eq!(press(cycle(&dpis), vec![(1000, 1000), (1000, 1000)]).await, vec![800, 1000]);
        assert_eq!(press(cycle(&[]), vec![(1000, 1200)]).await, vec![1200]);
    }

    #[tokio::test]
    async fn change_applies_to_every_sensor() {
        let change = |inc| ActionConfig::ChangeDpi {
            inc,
        };
        assert_eq!(press(change(-200), vec![(1600, 1000)]).await, vec![1400]);
        assert_eq!(
            press(change(-200), vec![(1600, 1000), (100, 1000)]).await,
            vec![1400, 100]
        );
        assert_eq!(press(change(400), vec![(800, 1000), (1000, 1000)]).await, vec![1200, 1400]);
    }

    /// A single sensor whose DPI reads answer with `reply`.
    fn failing_reads(reply: fn() -> MockReply) -> MockDevice {
        MockDevice::new(0x01).with_feature(0x2201, move |function, _| match function.to_lo() {
            0 => MockReply::Ok(vec![1]),
            2 => reply(),
            _ => MockReply::Ok(vec![]),
        })
    }

    async fn assert_no_write(mock: MockDevice) {
        let (device, _, ctx) = testing::context(&mock).await;
        device.channel().set_timeout(Duration::from_millis(100));

        for config in [cycle(&[800, 1200]), ActionConfig::ChangeDpi { inc: 200 }] {
            Action::from_config(&config, &ctx).unwrap().press().await;
        }

        assert_eq!(mock.requests_to(0x2201, 2).len(), 2);
        assert!(mock.requests_to(0x2201, 3).is_empty());
    }

    #[tokio::test]
    async fn device_errors_leave_the_dpi_alone() {
        assert_no_write(failing_reads(|| MockReply::Err(0x05))).await;
    }

    #[tokio::test]
    async fn timeouts_leave_the_dpi_alone() {
        assert_no_write(failing_reads(|| MockReply::Silent)).await;
    }
}
