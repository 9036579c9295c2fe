//! Actions flipping a single wheel setting of the device.

use hidpp::{
    feature::{
        hires_wheel::v0::{HiResWheelFeatureV0, MODE_HIRES},
        smartshift::v0::SmartShiftFeatureV0,
    },
    protocol::v20::Hidpp20Error,
};
use tracing::{error, info, warn};

use super::ActionContext;

/// Switches the wheel between ratchet and freespin mode.
pub async fn toggle_smartshift(ctx: &ActionContext) {
    let Some(device) = ctx.device() else {
        return;
    };

    let res: Result<Option<bool>, Hidpp20Error> = async {
        let Some(smartshift) = device.feature::<SmartShiftFeatureV0>().await? else {
            return Ok(None);
        };

        let active = !smartshift.is_active().await?;
        smartshift.set_active(active).await?;
        Ok(Some(active))
    }
    .await;

    match res {
        Ok(Some(active)) => {
            info!(device_index = device.device_index, active, "toggled SmartShift");
        },
        Ok(None) => {
            warn!(device_index = device.device_index, "the device does not support SmartShift");
        },
        Err(err) => {
            error!(device_index = device.device_index, "could not toggle SmartShift: {err}");
        },
    }
}

/// Flips the hi-res bit of the wheel mode.
pub async fn toggle_hires_scroll(ctx: &ActionContext) {
    let Some(device) = ctx.device() else {
        return;
    };

    let res: Result<Option<u8>, Hidpp20Error> = async {
        let Some(wheel) = device.feature::<HiResWheelFeatureV0>().await? else {
            return Ok(None);
        };

        let bits = wheel.get_mode_bits().await? ^ MODE_HIRES;
        Ok(Some(wheel.set_mode_bits(bits).await?))
    }
    .await;

    match res {
        Ok(Some(bits)) => info!(
            device_index = device.device_index,
            hires = bits & MODE_HIRES != 0,
            "toggled hi-res scrolling"
        ),
        Ok(None) => warn!(
            device_index = device.device_index,
            "the device does not support hi-res scrolling"
        ),
        Err(err) => error!(
            device_index = device.device_index,
            "could not toggle hi-res scrolling: {err}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU8, Ordering},
        },
        time::Duration,
    };

    use hidpp::mock::{MockDevice, MockReply};

    use super::*;
    use crate::{
        action::{Action, testing},
        config::ActionConfig,
    };

    fn smartshift(mode: &Arc<AtomicU8>) -> MockDevice {
        let mode = Arc::clone(mode);
        MockDevice::new(0x01).with_feature(0x2110, move |function, params| {
            match function.to_lo() {
                0 => MockReply::Ok(vec![mode.load(Ordering::SeqCst), 0xff, 0xff]),
                1 => {
                    mode.store(params[0], Ordering::SeqCst);
                    MockReply::Ok(vec![])
                },
                _ => MockReply::Err(0x07),
            }
        })
    }

    #[tokio::test]
    async fn smartshift_flips_between_modes() {
        let mode = Arc::new(AtomicU8::new(2));
        let mock = smartshift(&mode);
        let (_device, _, ctx) = testing::context(&mock).await;
        let mut action = Action::from_config(&ActionConfig::ToggleSmartShift, &ctx).unwrap();

        action.press().await;
        assert_eq!(mode.load(Ordering::SeqCst), 1);
        action.release().await;
        action.press().await;
        assert_eq!(mode.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn smartshift_errors_leave_the_device_alone() {
        let mock = MockDevice::new(0x01).with_feature(0x2110, |_, _| MockReply::Err(0x05));
        let (_device, _, ctx) = testing::context(&mock).await;
        let mut action = Action::from_config(&ActionConfig::ToggleSmartShift, &ctx).unwrap();

        action.press().await;
        assert_eq!(mock.requests_to(0x2110, 0).len(), 1);
        assert!(mock.requests_to(0x2110, 1).is_empty());
    }

    #[tokio::test]
    async fn hires_scroll_flips_only_its_bit() {
        let bits = Arc::new(AtomicU8::new(MODE_HIRES | 0x04));
        let mock = MockDevice::new(0x01).with_feature(0x2121, {
            let bits = Arc::clone(&bits);
            move |function, params| match function.to_lo() {
                1 => MockReply::Ok(vec![bits.load(Ordering::SeqCst)]),
                2 => {
                    bits.store(params[0], Ordering::SeqCst);
                    MockReply::Ok(vec![params[0]])
                },
                _ => MockReply::Err(0x07),
            }
        });
        let (_device, _, ctx) = testing::context(&mock).await;
        let mut action = Action::from_config(&ActionConfig::ToggleHiresScroll, &ctx).unwrap();

        action.press().await;
        assert_eq!(bits.load(Ordering::SeqCst), 0x04);
        action.press().await;
        assert_eq!(bits.load(Ordering::SeqCst), MODE_HIRES | 0x04);
    }

    #[tokio::test]
    async fn unsupported_features_are_skipped() {
        let mock = MockDevice::new(0x01);
        let (_device, _, ctx) = testing::context(&mock).await;

        toggle_hires_scroll(&ctx).await;
        assert!(mock.requests_to(0x2121, 1).is_empty());
    }

    #[tokio::test]
    async fn hires_scroll_errors_leave_the_device_alone() {
        let mock = MockDevice::new(0x01).with_feature(0x2121, |function, _| {
            match function.to_lo() {
                1 => MockReply::Err(0x04),
                _ => MockReply::Ok(vec![0x00]),
            }
        });
        let (_device, _, ctx) = testing::context(&mock).await;

        toggle_hires_scroll(&ctx).await;
        assert_eq!(mock.requests_to(0x2121, 1).len(), 1);
        assert!(mock.requests_to(0x2121, 2).is_empty());
    }

    #[tokio::test]
    async fn timeouts_leave_the_device_alone() {
        let mock = MockDevice::new(0x01)
            .with_feature(0x2110, |_, _| MockReply::Silent)
            .with_feature(0x2121, |_, _| MockReply::Silent);
        let (device, _, ctx) = testing::context(&mock).await;
        device.channel().set_timeout(Duration::from_millis(100));

        toggle_smartshift(&ctx).await;
        toggle_hires_scroll(&ctx).await;

        assert_eq!(mock.requests_to(0x2110, 0).len(), 1);
        assert!(mock.requests_to(0x2110, 1).is_empty());
        assert_eq!(mock.requests_to(0x2121, 1).len(), 1);
        assert!(mock.requests_to(0x2121, 2).is_empty());
    }
}
