use std::convert::TryFrom;

use super::Error;

/// Number of vblanks to wait between two presented frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapInterval {
    /// Present as soon as possible, tearing if the hardware allows it
    Immediate,
    /// Present on the next vblank
    #[default]
    VSync,
}

impl TryFrom<i32> for SwapInterval {
    type Error = Error;

    fn try_from(interval: i32) -> Result<Self, Self::Error> {
        match interval {
            0 => Ok(SwapInterval::Immediate),
            1 => Ok(SwapInterval::VSync),
            x => Err(Error::InvalidSwapInterval(x)),
        }
    }
}

/// Configuration of a [`KmsDisplay`](super::KmsDisplay)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentConfig {
    /// Block until every frame is on screen before returning from `present`.
    ///
    /// Selects [`Strategy::DoubleBufferedAtomic`](super::Strategy::DoubleBufferedAtomic)
    /// over the fenced path and adds a wait for every queued legacy flip.
    pub double_buffer: bool,
    /// Initial swap interval
    pub swap_interval: SwapInterval,
    /// Never use the atomic api, even if the device supports it
    pub disable_atomic: bool,
    /// Allow asynchronous page flips with a swap interval of 0
    pub allow_async_flip: bool,
}

impl Default for PresentConfig {
    fn default() -> Self {
        PresentConfig {
            double_buffer: false,
            swap_interval: SwapInterval::VSync,
            disable_atomic: false,
            allow_async_flip: true,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|x| x == "1" || x.to_lowercase() == "true" || x.to_lowercase() == "yes" || x.to_lowercase() == "y")
}

impl PresentConfig {
    /// Default configuration adjusted by environment variables
    ///
    /// - `SMITHAY_USE_LEGACY` disables the atomic api
    /// - `SMITHAY_KMS_DOUBLE_BUFFER` enables [`double_buffer`](PresentConfig::double_buffer)
    /// - `SMITHAY_KMS_SWAP_INTERVAL` sets the initial swap interval (`0` or `1`)
    pub fn from_env() -> PresentConfig {
        let mut config = PresentConfig::default();
        if let Some(legacy) = env_flag("SMITHAY_USE_LEGACY") {
            config.disable_atomic = legacy;
        }
        if let Some(double_buffer) = env_flag("SMITHAY_KMS_DOUBLE_BUFFER") {
            config.double_buffer = double_buffer;
        }
        if let Ok(interval) = std::env::var("SMITHAY_KMS_SWAP_INTERVAL") {
            match interval.trim().parse::<i32>() {
                Ok(value) => match SwapInterval::try_from(value) {
                    Ok(interval) => config.swap_interval = interval,
                    Err(err) => tracing::warn!(value, "Ignoring SMITHAY_KMS_SWAP_INTERVAL: {}", err),
                },
                Err(_) => tracing::warn!(?interval, "Ignoring malformed SMITHAY_KMS_SWAP_INTERVAL"),
            }
        }
        config
    }

    /// Sets [`double_buffer`](PresentConfig::double_buffer)
    pub fn double_buffer(mut self, double_buffer: bool) -> Self {
        self.double_buffer = double_buffer;
        self
    }

    /// Sets the initial swap interval
    pub fn swap_interval(mut self, interval: SwapInterval) -> Self {
        self.swap_interval = interval;
        self
    }

    /// Sets [`disable_atomic`](PresentConfig::disable_atomic)
    pub fn disable_atomic(mut self, disable: bool) -> Self {
        self.disable_atomic = disable;
        self
    }

    /// Sets [`allow_async_flip`](PresentConfig::allow_async_flip)
    pub fn allow_async_flip(mut self, allow: bool) -> Self {
        self.allow_async_flip = allow;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{PresentConfig, SwapInterval};
    use crate::backend::drm::Error;
    use std::convert::TryFrom;

    #[test]
    fn swap_interval_accepts_zero_and_one() {
        assert_eq!(SwapInterval::try_from(0).unwrap(), SwapInterval::Immediate);
        assert_eq!(SwapInterval::try_from(1).unwrap(), SwapInterval::VSync);
        assert!(matches!(SwapInterval::try_from(2), Err(Error::InvalidSwapInterval(2))));
        assert!(matches!(
            SwapInterval::try_from(-1),
            Err(Error::InvalidSwapInterval(-1))
        ));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = PresentConfig::default()
            .double_buffer(true)
            .swap_interval(SwapInterval::Immediate)
            .disable_atomic(true)
            .allow_async_flip(false);
        assert!(config.double_buffer);
        assert!(config.disable_atomic);
        assert!(!config.allow_async_flip);
        assert_eq!(config.swap_interval, SwapInterval::Immediate);
    }

    #[test]
    fn environment_is_parsed() {
        std::env::set_var("SMITHAY_USE_LEGACY", "yes");
        std::env::set_var("SMITHAY_KMS_DOUBLE_BUFFER", "1");
        std::env::set_var("SMITHAY_KMS_SWAP_INTERVAL", "0");
        let config = PresentConfig::from_env();
        std::env::remove_var("SMITHAY_USE_LEGACY");
        std::env::remove_var("SMITHAY_KMS_DOUBLE_BUFFER");
        std::env::remove_var("SMITHAY_KMS_SWAP_INTERVAL");

        assert!(config.disable_atomic);
        assert!(config.double_buffer);
        assert_eq!(config.swap_interval, SwapInterval::Immediate);
    }
}
