use std::process::Command;

use crate::config::GpioConfig;

/// Presence line telling the DU a programmer is attached
pub trait PresenceSignal: Send {
    fn assert_presence(&mut self);
    fn deassert_presence(&mut self);
}

/// Keeps the presence line asserted for as long as it lives
pub struct PresenceGuard<'a> {
    signal: &'a mut dyn PresenceSignal,
}

impl<'a> PresenceGuard<'a> {
    pub fn assert(signal: &'a mut dyn PresenceSignal) -> Self {
        signal.assert_presence();
        PresenceGuard { signal }
    }
}

impl Drop for PresenceGuard<'_> {
    fn drop(&mut self) {
        self.signal.deassert_presence();
    }
}

/// BL-detect pin driven through libgpiod's `gpioset`
#[derive(Debug, Clone)]
pub struct GpioSignal {
    chip: String,
    pin: u32,
    mock: bool,
}

impl GpioSignal {
    pub fn new(config: &GpioConfig) -> Self {
        GpioSignal {
            chip: config.chip.clone(),
            pin: config.bl_detect_pin,
            // No gpiochip outside Linux
            mock: config.mock || !cfg!(target_os = "linux"),
        }
    }

    /// Drive the pin; failures are logged, never raised
    pub fn set_level(&self, high: bool) {
        let assignment = format!("{}={}", self.pin, u8::from(high));

        if self.mock {
            log::info!("[mock gpio] gpioset {} {}", self.chip, assignment);
            return;
        }

        log::debug!("Executing: gpioset {} {}", self.chip, assignment);
        match Command::new("gpioset").arg(&self.chip).arg(&assignment).status() {
            Ok(status) if status.success() => {
                log::info!("GPIO {} {}", self.pin, if high { "HIGH" } else { "LOW" });
            }
            Ok(status) => log::error!("gpioset {} {} exited with {}", self.chip, assignment, status),
            Err(e) => log::error!("Failed to run gpioset: {}", e),
        }
    }
}

impl PresenceSignal for GpioSignal {
    fn assert_presence(&mut self) {
        self.set_level(true);
    }

    fn deassert_presence(&mut self) {
        self.set_level(false);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every level change; clones share the record
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSignal {
        pub(crate) levels: Arc<Mutex<Vec<bool>>>,
    }

    impl RecordingSignal {
        pub(crate) fn history(&self) -> Vec<bool> {
            self.levels.lock().unwrap().clone()
        }

        pub(crate) fn is_asserted(&self) -> bool {
            self.history().last().copied().unwrap_or(false)
        }
    }

    impl PresenceSignal for RecordingSignal {
        fn assert_presence(&mut self) {
            self.levels.lock().unwrap().push(true);
        }

        fn deassert_presence(&mut self) {
            self.levels.lock().unwrap().push(false);
        }
    }

    #[test]
    fn test_guard_brackets_scope() {
        let mut signal = RecordingSignal::default();
        let observer = signal.clone();
        {
            let _guard = PresenceGuard::assert(&mut signal);
            assert!(observer.is_asserted());
        }
        assert_eq!(observer.history(), vec![true, false]);
    }

    #[test]
    fn test_guard_releases_on_early_return() {
        fn fails_midway(signal: &mut dyn PresenceSignal) -> Result<(), &'static str> {
            let _guard = PresenceGuard::assert(signal);
            let read: Result<usize, &'static str> = Err("read failed");
            read?;
            Ok(())
        }

        let mut signal = RecordingSignal::default();
        assert!(fails_midway(&mut signal).is_err());
        assert!(!signal.is_asserted());
    }

    #[test]
    fn test_mock_gpio_does_not_shell_out() {
        let mut gpio = GpioSignal::new(&GpioConfig {
            chip: "gpiochip-test".to_string(),
            bl_detect_pin: 17,
            mock: true,
        });
        gpio.assert_presence();
        gpio.deassert_presence();
        assert!(gpio.mock);
    }
}
