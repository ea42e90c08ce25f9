use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub serial: SerialConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    /// Frame decryption key; without one, encrypted frames are rejected
    pub key: Option<KeyConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-read timeout; the handshake polls in steps of this size
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandshakeConfig {
    /// Total budget for one attempt, measured from attempt start (before the port opens)
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            deadline_secs: default_deadline_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GpioConfig {
    #[serde(default = "default_gpio_chip")]
    pub chip: String,
    #[serde(default = "default_bl_detect_pin")]
    pub bl_detect_pin: u32,
    /// Log pin changes instead of running gpioset
    #[serde(default)]
    pub mock: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        GpioConfig {
            chip: default_gpio_chip(),
            bl_detect_pin: default_bl_detect_pin(),
            mock: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum KeyConfig {
    /// 32-byte key given directly as 64 hex characters
    Static { hex: String },
    /// Wrapped data key unwrapped through KMS on use
    Kms {
        wrapped_key_file: String,
        #[serde(default = "default_kms_region")]
        region: String,
    },
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_ms() -> u64 {
    500
}

fn default_deadline_secs() -> u64 {
    10
}

fn default_gpio_chip() -> String {
    "gpiochip4".to_string()
}

fn default_bl_detect_pin() -> u32 {
    17
}

fn default_kms_region() -> String {
    "ap-south-1".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = serde_json::from_str(r#"{"serial": {"port": "/dev/ttyAMA0"}}"#).unwrap();

        assert_eq!(config.serial.port, "/dev/ttyAMA0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.read_timeout_ms, 500);
        assert_eq!(config.handshake.deadline_secs, 10);
        assert_eq!(config.gpio.chip, "gpiochip4");
        assert_eq!(config.gpio.bl_detect_pin, 17);
        assert!(!config.gpio.mock);
        assert!(config.key.is_none());
    }

    #[test]
    fn test_static_key_config() {
        let json = r#"{
            "serial": {"port": "COM3", "baud_rate": 57600},
            "gpio": {"mock": true},
            "key": {"source": "static", "hex": "00ff"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.serial.baud_rate, 57_600);
        assert!(config.gpio.mock);
        assert!(matches!(config.key, Some(KeyConfig::Static { ref hex }) if hex == "00ff"));
    }

    #[test]
    fn test_kms_key_config() {
        let json = r#"{
            "serial": {"port": "/dev/ttyUSB0"},
            "key": {"source": "kms", "wrapped_key_file": "/etc/du/key.bin"}
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        match config.key {
            Some(KeyConfig::Kms { wrapped_key_file, region }) => {
                assert_eq!(wrapped_key_file, "/etc/du/key.bin");
                assert_eq!(region, "ap-south-1");
            }
            other => panic!("unexpected key config: {:?}", other),
        }
    }

    #[test]
    fn test_missing_port_is_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{"serial": {}}"#).is_err());
    }
}
