use config::{Config, ConfigError, Environment, File};
use gattlink_core::TransportConfig;
use gattlink_peripheral::DeviceInfo;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct CliConfig {
    pub local_name: String,
    pub central_id: String,
    pub mtu: usize,
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,
    pub abort_on_chunk_error: bool,
    pub packet_cache_enabled: bool,
    pub reset_packets_on_reconnect: bool,
    pub interleave_ack_every: usize,
    pub manufacturer: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(deserialize_with = "deserialize_list")]
    pub ble_allowlist: Vec<String>,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(split_list(value))
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl CliConfig {
    /// Defaults, then the optional file, then `GATTLINK_*` environment variables.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("local_name", "gattlink")?
            .set_default("central_id", "gattlink-central")?
            .set_default("mtu", 20)?
            .set_default("reply_timeout", "2s")?
            .set_default("abort_on_chunk_error", false)?
            .set_default("packet_cache_enabled", true)?
            .set_default("reset_packets_on_reconnect", true)?
            .set_default("interleave_ack_every", 0)?
            .set_default("manufacturer", None::<String>)?
            .set_default("model_number", None::<String>)?
            .set_default("serial_number", None::<String>)?
            .set_default("hardware_revision", None::<String>)?
            .set_default("firmware_revision", None::<String>)?
            .set_default("software_revision", None::<String>)?
            .set_default("connect_timeout", "6s")?
            .set_default("ble_allowlist", Vec::<String>::new())?;

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(Environment::with_prefix("GATTLINK").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    /// Transport settings for the central session, validated.
    pub fn transport(&self) -> Result<TransportConfig, gattlink_core::ConfigError> {
        let transport = TransportConfig {
            mtu: self.mtu,
            reply_timeout: self.reply_timeout,
            abort_on_chunk_error: self.abort_on_chunk_error,
            packet_cache_enabled: self.packet_cache_enabled,
            reset_packets_on_reconnect: self.reset_packets_on_reconnect,
            interleave_ack_every: self.interleave_ack_every,
        };
        transport.validate()?;
        Ok(transport)
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            manufacturer: self.manufacturer.clone(),
            model_number: self.model_number.clone(),
            serial_number: self.serial_number.clone(),
            hardware_revision: self.hardware_revision.clone(),
            firmware_revision: self.firmware_revision.clone(),
            software_revision: self.software_revision.clone(),
        }
    }
}
