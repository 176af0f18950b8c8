// src/config/device.rs
use crate::types::DeviceKind;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Nonces per CPU thread in one dispatch when no batch size is given
pub const CPU_BATCH_PER_UNIT: u32 = 4_096;

/// One configured compute device
///
/// Written as `type,units[,batch,platform,device]`, e.g. `CPU,4` or
/// `GPU,64,262144,0,1`. For CPUs `units` is the thread count; for GPUs it is
/// the work-group size and every field is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub units: u32,
    /// Work-items per dispatch
    pub batch_size: u32,
    pub platform_id: usize,
    pub device_id: usize,
}

impl DeviceSpec {
    pub fn cpu(threads: u32) -> Self {
        DeviceSpec {
            kind: DeviceKind::Cpu,
            units: threads,
            batch_size: threads.saturating_mul(CPU_BATCH_PER_UNIT),
            platform_id: 0,
            device_id: 0,
        }
    }

    /// Short label for logs and thread names
    pub fn label(&self, index: usize) -> String {
        match self.kind {
            DeviceKind::Cpu => format!("cpu{}", index),
            DeviceKind::Gpu => format!("gpu{}-p{}d{}", index, self.platform_id, self.device_id),
        }
    }
}

fn parse_field<T: FromStr>(raw: &str, name: &str, spec: &str) -> Result<T, MinerError> {
    raw.trim().parse().map_err(|_| {
        MinerError::ConfigError(format!("Invalid {} '{}' in miner params '{}'", name, raw, spec))
    })
}

impl FromStr for DeviceSpec {
    type Err = MinerError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = spec.split(',').collect();
        let kind: DeviceKind = fields[0].parse().map_err(MinerError::ConfigError)?;

        if fields.len() < 2 {
            return Err(MinerError::ConfigError(format!(
                "Miner params '{}' must include a unit count",
                spec
            )));
        }
        let units: u32 = parse_field(fields[1], "unit count", spec)?;
        if units == 0 {
            return Err(MinerError::ConfigError(format!(
                "Unit count must be positive in '{}'",
                spec
            )));
        }

        let parsed = match (kind, fields.len()) {
            (DeviceKind::Gpu, 5) | (DeviceKind::Cpu, 5) => DeviceSpec {
                kind,
                units,
                batch_size: parse_field(fields[2], "batch size", spec)?,
                platform_id: parse_field(fields[3], "platform id", spec)?,
                device_id: parse_field(fields[4], "device id", spec)?,
            },
            (DeviceKind::Cpu, 2) => DeviceSpec::cpu(units),
            (DeviceKind::Cpu, 3) => DeviceSpec {
                batch_size: parse_field(fields[2], "batch size", spec)?,
                ..DeviceSpec::cpu(units)
            },
            (DeviceKind::Gpu, _) => {
                return Err(MinerError::ConfigError(format!(
                    "GPU miner must specify work items, platform ID and device ID: {}",
                    spec
                )));
            }
            (DeviceKind::Cpu, _) => {
                return Err(MinerError::ConfigError(format!(
                    "CPU miner params must be CPU,<threads>[,<batch>]: {}",
                    spec
                )));
            }
        };

        parsed.validate()?;
        Ok(parsed)
    }
}

impl DeviceSpec {
    /// Checks the batch geometry the backends rely on
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.batch_size == 0 {
            return Err(MinerError::ConfigError(format!(
                "Batch size must be positive for {}",
                self
            )));
        }
        if self.kind == DeviceKind::Gpu && self.batch_size % self.units != 0 {
            return Err(MinerError::ConfigError(format!(
                "GPU batch size {} is not a multiple of work-group size {}",
                self.batch_size, self.units
            )));
        }
        Ok(())
    }
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.kind, self.units, self.batch_size, self.platform_id, self.device_id
        )
    }
}

impl TryFrom<String> for DeviceSpec {
    type Error = MinerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceSpec> for String {
    fn from(spec: DeviceSpec) -> Self {
        spec.to_string()
    }
}
