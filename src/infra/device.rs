// ============================================================
// Layer 6 — Device Placement
// ============================================================
// Turns the `--device` hint into a WGPU device. `auto` lets
// wgpu pick the best adapter it can find.

use burn::backend::wgpu::WgpuDevice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DevicePlacement {
    #[default]
    Auto,
    Cpu,
    Gpu(usize),
}

impl DevicePlacement {
    pub fn wgpu_device(self) -> WgpuDevice {
        match self {
            DevicePlacement::Auto => WgpuDevice::default(),
            DevicePlacement::Cpu => WgpuDevice::Cpu,
            DevicePlacement::Gpu(index) => WgpuDevice::DiscreteGpu(index),
        }
    }
}

impl FromStr for DevicePlacement {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu(0)),
            other => other
                .strip_prefix("gpu:")
                .or_else(|| other.strip_prefix("cuda:"))
                .and_then(|idx| idx.parse().ok())
                .map(Self::Gpu)
                .ok_or_else(|| ConfigError::InvalidDevice(s.to_string())),
        }
    }
}

impl fmt::Display for DevicePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePlacement::Auto => write!(f, "auto"),
            DevicePlacement::Cpu => write!(f, "cpu"),
            DevicePlacement::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_placements() {
        assert_eq!("auto".parse::<DevicePlacement>().unwrap(), DevicePlacement::Auto);
        assert_eq!("CPU".parse::<DevicePlacement>().unwrap(), DevicePlacement::Cpu);
        assert_eq!("gpu:1".parse::<DevicePlacement>().unwrap(), DevicePlacement::Gpu(1));
        assert_eq!("cuda".parse::<DevicePlacement>().unwrap(), DevicePlacement::Gpu(0));
        assert!("tpu".parse::<DevicePlacement>().is_err());
        assert!("gpu:x".parse::<DevicePlacement>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for p in [DevicePlacement::Auto, DevicePlacement::Cpu, DevicePlacement::Gpu(3)] {
            assert_eq!(p.to_string().parse::<DevicePlacement>().unwrap(), p);
        }
    }
}
