//! Per-rig miner profile: typed fields, values, and the stores that persist them.

mod local_store;
mod remote_store;
mod service;

use std::{fmt, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use local_store::LocalStore;
pub use remote_store::{ProfileClient, RemoteStore};
pub use service::ProfileService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MinerProfileField {
    MinerName,
    IsAutoThisPcName,
    IsShowInTaskbar,
    IsAutoBoot,
    IsAutoStart,
    IsAutoRestartKernel,
    IsNoShareRestartKernel,
    NoShareRestartKernelMinutes,
    IsPeriodicRestartKernel,
    PeriodicRestartKernelHours,
    IsPeriodicRestartComputer,
    PeriodicRestartComputerHours,
    IsShowCommandLine,
    CoinId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Text,
    Id,
}

impl MinerProfileField {
    pub const ALL: [MinerProfileField; 14] = [
        Self::MinerName,
        Self::IsAutoThisPcName,
        Self::IsShowInTaskbar,
        Self::IsAutoBoot,
        Self::IsAutoStart,
        Self::IsAutoRestartKernel,
        Self::IsNoShareRestartKernel,
        Self::NoShareRestartKernelMinutes,
        Self::IsPeriodicRestartKernel,
        Self::PeriodicRestartKernelHours,
        Self::IsPeriodicRestartComputer,
        Self::PeriodicRestartComputerHours,
        Self::IsShowCommandLine,
        Self::CoinId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::MinerName => "minerName",
            Self::IsAutoThisPcName => "isAutoThisPcName",
            Self::IsShowInTaskbar => "isShowInTaskbar",
            Self::IsAutoBoot => "isAutoBoot",
            Self::IsAutoStart => "isAutoStart",
            Self::IsAutoRestartKernel => "isAutoRestartKernel",
            Self::IsNoShareRestartKernel => "isNoShareRestartKernel",
            Self::NoShareRestartKernelMinutes => "noShareRestartKernelMinutes",
            Self::IsPeriodicRestartKernel => "isPeriodicRestartKernel",
            Self::PeriodicRestartKernelHours => "periodicRestartKernelHours",
            Self::IsPeriodicRestartComputer => "isPeriodicRestartComputer",
            Self::PeriodicRestartComputerHours => "periodicRestartComputerHours",
            Self::IsShowCommandLine => "isShowCommandLine",
            Self::CoinId => "coinId",
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            Self::MinerName => ValueKind::Text,
            Self::NoShareRestartKernelMinutes
            | Self::PeriodicRestartKernelHours
            | Self::PeriodicRestartComputerHours => ValueKind::Int,
            Self::CoinId => ValueKind::Id,
            _ => ValueKind::Bool,
        }
    }
}

impl fmt::Display for MinerProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MinerProfileField {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProfileError::UnknownField(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum ProfileValue {
    Bool(bool),
    Int(i64),
    Text(String),
    Id(Uuid),
}

impl ProfileValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Text(_) => ValueKind::Text,
            Self::Id(_) => ValueKind::Id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("unknown profile field `{0}`")]
    UnknownField(String),
    #[error("field {field} expects a {expected:?} value, got {found:?}")]
    TypeMismatch {
        field: MinerProfileField,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("field {field} is out of range: {value}")]
    OutOfRange { field: MinerProfileField, value: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MinerProfile {
    pub miner_name: String,
    pub is_auto_this_pc_name: bool,
    pub is_show_in_taskbar: bool,
    pub is_auto_boot: bool,
    pub is_auto_start: bool,
    pub is_auto_restart_kernel: bool,
    pub is_no_share_restart_kernel: bool,
    pub no_share_restart_kernel_minutes: u32,
    pub is_periodic_restart_kernel: bool,
    pub periodic_restart_kernel_hours: u32,
    pub is_periodic_restart_computer: bool,
    pub periodic_restart_computer_hours: u32,
    pub is_show_command_line: bool,
    pub coin_id: Uuid,
}

impl Default for MinerProfile {
    fn default() -> Self {
        Self {
            miner_name: String::new(),
            is_auto_this_pc_name: true,
            is_show_in_taskbar: true,
            is_auto_boot: false,
            is_auto_start: false,
            is_auto_restart_kernel: true,
            is_no_share_restart_kernel: false,
            no_share_restart_kernel_minutes: 15,
            is_periodic_restart_kernel: false,
            periodic_restart_kernel_hours: 12,
            is_periodic_restart_computer: false,
            periodic_restart_computer_hours: 24,
            is_show_command_line: false,
            coin_id: Uuid::nil(),
        }
    }
}

impl MinerProfile {
    pub fn get(&self, field: MinerProfileField) -> ProfileValue {
        use MinerProfileField as F;
        match field {
            F::MinerName => ProfileValue::Text(self.miner_name.clone()),
            F::IsAutoThisPcName => ProfileValue::Bool(self.is_auto_this_pc_name),
            F::IsShowInTaskbar => ProfileValue::Bool(self.is_show_in_taskbar),
            F::IsAutoBoot => ProfileValue::Bool(self.is_auto_boot),
            F::IsAutoStart => ProfileValue::Bool(self.is_auto_start),
            F::IsAutoRestartKernel => ProfileValue::Bool(self.is_auto_restart_kernel),
            F::IsNoShareRestartKernel => ProfileValue::Bool(self.is_no_share_restart_kernel),
            F::NoShareRestartKernelMinutes => {
                ProfileValue::Int(i64::from(self.no_share_restart_kernel_minutes))
            }
            F::IsPeriodicRestartKernel => ProfileValue::Bool(self.is_periodic_restart_kernel),
            F::PeriodicRestartKernelHours => {
                ProfileValue::Int(i64::from(self.periodic_restart_kernel_hours))
            }
            F::IsPeriodicRestartComputer => ProfileValue::Bool(self.is_periodic_restart_computer),
            F::PeriodicRestartComputerHours => {
                ProfileValue::Int(i64::from(self.periodic_restart_computer_hours))
            }
            F::IsShowCommandLine => ProfileValue::Bool(self.is_show_command_line),
            F::CoinId => ProfileValue::Id(self.coin_id),
        }
    }

    /// Writes `value` into `field`. The profile is left untouched on error.
    pub fn set(&mut self, field: MinerProfileField, value: ProfileValue) -> Result<(), ProfileError> {
        use MinerProfileField as F;
        match (field, value) {
            (F::MinerName, ProfileValue::Text(text)) => self.miner_name = text,
            (F::CoinId, ProfileValue::Id(id)) => self.coin_id = id,
            (field, ProfileValue::Int(raw)) if field.kind() == ValueKind::Int => {
                let value = u32::try_from(raw)
                    .map_err(|_| ProfileError::OutOfRange { field, value: raw })?;
                *self.int_slot(field) = value;
            }
            (field, ProfileValue::Bool(flag)) if field.kind() == ValueKind::Bool => {
                *self.bool_slot(field) = flag;
            }
            (field, other) => {
                return Err(ProfileError::TypeMismatch {
                    field,
                    expected: field.kind(),
                    found: other.kind(),
                })
            }
        }
        Ok(())
    }

    fn int_slot(&mut self, field: MinerProfileField) -> &mut u32 {
        use MinerProfileField as F;
        match field {
            F::NoShareRestartKernelMinutes => &mut self.no_share_restart_kernel_minutes,
            F::PeriodicRestartKernelHours => &mut self.periodic_restart_kernel_hours,
            _ => &mut self.periodic_restart_computer_hours,
        }
    }

    fn bool_slot(&mut self, field: MinerProfileField) -> &mut bool {
        use MinerProfileField as F;
        match field {
            F::IsAutoThisPcName => &mut self.is_auto_this_pc_name,
            F::IsShowInTaskbar => &mut self.is_show_in_taskbar,
            F::IsAutoBoot => &mut self.is_auto_boot,
            F::IsAutoStart => &mut self.is_auto_start,
            F::IsAutoRestartKernel => &mut self.is_auto_restart_kernel,
            F::IsNoShareRestartKernel => &mut self.is_no_share_restart_kernel,
            F::IsPeriodicRestartKernel => &mut self.is_periodic_restart_kernel,
            F::IsPeriodicRestartComputer => &mut self.is_periodic_restart_computer,
            _ => &mut self.is_show_command_line,
        }
    }
}

/// Where a rig's profile lives: a file on the rig, or the control center.
pub trait ProfileStore: Send + Sync {
    fn load(&self) -> Result<MinerProfile>;

    fn get(&self, field: MinerProfileField) -> Result<ProfileValue> {
        Ok(self.load()?.get(field))
    }

    fn set(&self, field: MinerProfileField, value: ProfileValue) -> Result<()>;
}
