use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Battery operating mode commanded to the ESS.
///
/// Serialized with the variant name as the stable wire tag; `NoChange`
/// means "leave the device in whatever mode it is in".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum BatteryMode {
    NoChange,
    /// Hold charge: neither charge from grid nor serve loads.
    Standby,
    /// Charge from any source, grid included.
    ChargeAny,
    /// Charge from solar surplus only.
    ChargeSolar,
    /// Discharge into home loads.
    Load,
}

/// Solar export mode commanded to the ESS.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum SolarMode {
    NoChange,
    NoExport,
    Any,
}

/// Why the controller picked the modes it picked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum ActionReason {
    AlwaysChargeBelowThreshold,
    MissingBattery,
    DeficitCharge,
    ArbitrageCharge,
    DischargeBeforeCapacity,
    DeficitSaveForPeak,
    ArbitrageSave,
    SufficientBattery,
    EmergencyMode,
    HasAlarms,
    WaitingToCharge,
    ChargeSurvivePeak,
    PreventSolarCurtailment,
}

impl BatteryMode {
    /// True when the mode actively pulls energy into the battery.
    pub fn is_charging(self) -> bool {
        matches!(self, BatteryMode::ChargeAny | BatteryMode::ChargeSolar)
    }
}
