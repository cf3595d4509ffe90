//! Safety layer: operational limits, geofencing, and admission control.

pub mod policy;

pub use policy::{
    Admission, ApprovalMode, GeofenceZone, OperationLimits, RiskLevel, SafetyPolicy, ZoneType,
};
