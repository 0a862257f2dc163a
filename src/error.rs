use std::fmt;

use thiserror::Error;

use crate::types::{Account, HydroMonth, HydroYear, Sector};

/// A scenario or configuration that cannot be run. Raised before the first month.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScenarioError {
    #[error("scenario has no hydrological years to replay")]
    EmptyYearList,
    #[error("hydrological year {0} is not present in the hydrology record")]
    UnknownYear(HydroYear),
    #[error("delivery factor for {sector} must lie in [0, 1], got {value}")]
    InvalidDeliveryFactor { sector: Sector, value: f64 },
    #[error("initial stock for {account} must lie in [0, {capacity}], got {value}")]
    InitialStockOutOfRange { account: Account, value: f64, capacity: f64 },
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("split ratios must sum to 1, got {a} + {b}")]
    InvalidSplit { a: f64, b: f64 },
    #[error("{years} scenario years cannot be split into blocks of {block}")]
    UnevenBlocks { years: usize, block: usize },
}

/// The quantity an invariant check failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Stock(Account),
    MassBalance(Account),
    Fill(Account),
    Spill,
    SsrPaid,
    Backlog,
    FreeReserve,
    SupportTotal,
    Support(Sector),
    FloorDraw(Sector),
    Service(Sector),
    Deficit(Sector),
    /// Stock of the undivided comparison pool.
    PoolStock,
    PoolService,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Stock(a) => write!(f, "{a} stock"),
            Quantity::MassBalance(a) => write!(f, "{a} mass balance residual"),
            Quantity::Fill(a) => write!(f, "{a} fill"),
            Quantity::Spill => f.write_str("spill"),
            Quantity::SsrPaid => f.write_str("SSR payment"),
            Quantity::Backlog => f.write_str("SSR backlog"),
            Quantity::FreeReserve => f.write_str("free reserve"),
            Quantity::SupportTotal => f.write_str("support A + B"),
            Quantity::Support(s) => write!(f, "{s} support"),
            Quantity::FloorDraw(s) => write!(f, "{s} floor draw"),
            Quantity::Service(s) => write!(f, "{s} service"),
            Quantity::Deficit(s) => write!(f, "{s} deficit"),
            Quantity::PoolStock => f.write_str("pool stock"),
            Quantity::PoolService => f.write_str("pool service"),
        }
    }
}

/// An out-of-range quantity produced by a single allocation step, before the
/// runner attaches the month it happened in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breach {
    pub quantity: Quantity,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Breach {
    pub fn at(self, year: HydroYear, month: HydroMonth) -> InvariantViolation {
        InvariantViolation {
            year,
            month,
            quantity: self.quantity,
            value: self.value,
            lower: self.lower,
            upper: self.upper,
        }
    }
}

/// A computed quantity left its declared range. This is a defect in the
/// recurrence, never a recoverable condition: the run is aborted.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invariant violated in {year} ({month}): {quantity} = {value} outside [{lower}, {upper}]")]
pub struct InvariantViolation {
    pub year: HydroYear,
    pub month: HydroMonth,
    pub quantity: Quantity,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_message_names_month_and_quantity() {
        let v = Breach {
            quantity: Quantity::Stock(Account::SectorA),
            value: -0.5,
            lower: 0.0,
            upper: 260.0,
        }
        .at(HydroYear(1995), HydroMonth::APRIL);
        let msg = v.to_string();
        assert!(msg.contains("1995/1996"), "{msg}");
        assert!(msg.contains("abr"), "{msg}");
        assert!(msg.contains("sector A stock"), "{msg}");
    }

    #[test]
    fn scenario_error_converts_into_sim_error() {
        let e: SimError = ScenarioError::EmptyYearList.into();
        assert!(matches!(e, SimError::Scenario(ScenarioError::EmptyYearList)));
    }
}
