use serde::{Deserialize, Serialize};

use crate::error::ScenarioError;
use crate::types::{HydroMonth, Sector};

/// Monthly irrigation demand per water-right share, indexed by civil month
/// (January first), plus the number of shares held in each sector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandSpec {
    /// m³ per share per month, sector A.
    pub per_share_a: [f64; 12],
    /// m³ per share per month, sector B.
    pub per_share_b: [f64; 12],
    pub shares_a: u32,
    pub shares_b: u32,
}

impl DemandSpec {
    pub fn canonical() -> Self {
        DemandSpec {
            per_share_a: [9503.0, 6516.0, 3452.0, 776.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2444.0, 6516.0, 9580.0],
            per_share_b: [3361.0, 2305.0, 1221.0, 274.0, 0.0, 0.0, 0.0, 0.0, 0.0, 864.0, 2305.0, 3388.0],
            shares_a: 21_221,
            shares_b: 7_100,
        }
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        for &v in self.per_share_a.iter().chain(self.per_share_b.iter()) {
            if !v.is_finite() || v < 0.0 {
                return Err(ScenarioError::InvalidParameter { name: "per-share demand", value: v });
            }
        }
        Ok(())
    }
}

/// Delivery factors (FE) scaling each sector's nominal demand.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryFactors {
    pub a: f64,
    pub b: f64,
}

impl DeliveryFactors {
    pub const FULL: DeliveryFactors = DeliveryFactors { a: 1.0, b: 1.0 };

    pub fn uniform(fe: f64) -> Self {
        DeliveryFactors { a: fe, b: fe }
    }

    pub fn get(&self, sector: Sector) -> f64 {
        match sector {
            Sector::A => self.a,
            Sector::B => self.b,
        }
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        for sector in [Sector::A, Sector::B] {
            let value = self.get(sector);
            if !(0.0..=1.0).contains(&value) {
                return Err(ScenarioError::InvalidDeliveryFactor { sector, value });
            }
        }
        Ok(())
    }
}

/// One month's demand on both sectors, in Hm³.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SectorDemand {
    pub a: f64,
    pub b: f64,
}

impl SectorDemand {
    pub fn total(&self) -> f64 {
        self.a + self.b
    }
}

/// Maps a hydrological month to the volume each sector asks for.
#[derive(Debug, Clone)]
pub struct DemandModel {
    spec: DemandSpec,
}

impl DemandModel {
    pub fn new(spec: DemandSpec) -> Self {
        DemandModel { spec }
    }

    /// Nominal demand (FE = 1) in Hm³.
    pub fn base(&self, month: HydroMonth) -> SectorDemand {
        let civil = month.civil() as usize - 1;
        SectorDemand {
            a: self.spec.per_share_a[civil] * f64::from(self.spec.shares_a) / 1_000_000.0,
            b: self.spec.per_share_b[civil] * f64::from(self.spec.shares_b) / 1_000_000.0,
        }
    }

    /// Demand after applying the delivery factors, in Hm³.
    pub fn effective(&self, month: HydroMonth, fe: DeliveryFactors) -> SectorDemand {
        // Multiply before converting units, matching the nominal-volume rounding.
        let civil = month.civil() as usize - 1;
        SectorDemand {
            a: self.spec.per_share_a[civil] * f64::from(self.spec.shares_a) * fe.a / 1_000_000.0,
            b: self.spec.per_share_b[civil] * f64::from(self.spec.shares_b) * fe.b / 1_000_000.0,
        }
    }
}
