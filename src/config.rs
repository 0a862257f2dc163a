use serde::{Deserialize, Serialize};

use crate::allocation::{FloorPolicy, SplitRatio};
use crate::demand::{DeliveryFactors, DemandSpec};
use crate::error::ScenarioError;
use crate::hydrology::HydrologyProvider;
use crate::senior_rights::SeniorRightsTable;
use crate::types::{ACCOUNTS, HydroYear, Stocks};

/// Static description of the reservoir: constant across every scenario run on it.
/// Any field left out of a JSON config falls back to the canonical value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservoirConfig {
    /// Capacity of each account, Hm³.
    pub capacities: Stocks,
    /// Share of post-reserve inflow and of reserve support going to each sector.
    pub split: SplitRatio,
    /// Fraction of each sector's demand the reserve guarantees (0.5).
    pub guarantee_fraction: f64,
    /// Reserve volume kept back from irrigation support, Hm³.
    pub reserve_floor: f64,
    /// Annual human-consumption (SSR) volume, Hm³. Paid in twelve equal quotas.
    pub ssr_annual_volume: f64,
    pub floor_policy: FloorPolicy,
    pub demand: DemandSpec,
    pub senior_rights: SeniorRightsTable,
}

impl ReservoirConfig {
    pub fn canonical() -> Self {
        ReservoirConfig {
            // ── Partitions of the 540 Hm³ reservoir ──────────────────────────
            capacities: Stocks::new(175.0, 260.0, 105.0),
            split: SplitRatio { a: 0.71, b: 0.29 },
            guarantee_fraction: 0.5,
            reserve_floor: 2.275,
            ssr_annual_volume: 3.9,
            floor_policy: FloorPolicy::Fixed,
            demand: DemandSpec::canonical(),
            senior_rights: SeniorRightsTable::canonical(),
        }
    }

    pub fn ssr_monthly_quota(&self) -> f64 {
        self.ssr_annual_volume / 12.0
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        let scalars = [
            ("reserve capacity", self.capacities.reserve),
            ("sector A capacity", self.capacities.sector_a),
            ("sector B capacity", self.capacities.sector_b),
            ("guarantee fraction", self.guarantee_fraction),
            ("reserve floor", self.reserve_floor),
            ("SSR annual volume", self.ssr_annual_volume),
        ];
        for (name, value) in scalars {
            if !value.is_finite() || value < 0.0 {
                return Err(ScenarioError::InvalidParameter { name, value });
            }
        }
        if self.guarantee_fraction > 1.0 {
            return Err(ScenarioError::InvalidParameter {
                name: "guarantee fraction",
                value: self.guarantee_fraction,
            });
        }
        self.split.validate()?;
        self.demand.validate()?;
        self.senior_rights.validate()
    }

    /// Parse a (possibly partial) JSON reservoir description.
    pub fn from_json(reader: impl std::io::Read) -> serde_json::Result<Self> {
        serde_json::from_reader(reader)
    }
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

/// One run: which years to replay, in what order, from which starting state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Hydrological years in replay order. Repeats and reordering are allowed.
    pub years: Vec<HydroYear>,
    pub delivery: DeliveryFactors,
    /// Stocks at the start of the first month, Hm³.
    pub initial: Stocks,
    /// Carry the SSR backlog across year boundaries (April → May).
    pub carry_backlog: bool,
}

impl ScenarioConfig {
    /// The historical record replayed in calendar order: 1989/1990 … 2018/2019.
    pub fn canonical() -> Self {
        ScenarioConfig {
            years: (1989..=2018).map(HydroYear).collect(),
            delivery: DeliveryFactors::FULL,
            initial: Stocks::default(),
            carry_backlog: true,
        }
    }

    pub fn with_years(&self, years: Vec<HydroYear>) -> Self {
        ScenarioConfig { years, ..self.clone() }
    }

    pub fn months(&self) -> usize {
        self.years.len() * 12
    }

    /// Check the scenario against the reservoir and the hydrology record
    /// before anything runs.
    pub fn validate<H>(&self, reservoir: &ReservoirConfig, hydrology: &H) -> Result<(), ScenarioError>
    where
        H: HydrologyProvider + ?Sized,
    {
        if self.years.is_empty() {
            return Err(ScenarioError::EmptyYearList);
        }
        if let Some(&year) = self.years.iter().find(|&&y| !hydrology.has_year(y)) {
            return Err(ScenarioError::UnknownYear(year));
        }
        self.delivery.validate()?;
        for account in ACCOUNTS {
            let value = self.initial.get(account);
            let capacity = reservoir.capacities.get(account);
            if !(0.0..=capacity).contains(&value) {
                return Err(ScenarioError::InitialStockOutOfRange { account, value, capacity });
            }
        }
        Ok(())
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::canonical()
    }
}
