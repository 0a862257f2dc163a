//! Single undivided pool, used as the reference case the partitioned
//! reservoir is compared against. Same hydrology, bypass, demand and SSR
//! rules, but no accounts: whatever is stored serves any demand.

use serde::Serialize;
use tracing::{info, warn};

use crate::allocation::TOLERANCE;
use crate::config::{ReservoirConfig, ScenarioConfig};
use crate::demand::{DemandModel, SectorDemand};
use crate::error::{Breach, Quantity, SimError};
use crate::hydrology::HydrologyProvider;
use crate::kpi::satisfaction_pct;
use crate::senior_rights::SeniorRightsRule;
use crate::types::{HydroMonth, HydroYear};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BaselineMonth {
    pub year_index: usize,
    pub year: HydroYear,
    pub month: HydroMonth,
    pub start: f64,
    pub inflow: f64,
    pub bypass: f64,
    pub available_flow: f64,
    pub fill: f64,
    pub spill: f64,
    pub ssr_due: f64,
    pub ssr_paid: f64,
    pub backlog: f64,
    pub demand: SectorDemand,
    pub served: f64,
    pub deficit: f64,
    pub turbined: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BaselineKpis {
    pub months: usize,
    pub turbined: f64,
    pub spill: f64,
    pub deficit: f64,
    pub demand: f64,
    pub served: f64,
    pub satisfaction: f64,
    pub ssr_paid: f64,
    pub available_flow: f64,
    pub ending_storage: f64,
    pub ending_backlog: f64,
}

#[derive(Debug, Clone)]
pub struct BaselineModel {
    capacity: f64,
    ssr_quota: f64,
    rights: SeniorRightsRule,
    demand: DemandModel,
}

/// Volumes for one month of the pool, before the calendar is attached.
struct PoolStep {
    fill: f64,
    spill: f64,
    ssr_due: f64,
    ssr_paid: f64,
    backlog: f64,
    served: f64,
    end: f64,
}

impl BaselineModel {
    /// Pool capacity is the sum of the three account capacities.
    pub fn from_config(reservoir: &ReservoirConfig) -> Self {
        BaselineModel {
            capacity: reservoir.capacities.total(),
            ssr_quota: reservoir.ssr_monthly_quota(),
            rights: SeniorRightsRule::new(reservoir.senior_rights.clone()),
            demand: DemandModel::new(reservoir.demand.clone()),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn step(&self, stock: f64, backlog: f64, residual: f64, demand: f64) -> PoolStep {
        let fill = residual.min(self.capacity - stock);
        let available = stock + fill;
        let ssr_due = self.ssr_quota + backlog;
        let ssr_paid = ssr_due.min(available);
        let served = demand.min(available - ssr_paid);
        PoolStep {
            fill,
            spill: residual - fill,
            ssr_due,
            ssr_paid,
            backlog: ssr_due - ssr_paid,
            served,
            end: available - ssr_paid - served,
        }
    }

    fn verify(&self, m: &BaselineMonth) -> Result<(), Breach> {
        let checks = [
            (Quantity::PoolStock, m.end, 0.0, self.capacity),
            (Quantity::Spill, m.spill, 0.0, f64::INFINITY),
            (Quantity::SsrPaid, m.ssr_paid, 0.0, m.ssr_due),
            (Quantity::Backlog, m.backlog, 0.0, m.ssr_due),
            (Quantity::PoolService, m.served, 0.0, m.demand.total()),
        ];
        for (quantity, value, lower, upper) in checks {
            if !value.is_finite() || value < lower - TOLERANCE || value > upper + TOLERANCE {
                return Err(Breach { quantity, value, lower, upper });
            }
        }
        Ok(())
    }

    /// Replay the scenario's years through the pool. The initial stock is the
    /// sum of the scenario's per-account initial stocks.
    pub fn run<H>(
        &self,
        reservoir: &ReservoirConfig,
        scenario: &ScenarioConfig,
        hydrology: &H,
    ) -> Result<Vec<BaselineMonth>, SimError>
    where
        H: HydrologyProvider + ?Sized,
    {
        reservoir.validate()?;
        scenario.validate(reservoir, hydrology)?;

        let mut out = Vec::with_capacity(scenario.months());
        let mut stock = scenario.initial.total();
        let mut backlog = 0.0;

        for (year_index, &year) in scenario.years.iter().enumerate() {
            if year_index > 0 && !scenario.carry_backlog {
                backlog = 0.0;
            }
            for month in HydroMonth::all() {
                let flows = hydrology.flows(year, month).unwrap_or_else(|| {
                    warn!(%year, %month, "no hydrology record, using zero flow");
                    Default::default()
                });
                let inflow = month.volume(flows.inflow);
                let bypass = self.rights.bypass_volume(month, &flows);
                let demand = self.demand.effective(month, scenario.delivery);
                let s = self.step(stock, backlog, (inflow - bypass).max(0.0), demand.total());

                let record = BaselineMonth {
                    year_index,
                    year,
                    month,
                    start: stock,
                    inflow,
                    bypass,
                    available_flow: inflow - bypass,
                    fill: s.fill,
                    spill: s.spill,
                    ssr_due: s.ssr_due,
                    ssr_paid: s.ssr_paid,
                    backlog: s.backlog,
                    demand,
                    served: s.served,
                    deficit: demand.total() - s.served,
                    turbined: s.served + s.spill,
                    end: s.end,
                };
                self.verify(&record).map_err(|b| b.at(year, month))?;
                stock = s.end;
                backlog = s.backlog;
                out.push(record);
            }
        }

        info!(months = out.len(), capacity = self.capacity, "baseline run complete");
        Ok(out)
    }
}

pub fn aggregate(months: &[BaselineMonth]) -> BaselineKpis {
    let mut k = BaselineKpis { months: months.len(), ..BaselineKpis::default() };
    for m in months {
        k.turbined += m.turbined;
        k.spill += m.spill;
        k.deficit += m.deficit;
        k.demand += m.demand.total();
        k.served += m.served;
        k.ssr_paid += m.ssr_paid;
        k.available_flow += m.available_flow;
    }
    k.satisfaction = satisfaction_pct(k.served, k.demand);
    if let Some(last) = months.last() {
        k.ending_storage = last.end;
        k.ending_backlog = last.backlog;
    }
    k
}
