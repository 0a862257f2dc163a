use serde::{Deserialize, Serialize};

use crate::config::ReservoirConfig;
use crate::demand::SectorDemand;
use crate::error::{Breach, Quantity, ScenarioError};
use crate::types::{Account, Sector, Stocks};

/// Absolute tolerance (Hm³) for every range and balance check.
pub const TOLERANCE: f64 = 1e-9;

/// Proportions in which post-reserve inflow and reserve support are shared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatio {
    pub a: f64,
    pub b: f64,
}

impl SplitRatio {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let finite = self.a.is_finite() && self.b.is_finite();
        if !finite || self.a < 0.0 || self.b < 0.0 || (self.a + self.b - 1.0).abs() > TOLERANCE {
            return Err(ScenarioError::InvalidSplit { a: self.a, b: self.b });
        }
        Ok(())
    }
}

/// Whether the protected reserve floor may ever be handed to a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FloorPolicy {
    /// The floor is never touched by irrigation.
    #[default]
    Fixed,
    /// A sector with no water of its own may draw on the floor for the
    /// unmet part of its guaranteed half.
    TapWhenSectorEmpty,
}

/// Stocks and SSR backlog at the start of a month.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonthState {
    pub stocks: Stocks,
    pub backlog: f64,
}

/// One month of exogenous input, already converted to volumes (Hm³).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StepInput {
    pub inflow: f64,
    pub bypass: f64,
    /// Demand after delivery factors.
    pub demand: SectorDemand,
}

/// Everything the allocation step decided for one month, in Hm³.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Allocation {
    pub start: Stocks,
    pub end: Stocks,
    pub inflow: f64,
    pub bypass: f64,
    /// Inflow net of the bypass requirement, before clamping at zero.
    pub available_flow: f64,
    pub residual: f64,
    pub fill: Stocks,
    pub spill: f64,
    pub ssr_due: f64,
    pub ssr_paid: f64,
    pub backlog: f64,
    pub free_reserve: f64,
    pub demand: SectorDemand,
    pub own_a: f64,
    pub own_b: f64,
    pub gap_a: f64,
    pub gap_b: f64,
    pub support_total: f64,
    pub support_a: f64,
    pub support_b: f64,
    pub floor_draw_a: f64,
    pub floor_draw_b: f64,
    pub deficit_a: f64,
    pub deficit_b: f64,
    /// Part of the guaranteed half still unmet after support and floor draws.
    pub guarantee_shortfall_a: f64,
    pub guarantee_shortfall_b: f64,
    pub turbined: f64,
}

impl Allocation {
    pub fn served(&self, sector: Sector) -> f64 {
        match sector {
            Sector::A => self.own_a + self.support_a + self.floor_draw_a,
            Sector::B => self.own_b + self.support_b + self.floor_draw_b,
        }
    }

    pub fn deficit(&self, sector: Sector) -> f64 {
        match sector {
            Sector::A => self.deficit_a,
            Sector::B => self.deficit_b,
        }
    }

    pub fn deficit_total(&self) -> f64 {
        self.deficit_a + self.deficit_b
    }

    /// Volume leaving each account this month.
    pub fn outflow(&self, account: Account) -> f64 {
        match account {
            Account::Reserve => {
                self.ssr_paid + self.support_a + self.support_b + self.floor_draw_a + self.floor_draw_b
            }
            Account::SectorA => self.own_a,
            Account::SectorB => self.own_b,
        }
    }

    /// State the next month starts from. The SSR backlog is dropped when
    /// `keep_backlog` is false.
    pub fn carry(&self, keep_backlog: bool) -> MonthState {
        MonthState {
            stocks: self.end,
            backlog: if keep_backlog { self.backlog } else { 0.0 },
        }
    }
}

/// Share `total` between two gaps: each sector first gets up to its
/// proportional slice, then whatever the other sector's slice left unused.
/// A single pass; anything still unassigned stays in the reserve.
pub fn split_support(total: f64, gap_a: f64, gap_b: f64, split: SplitRatio) -> (f64, f64) {
    let prop_a = split.a * total;
    let prop_b = split.b * total;
    let base_a = gap_a.min(prop_a);
    let base_b = gap_b.min(prop_b);
    let a = base_a + (prop_b - base_b).min(gap_a - base_a);
    let b = base_b + (prop_a - base_a).min(gap_b - base_b);
    (a, b)
}

/// The monthly state-transition function.
#[derive(Debug, Clone)]
pub struct AllocationEngine {
    capacities: Stocks,
    split: SplitRatio,
    guarantee_fraction: f64,
    reserve_floor: f64,
    ssr_quota: f64,
    policy: FloorPolicy,
}

impl AllocationEngine {
    pub fn from_config(config: &ReservoirConfig) -> Self {
        AllocationEngine {
            capacities: config.capacities,
            split: config.split,
            guarantee_fraction: config.guarantee_fraction,
            reserve_floor: config.reserve_floor,
            ssr_quota: config.ssr_monthly_quota(),
            policy: config.floor_policy,
        }
    }

    pub fn capacities(&self) -> Stocks {
        self.capacities
    }

    pub fn step(&self, state: &MonthState, input: &StepInput) -> Allocation {
        let caps = self.capacities;
        let start = state.stocks;
        let demand = input.demand;

        // ── Fill: reserve first, then the sectors by split ──────────────────
        let available_flow = input.inflow - input.bypass;
        let residual = available_flow.max(0.0);
        let fill_reserve = residual.min(caps.reserve - start.reserve);
        let post = residual - fill_reserve;
        let fill_a = (self.split.a * post).min(caps.sector_a - start.sector_a);
        let fill_b = (self.split.b * post).min(caps.sector_b - start.sector_b);
        let spill = post - fill_a - fill_b;

        // ── SSR has hard priority on the reserve ───────────────────────────
        let reserve_avail = start.reserve + fill_reserve;
        let ssr_due = self.ssr_quota + state.backlog;
        let ssr_paid = ssr_due.min(reserve_avail);
        let backlog = ssr_due - ssr_paid;
        let free_reserve = (reserve_avail - ssr_paid - self.reserve_floor).max(0.0);

        // ── Sectors serve themselves, reserve tops up to the guarantee ─────
        let avail_a = start.sector_a + fill_a;
        let avail_b = start.sector_b + fill_b;
        let own_a = avail_a.min(demand.a);
        let own_b = avail_b.min(demand.b);
        let gap_a = (self.guarantee_fraction * demand.a - own_a).max(0.0);
        let gap_b = (self.guarantee_fraction * demand.b - own_b).max(0.0);
        let support_total = free_reserve.min(gap_a + gap_b);
        let (support_a, support_b) = split_support(support_total, gap_a, gap_b, self.split);

        let (floor_draw_a, floor_draw_b) = match self.policy {
            FloorPolicy::Fixed => (0.0, 0.0),
            FloorPolicy::TapWhenSectorEmpty => {
                let pool = self
                    .reserve_floor
                    .min(reserve_avail - ssr_paid - support_a - support_b)
                    .max(0.0);
                let rest_a = if avail_a <= 0.0 { gap_a - support_a } else { 0.0 };
                let rest_b = if avail_b <= 0.0 { gap_b - support_b } else { 0.0 };
                split_support(pool.min(rest_a + rest_b), rest_a, rest_b, self.split)
            }
        };

        let end = Stocks {
            reserve: reserve_avail - ssr_paid - support_a - support_b - floor_draw_a - floor_draw_b,
            sector_a: avail_a - own_a,
            sector_b: avail_b - own_b,
        };

        let served_a = own_a + support_a + floor_draw_a;
        let served_b = own_b + support_b + floor_draw_b;

        Allocation {
            start,
            end,
            inflow: input.inflow,
            bypass: input.bypass,
            available_flow,
            residual,
            fill: Stocks::new(fill_reserve, fill_a, fill_b),
            spill,
            ssr_due,
            ssr_paid,
            backlog,
            free_reserve,
            demand,
            own_a,
            own_b,
            gap_a,
            gap_b,
            support_total,
            support_a,
            support_b,
            floor_draw_a,
            floor_draw_b,
            deficit_a: demand.a - served_a,
            deficit_b: demand.b - served_b,
            guarantee_shortfall_a: gap_a - support_a - floor_draw_a,
            guarantee_shortfall_b: gap_b - support_b - floor_draw_b,
            turbined: served_a + served_b + spill,
        }
    }

    /// Range and balance checks on one step's output. The first quantity out
    /// of range is returned.
    pub fn verify(&self, a: &Allocation) -> Result<(), Breach> {
        let caps = self.capacities;
        let mut checks = vec![
            (Quantity::Stock(Account::Reserve), a.end.reserve, 0.0, caps.reserve),
            (Quantity::Stock(Account::SectorA), a.end.sector_a, 0.0, caps.sector_a),
            (Quantity::Stock(Account::SectorB), a.end.sector_b, 0.0, caps.sector_b),
            (Quantity::Fill(Account::Reserve), a.fill.reserve, 0.0, a.residual),
            (Quantity::Fill(Account::SectorA), a.fill.sector_a, 0.0, caps.sector_a),
            (Quantity::Fill(Account::SectorB), a.fill.sector_b, 0.0, caps.sector_b),
            (Quantity::Spill, a.spill, 0.0, a.residual),
            (Quantity::SsrPaid, a.ssr_paid, 0.0, a.ssr_due),
            (Quantity::Backlog, a.backlog, 0.0, a.ssr_due),
            (Quantity::FreeReserve, a.free_reserve, 0.0, caps.reserve),
            (Quantity::SupportTotal, a.support_a + a.support_b, 0.0, a.free_reserve),
            (Quantity::Support(Sector::A), a.support_a, 0.0, a.gap_a),
            (Quantity::Support(Sector::B), a.support_b, 0.0, a.gap_b),
            (Quantity::FloorDraw(Sector::A), a.floor_draw_a, 0.0, self.reserve_floor),
            (Quantity::FloorDraw(Sector::B), a.floor_draw_b, 0.0, self.reserve_floor),
            (Quantity::Service(Sector::A), a.served(Sector::A), 0.0, a.demand.a),
            (Quantity::Service(Sector::B), a.served(Sector::B), 0.0, a.demand.b),
            (Quantity::Deficit(Sector::A), a.deficit_a, 0.0, a.demand.a),
            (Quantity::Deficit(Sector::B), a.deficit_b, 0.0, a.demand.b),
        ];
        for account in crate::types::ACCOUNTS {
            let balance = a.start.get(account) + a.fill.get(account) - a.outflow(account) - a.end.get(account);
            checks.push((Quantity::MassBalance(account), balance, 0.0, 0.0));
        }
        let routed = a.fill.total() + a.spill - a.residual;
        checks.push((Quantity::MassBalance(Account::Reserve), routed, 0.0, 0.0));

        for (quantity, value, lower, upper) in checks {
            if !value.is_finite() || value < lower - TOLERANCE || value > upper + TOLERANCE {
                return Err(Breach { quantity, value, lower, upper });
            }
        }
        Ok(())
    }
}
