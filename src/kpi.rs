use serde::Serialize;

use crate::simulation::MonthlyResult;
use crate::types::{HydroMonth, HydroYear, Sector, Stocks};

/// Served share of demand in percent. A month (or run) with no demand is
/// fully satisfied.
pub fn satisfaction_pct(served: f64, demand: f64) -> f64 {
    if demand <= 0.0 { 100.0 } else { served / demand * 100.0 }
}

/// Whole-run totals and ratios. Volumes in Hm³.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunKpis {
    pub months: usize,
    pub turbined: f64,
    pub spill: f64,
    pub deficit_a: f64,
    pub deficit_b: f64,
    pub deficit_total: f64,
    pub support_a: f64,
    pub support_b: f64,
    pub floor_draw: f64,
    pub ssr_paid: f64,
    /// Σ (inflow − bypass). Can be negative.
    pub available_flow: f64,
    pub mean_available_flow: f64,
    /// Effective (post delivery factor) demand.
    pub demand_a: f64,
    pub demand_b: f64,
    pub served_a: f64,
    pub served_b: f64,
    pub satisfaction_a: f64,
    pub satisfaction_b: f64,
    pub satisfaction: f64,
    /// Demand withheld by delivery factors: Σ (1 − FE)·base.
    pub fe_shortfall: f64,
    pub deficit_with_fe: f64,
    pub ending_stocks: Stocks,
    pub ending_backlog: f64,
}

impl RunKpis {
    pub fn demand_total(&self) -> f64 {
        self.demand_a + self.demand_b
    }

    pub fn served_total(&self) -> f64 {
        self.served_a + self.served_b
    }
}

pub fn aggregate(results: &[MonthlyResult]) -> RunKpis {
    let mut k = RunKpis { months: results.len(), ..RunKpis::default() };
    for r in results {
        let a = &r.allocation;
        k.turbined += a.turbined;
        k.spill += a.spill;
        k.deficit_a += a.deficit_a;
        k.deficit_b += a.deficit_b;
        k.support_a += a.support_a;
        k.support_b += a.support_b;
        k.floor_draw += a.floor_draw_a + a.floor_draw_b;
        k.ssr_paid += a.ssr_paid;
        k.available_flow += a.available_flow;
        k.demand_a += a.demand.a;
        k.demand_b += a.demand.b;
        k.served_a += a.served(Sector::A);
        k.served_b += a.served(Sector::B);
        k.fe_shortfall += r.fe_shortfall();
    }
    k.deficit_total = k.deficit_a + k.deficit_b;
    k.deficit_with_fe = k.deficit_total + k.fe_shortfall;
    if !results.is_empty() {
        k.mean_available_flow = k.available_flow / results.len() as f64;
    }
    k.satisfaction_a = satisfaction_pct(k.served_a, k.demand_a);
    k.satisfaction_b = satisfaction_pct(k.served_b, k.demand_b);
    k.satisfaction = satisfaction_pct(k.served_total(), k.demand_total());
    if let Some(last) = results.last() {
        k.ending_stocks = last.allocation.end;
        k.ending_backlog = last.allocation.backlog;
    }
    k
}

/// One scenario year reduced to its headline numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnualSummary {
    pub year_index: usize,
    pub year: HydroYear,
    pub deficit_a: f64,
    pub deficit_b: f64,
    pub deficit_total: f64,
    pub turbined: f64,
    pub demand: f64,
    /// Mean of the twelve monthly combined satisfactions.
    pub mean_satisfaction: f64,
    /// Month with the largest combined deficit; `None` for a year without deficit.
    pub worst_month: Option<HydroMonth>,
}

impl AnnualSummary {
    fn zero(year_index: usize, year: HydroYear) -> Self {
        Self {
            year_index,
            year,
            deficit_a: 0.0,
            deficit_b: 0.0,
            deficit_total: 0.0,
            turbined: 0.0,
            demand: 0.0,
            mean_satisfaction: 0.0,
            worst_month: None,
        }
    }
}

/// Per scenario year, in scenario order. A year replayed twice appears twice.
pub fn annual_summaries(results: &[MonthlyResult]) -> Vec<AnnualSummary> {
    let mut out: Vec<AnnualSummary> = Vec::new();
    let mut months_in_year = 0usize;
    let mut worst = 0.0f64;

    for r in results {
        let a = &r.allocation;
        let starts_new = out.last().is_none_or(|s| s.year_index != r.year_index);
        if starts_new {
            if let Some(prev) = out.last_mut() {
                prev.mean_satisfaction /= months_in_year.max(1) as f64;
            }
            out.push(AnnualSummary::zero(r.year_index, r.year));
            months_in_year = 0;
            worst = 0.0;
        }
        let Some(s) = out.last_mut() else { continue };
        s.deficit_a += a.deficit_a;
        s.deficit_b += a.deficit_b;
        s.deficit_total += a.deficit_total();
        s.turbined += a.turbined;
        s.demand += a.demand.total();
        s.mean_satisfaction += satisfaction_pct(a.served(Sector::A) + a.served(Sector::B), a.demand.total());
        if a.deficit_total() > worst {
            worst = a.deficit_total();
            s.worst_month = Some(r.month);
        }
        months_in_year += 1;
    }
    if let Some(last) = out.last_mut() {
        last.mean_satisfaction /= months_in_year.max(1) as f64;
    }
    out
}

/// One hydrological month averaged across every year of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthProfile {
    pub month: HydroMonth,
    pub years: usize,
    pub mean_spill: f64,
    pub mean_available_flow: f64,
    /// Σ served / Σ demand over the years, in percent.
    pub satisfaction: f64,
}

pub fn monthly_profile(results: &[MonthlyResult]) -> Vec<MonthProfile> {
    let mut counts = [0usize; 12];
    let mut spill = [0.0f64; 12];
    let mut flow = [0.0f64; 12];
    let mut served = [0.0f64; 12];
    let mut demand = [0.0f64; 12];
    for r in results {
        let i = r.month.index();
        let a = &r.allocation;
        counts[i] += 1;
        spill[i] += a.spill;
        flow[i] += a.available_flow;
        served[i] += a.served(Sector::A) + a.served(Sector::B);
        demand[i] += a.demand.total();
    }

    HydroMonth::all()
        .map(|month| {
            let i = month.index();
            let n = counts[i].max(1) as f64;
            MonthProfile {
                month,
                years: counts[i],
                mean_spill: spill[i] / n,
                mean_available_flow: flow[i] / n,
                satisfaction: satisfaction_pct(served[i], demand[i]),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::config::{ReservoirConfig, ScenarioConfig};
    use crate::demand::DeliveryFactors;
    use crate::hydrology::seasonal_table;
    use crate::simulation::simulate;

    fn run(years: &[u16], fe: f64, scale: f64) -> Vec<MonthlyResult> {
        let h = seasonal_table(1989, 4, scale);
        let mut s = ScenarioConfig::canonical().with_years(years.iter().copied().map(HydroYear).collect());
        s.delivery = DeliveryFactors::uniform(fe);
        simulate(&ReservoirConfig::canonical(), s, &h).unwrap()
    }

    #[test]
    fn satisfaction_is_full_without_demand() {
        assert_eq!(satisfaction_pct(0.0, 0.0), 100.0);
        assert_eq!(satisfaction_pct(3.0, 4.0), 75.0);
    }

    #[test]
    fn empty_run_has_zero_totals_and_full_satisfaction() {
        let k = aggregate(&[]);
        assert_eq!(k.months, 0);
        assert_eq!(k.turbined, 0.0);
        assert_eq!(k.satisfaction, 100.0);
        assert_eq!(k.mean_available_flow, 0.0);
    }

    #[test]
    fn totals_add_up() {
        let r = run(&[1989, 1990, 1991], 1.0, 1.0);
        let k = aggregate(&r);
        assert_eq!(k.months, 36);
        assert_abs_diff_eq!(k.deficit_total, k.demand_total() - k.served_total(), epsilon = 1e-6);
        assert_abs_diff_eq!(
            k.turbined,
            k.served_total() + k.spill,
            epsilon = 1e-6
        );
        assert_eq!(k.ending_stocks, r[35].allocation.end);
        assert!(k.satisfaction >= 0.0 && k.satisfaction <= 100.0 + 1e-9);
        // FE = 1 withholds nothing.
        assert_abs_diff_eq!(k.fe_shortfall, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(k.deficit_with_fe, k.deficit_total, epsilon = 1e-9);
    }

    #[test]
    fn fe_shortfall_counts_withheld_demand() {
        let full = aggregate(&run(&[1989], 1.0, 1.0));
        let reduced = aggregate(&run(&[1989], 0.7, 1.0));
        assert_abs_diff_eq!(reduced.fe_shortfall, 0.3 * full.demand_total(), epsilon = 1e-6);
        assert_abs_diff_eq!(reduced.demand_total(), 0.7 * full.demand_total(), epsilon = 1e-6);
    }

    #[test]
    fn annual_summaries_follow_scenario_order() {
        let r = run(&[1991, 1989, 1991], 1.0, 1.0);
        let years = annual_summaries(&r);
        assert_eq!(years.len(), 3);
        assert_eq!(years[0].year, HydroYear(1991));
        assert_eq!(years[1].year, HydroYear(1989));
        assert_eq!(years[2].year_index, 2);
        let total: f64 = years.iter().map(|y| y.deficit_total).sum();
        assert_abs_diff_eq!(total, aggregate(&r).deficit_total, epsilon = 1e-6);
        for y in &years {
            assert!(y.mean_satisfaction <= 100.0 + 1e-9);
            if y.deficit_total == 0.0 {
                assert!(y.worst_month.is_none());
            } else {
                assert!(y.worst_month.is_some());
            }
        }
    }

    #[test]
    fn drought_year_reports_worst_month() {
        // Starting empty with almost no inflow leaves irrigation months short.
        let r = run(&[1989], 1.0, 0.01);
        let y = &annual_summaries(&r)[0];
        assert!(y.deficit_total > 0.0);
        let worst = y.worst_month.unwrap();
        let max = r.iter().map(|m| m.allocation.deficit_total()).fold(0.0, f64::max);
        assert_eq!(r[worst.index()].allocation.deficit_total(), max);
    }

    #[test]
    fn monthly_profile_has_twelve_rows() {
        let r = run(&[1989, 1990], 1.0, 1.0);
        let profile = monthly_profile(&r);
        assert_eq!(profile.len(), 12);
        assert_eq!(profile[0].month, HydroMonth::MAY);
        assert!(profile.iter().all(|p| p.years == 2));
        let may_spill = (r[0].allocation.spill + r[12].allocation.spill) / 2.0;
        assert_abs_diff_eq!(profile[0].mean_spill, may_spill, epsilon = 1e-12);
        // Civil May has no irrigation demand.
        assert_eq!(profile[0].satisfaction, 100.0);
    }
}
