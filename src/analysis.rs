use serde::Serialize;

use crate::kpi::AnnualSummary;
use crate::montecarlo::McOutcome;

/// Distribution statistics for a continuous metric across N simulation runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Cross-run distribution of the headline KPIs of a Monte Carlo batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McSummary {
    pub runs: usize,
    pub deficit_total: DistStats,
    pub satisfaction: DistStats,
    pub turbined: DistStats,
    pub spill: DistStats,
    pub available_flow: DistStats,
    pub ending_storage: DistStats,
    /// Run index with the smallest total deficit.
    pub best_run: usize,
    /// Run index with the largest total deficit.
    pub worst_run: usize,
}

/// Distribution of annual results at one position of the resampled sequence
/// (first simulated year, second, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionDist {
    pub year_index: usize,
    pub deficit_total: DistStats,
    pub mean_satisfaction: DistStats,
    pub turbined: DistStats,
}

/// Linear-interpolated percentiles over a sample. Sorts `values` in place.
pub fn percentile_stats(values: &mut [f64]) -> Option<DistStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();

    let interp = |p: f64| -> f64 {
        let h = p * (n - 1) as f64;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    };

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };

    Some(DistStats {
        n,
        min: values[0],
        p5: interp(0.05),
        p10: interp(0.10),
        p25: interp(0.25),
        p50: interp(0.50),
        p75: interp(0.75),
        p90: interp(0.90),
        p95: interp(0.95),
        max: values[n - 1],
        mean,
        std_dev: variance.sqrt(),
    })
}

fn dist_of<T>(items: &[T], f: impl Fn(&T) -> f64) -> Option<DistStats> {
    let mut values: Vec<f64> = items.iter().map(f).collect();
    percentile_stats(&mut values)
}

/// Summarise a batch of runs. `None` for an empty batch.
pub fn summarise_runs(outcomes: &[McOutcome]) -> Option<McSummary> {
    let by_deficit = |a: &&McOutcome, b: &&McOutcome| {
        a.kpis
            .deficit_total
            .partial_cmp(&b.kpis.deficit_total)
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    let best_run = outcomes.iter().min_by(by_deficit)?.run;
    let worst_run = outcomes.iter().max_by(by_deficit)?.run;

    Some(McSummary {
        runs: outcomes.len(),
        deficit_total: dist_of(outcomes, |o| o.kpis.deficit_total)?,
        satisfaction: dist_of(outcomes, |o| o.kpis.satisfaction)?,
        turbined: dist_of(outcomes, |o| o.kpis.turbined)?,
        spill: dist_of(outcomes, |o| o.kpis.spill)?,
        available_flow: dist_of(outcomes, |o| o.kpis.available_flow)?,
        ending_storage: dist_of(outcomes, |o| o.kpis.ending_stocks.total())?,
        best_run,
        worst_run,
    })
}

/// Per-position distributions of annual results across runs.
///
/// Positions reached by fewer than 2 runs are excluded (insufficient data for
/// a distribution). Returns results sorted by position.
pub fn position_distributions(all_runs: &[Vec<AnnualSummary>]) -> Vec<PositionDist> {
    let horizon = all_runs.iter().map(Vec::len).max().unwrap_or(0);
    let mut result = Vec::new();

    for year_index in 0..horizon {
        let at: Vec<&AnnualSummary> = all_runs.iter().filter_map(|run| run.get(year_index)).collect();
        if at.len() < 2 {
            continue;
        }
        let (Some(deficit_total), Some(mean_satisfaction), Some(turbined)) = (
            dist_of(&at, |s| s.deficit_total),
            dist_of(&at, |s| s.mean_satisfaction),
            dist_of(&at, |s| s.turbined),
        ) else {
            continue;
        };
        result.push(PositionDist { year_index, deficit_total, mean_satisfaction, turbined });
    }

    result
}
