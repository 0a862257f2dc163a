use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ReservoirConfig, ScenarioConfig};
use crate::error::{ScenarioError, SimError};
use crate::hydrology::HydrologyProvider;
use crate::kpi::{self, AnnualSummary, RunKpis};
use crate::simulation::simulate;
use crate::types::HydroYear;

/// How scenario years are drawn from the historical pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    /// Each historical year at most once per run; the horizon is capped at the pool size.
    #[default]
    WithoutReplacement,
    /// Bootstrap: years drawn independently, repeats allowed.
    WithReplacement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    pub runs: usize,
    pub years_per_run: usize,
    /// Run `i` uses `seed + i`, wrapping at `u64::MAX`.
    pub seed: u64,
    pub resampling: Resampling,
}

impl MonteCarloConfig {
    pub fn canonical() -> Self {
        MonteCarloConfig { runs: 100, years_per_run: 30, seed: 42, resampling: Resampling::WithoutReplacement }
    }
}

/// One resampled run and its results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct McOutcome {
    pub run: usize,
    pub seed: u64,
    pub years: Vec<HydroYear>,
    pub kpis: RunKpis,
    #[serde(skip)]
    pub annual: Vec<AnnualSummary>,
}

/// Draw an ordered year sequence from `pool`.
pub fn sample_years<R: Rng + ?Sized>(
    pool: &[HydroYear],
    n: usize,
    resampling: Resampling,
    rng: &mut R,
) -> Vec<HydroYear> {
    if pool.is_empty() {
        return Vec::new();
    }
    match resampling {
        Resampling::WithoutReplacement => {
            let mut years = pool.to_vec();
            years.shuffle(rng);
            years.truncate(n);
            years
        }
        Resampling::WithReplacement => (0..n).map(|_| pool[rng.random_range(0..pool.len())]).collect(),
    }
}

/// Run `mc.runs` independent resampled scenarios in parallel.
///
/// The pool is the distinct years of `template.years`; every other scenario
/// setting (delivery factors, initial stocks, backlog carry) comes from the
/// template unchanged. Results are in run order and do not depend on thread
/// scheduling.
pub fn run_monte_carlo<H>(
    reservoir: &ReservoirConfig,
    template: &ScenarioConfig,
    hydrology: &H,
    mc: &MonteCarloConfig,
) -> Result<Vec<McOutcome>, SimError>
where
    H: HydrologyProvider + Sync + ?Sized,
{
    if mc.years_per_run == 0 {
        return Err(ScenarioError::InvalidParameter { name: "years per run", value: 0.0 }.into());
    }
    let mut pool = template.years.clone();
    pool.sort();
    pool.dedup();
    if pool.is_empty() {
        return Err(ScenarioError::EmptyYearList.into());
    }
    if mc.resampling == Resampling::WithoutReplacement && mc.years_per_run > pool.len() {
        info!(requested = mc.years_per_run, pool = pool.len(), "horizon capped at pool size");
    }

    let outcomes = (0..mc.runs)
        .into_par_iter()
        .map(|run| {
            let seed = mc.seed.wrapping_add(run as u64);
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let years = sample_years(&pool, mc.years_per_run, mc.resampling, &mut rng);
            let results = simulate(reservoir, template.with_years(years.clone()), hydrology)?;
            Ok(McOutcome {
                run,
                seed,
                years,
                kpis: kpi::aggregate(&results),
                annual: kpi::annual_summaries(&results),
            })
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    info!(runs = outcomes.len(), seed = mc.seed, "monte carlo complete");
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::hydrology::seasonal_table;

    fn pool(n: u16) -> Vec<HydroYear> {
        (1989..1989 + n).map(HydroYear).collect()
    }

    fn rng(seed: u64) -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(seed)
    }

    #[test]
    fn without_replacement_draws_distinct_years() {
        let years = sample_years(&pool(30), 10, Resampling::WithoutReplacement, &mut rng(1));
        assert_eq!(years.len(), 10);
        let distinct: HashSet<_> = years.iter().collect();
        assert_eq!(distinct.len(), 10);
    }

    #[test]
    fn without_replacement_caps_horizon_at_pool_size() {
        let years = sample_years(&pool(5), 30, Resampling::WithoutReplacement, &mut rng(1));
        assert_eq!(years.len(), 5);
        let mut sorted = years.clone();
        sorted.sort();
        assert_eq!(sorted, pool(5));
    }

    #[test]
    fn with_replacement_fills_the_horizon() {
        let years = sample_years(&pool(3), 40, Resampling::WithReplacement, &mut rng(7));
        assert_eq!(years.len(), 40);
        assert!(years.iter().all(|y| pool(3).contains(y)));
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = sample_years(&pool(30), 30, Resampling::WithoutReplacement, &mut rng(42));
        let b = sample_years(&pool(30), 30, Resampling::WithoutReplacement, &mut rng(42));
        let c = sample_years(&pool(30), 30, Resampling::WithoutReplacement, &mut rng(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_pool_samples_nothing() {
        assert!(sample_years(&[], 5, Resampling::WithReplacement, &mut rng(0)).is_empty());
    }

    #[test]
    fn batch_is_reproducible_and_seeded_per_run() {
        let h = seasonal_table(1989, 6, 1.0);
        let reservoir = ReservoirConfig::canonical();
        let template = ScenarioConfig::canonical().with_years(pool(6));
        let mc = MonteCarloConfig { runs: 8, years_per_run: 4, seed: 100, resampling: Resampling::WithoutReplacement };

        let first = run_monte_carlo(&reservoir, &template, &h, &mc).unwrap();
        let second = run_monte_carlo(&reservoir, &template, &h, &mc).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 8);

        // Run 3 matches a standalone simulation of the same draw.
        let o = &first[3];
        assert_eq!(o.run, 3);
        assert_eq!(o.seed, 103);
        let expected = sample_years(&pool(6), 4, Resampling::WithoutReplacement, &mut rng(103));
        assert_eq!(o.years, expected);
        let alone = simulate(&reservoir, template.with_years(expected), &h).unwrap();
        assert_eq!(o.kpis, kpi::aggregate(&alone));
        assert_eq!(o.annual.len(), 4);
    }

    #[test]
    fn run_seeds_wrap_at_u64_max() {
        let h = seasonal_table(1989, 3, 1.0);
        let template = ScenarioConfig::canonical().with_years(pool(3));
        let mc = MonteCarloConfig { runs: 3, years_per_run: 2, seed: u64::MAX - 1, resampling: Resampling::WithReplacement };
        let outcomes = run_monte_carlo(&ReservoirConfig::canonical(), &template, &h, &mc).unwrap();
        let seeds: Vec<u64> = outcomes.iter().map(|o| o.seed).collect();
        assert_eq!(seeds, vec![u64::MAX - 1, u64::MAX, 0]);
        let expected = sample_years(&pool(3), 2, Resampling::WithReplacement, &mut rng(0));
        assert_eq!(outcomes[2].years, expected);
    }

    #[test]
    fn zero_horizon_rejected() {
        let h = seasonal_table(1989, 2, 1.0);
        let mc = MonteCarloConfig { years_per_run: 0, ..MonteCarloConfig::canonical() };
        let err = run_monte_carlo(&ReservoirConfig::canonical(), &ScenarioConfig::canonical(), &h, &mc);
        assert!(matches!(err, Err(SimError::Scenario(ScenarioError::InvalidParameter { .. }))));
    }

    #[test]
    fn year_outside_record_fails_the_batch() {
        let h = seasonal_table(1989, 2, 1.0);
        let template = ScenarioConfig::canonical().with_years(vec![HydroYear(1989), HydroYear(2030)]);
        let mc = MonteCarloConfig { runs: 3, years_per_run: 2, ..MonteCarloConfig::canonical() };
        let err = run_monte_carlo(&ReservoirConfig::canonical(), &template, &h, &mc);
        assert!(matches!(err, Err(SimError::Scenario(ScenarioError::UnknownYear(HydroYear(2030))))));
    }
}
