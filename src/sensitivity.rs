use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ReservoirConfig, ScenarioConfig};
use crate::demand::DeliveryFactors;
use crate::error::{ScenarioError, SimError};
use crate::hydrology::HydrologyProvider;
use crate::kpi::{self, RunKpis};
use crate::simulation::simulate;
use crate::types::HydroYear;

/// Axes of the sensitivity scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityGrid {
    /// Uniform delivery factors applied to both sectors.
    pub delivery_factors: Vec<f64>,
    /// Initial stock of every account as a fraction of its capacity.
    pub initial_fractions: Vec<f64>,
    /// Block lengths, in years, the scenario is cut into.
    pub block_years: Vec<usize>,
}

impl SensitivityGrid {
    pub fn canonical() -> Self {
        SensitivityGrid {
            delivery_factors: (5..=10u8).map(|k| f64::from(k) / 10.0).collect(),
            initial_fractions: vec![0.0, 0.25, 0.5, 0.75, 1.0],
            block_years: vec![5, 10, 15],
        }
    }

    pub fn cells(&self) -> usize {
        self.delivery_factors.len() * self.initial_fractions.len()
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        for &fe in &self.delivery_factors {
            DeliveryFactors::uniform(fe).validate()?;
        }
        for &value in &self.initial_fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScenarioError::InvalidParameter { name: "initial stock fraction", value });
            }
        }
        Ok(())
    }
}

/// One cell of the scan: one block of years run with one FE and one initial state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityRow {
    pub block_years: usize,
    pub block_index: usize,
    pub interval_start: HydroYear,
    pub interval_end: HydroYear,
    pub fe: f64,
    /// Initial fraction of capacity.
    pub initial: f64,
    pub kpis: RunKpis,
}

/// Mean KPIs of one (block length, FE, initial fraction) combination across its blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellMean {
    pub block_years: usize,
    pub fe: f64,
    pub initial: f64,
    pub blocks: usize,
    pub deficit_total: f64,
    /// Demand withheld by the delivery factor.
    pub fe_shortfall: f64,
    /// Model deficit plus the withheld demand.
    pub deficit_with_fe: f64,
    pub spill: f64,
    pub satisfaction: f64,
    pub ending_storage: f64,
    pub turbined: f64,
    pub mean_available_flow: f64,
}

/// Cut `years` into consecutive blocks of `block` years.
pub fn split_blocks(years: &[HydroYear], block: usize) -> Result<Vec<&[HydroYear]>, ScenarioError> {
    if years.is_empty() {
        return Err(ScenarioError::EmptyYearList);
    }
    if block == 0 || years.len() % block != 0 {
        return Err(ScenarioError::UnevenBlocks { years: years.len(), block });
    }
    Ok(years.chunks(block).collect())
}

/// Run every cell of the grid in parallel. Rows come back ordered by block
/// length, block, FE and initial fraction.
pub fn run_grid<H>(
    reservoir: &ReservoirConfig,
    template: &ScenarioConfig,
    hydrology: &H,
    grid: &SensitivityGrid,
) -> Result<Vec<SensitivityRow>, SimError>
where
    H: HydrologyProvider + Sync + ?Sized,
{
    grid.validate()?;

    let mut cells = Vec::new();
    for &block_years in &grid.block_years {
        for (block_index, block) in split_blocks(&template.years, block_years)?.into_iter().enumerate() {
            for &fe in &grid.delivery_factors {
                for &initial in &grid.initial_fractions {
                    cells.push((block_years, block_index, block, fe, initial));
                }
            }
        }
    }

    let rows = cells
        .into_par_iter()
        .map(|(block_years, block_index, block, fe, initial)| {
            let scenario = ScenarioConfig {
                years: block.to_vec(),
                delivery: DeliveryFactors::uniform(fe),
                initial: reservoir.capacities.scaled(initial),
                carry_backlog: template.carry_backlog,
            };
            let results = simulate(reservoir, scenario, hydrology)?;
            Ok(SensitivityRow {
                block_years,
                block_index,
                interval_start: block[0],
                interval_end: block[block.len() - 1],
                fe,
                initial,
                kpis: kpi::aggregate(&results),
            })
        })
        .collect::<Result<Vec<_>, SimError>>()?;

    info!(rows = rows.len(), cells = grid.cells(), "sensitivity grid complete");
    Ok(rows)
}

/// Average each (block length, FE, initial fraction) combination over its blocks.
pub fn mean_over_blocks(rows: &[SensitivityRow]) -> Vec<CellMean> {
    let mut out: Vec<CellMean> = Vec::new();
    for r in rows {
        let idx = match out
            .iter()
            .position(|c| c.block_years == r.block_years && c.fe == r.fe && c.initial == r.initial)
        {
            Some(i) => i,
            None => {
                out.push(CellMean {
                    block_years: r.block_years,
                    fe: r.fe,
                    initial: r.initial,
                    blocks: 0,
                    deficit_total: 0.0,
                    fe_shortfall: 0.0,
                    deficit_with_fe: 0.0,
                    spill: 0.0,
                    satisfaction: 0.0,
                    ending_storage: 0.0,
                    turbined: 0.0,
                    mean_available_flow: 0.0,
                });
                out.len() - 1
            }
        };
        let c = &mut out[idx];
        c.blocks += 1;
        c.deficit_total += r.kpis.deficit_total;
        c.fe_shortfall += r.kpis.fe_shortfall;
        c.deficit_with_fe += r.kpis.deficit_with_fe;
        c.spill += r.kpis.spill;
        c.satisfaction += r.kpis.satisfaction;
        c.ending_storage += r.kpis.ending_stocks.total();
        c.turbined += r.kpis.turbined;
        c.mean_available_flow += r.kpis.mean_available_flow;
    }
    for c in &mut out {
        let n = c.blocks as f64;
        c.deficit_total /= n;
        c.fe_shortfall /= n;
        c.deficit_with_fe /= n;
        c.spill /= n;
        c.satisfaction /= n;
        c.ending_storage /= n;
        c.turbined /= n;
        c.mean_available_flow /= n;
    }
    out
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::hydrology::seasonal_table;

    fn years(n: u16) -> Vec<HydroYear> {
        (1989..1989 + n).map(HydroYear).collect()
    }

    #[test]
    fn canonical_grid_values() {
        let g = SensitivityGrid::canonical();
        assert_eq!(g.delivery_factors, vec![0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        assert_eq!(g.initial_fractions.len(), 5);
        assert_eq!(g.block_years, vec![5, 10, 15]);
        assert_eq!(g.cells(), 30);
    }

    #[test]
    fn thirty_years_split_into_blocks() {
        let ys = years(30);
        for (block, count) in [(5, 6), (10, 3), (15, 2)] {
            let blocks = split_blocks(&ys, block).unwrap();
            assert_eq!(blocks.len(), count);
            assert_eq!(blocks[1][0], HydroYear(1989 + block as u16));
        }
    }

    #[test]
    fn uneven_blocks_rejected() {
        assert_eq!(
            split_blocks(&years(30), 7).unwrap_err(),
            ScenarioError::UnevenBlocks { years: 30, block: 7 }
        );
        assert!(split_blocks(&years(30), 0).is_err());
        assert_eq!(split_blocks(&[], 5).unwrap_err(), ScenarioError::EmptyYearList);
    }

    #[test]
    fn grid_rows_cover_every_cell_in_order() {
        let h = seasonal_table(1989, 4, 1.0);
        let template = ScenarioConfig::canonical().with_years(years(4));
        let grid = SensitivityGrid {
            delivery_factors: vec![0.5, 1.0],
            initial_fractions: vec![0.0, 1.0],
            block_years: vec![2, 4],
        };
        let rows = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid).unwrap();
        // Two 2-year blocks plus one 4-year block, four cells each.
        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].block_years, 2);
        assert_eq!(rows[0].interval_start, HydroYear(1989));
        assert_eq!(rows[0].interval_end, HydroYear(1990));
        assert_eq!(rows[4].block_index, 1);
        assert_eq!(rows[4].interval_start, HydroYear(1991));
        assert_eq!(rows[11].block_years, 4);
        assert_eq!(rows[11].interval_end, HydroYear(1992));
        assert_eq!((rows[1].fe, rows[1].initial), (0.5, 1.0));
        assert_eq!((rows[2].fe, rows[2].initial), (1.0, 0.0));
    }

    #[test]
    fn full_start_stores_more_than_empty_start() {
        let h = seasonal_table(1989, 2, 0.5);
        let template = ScenarioConfig::canonical().with_years(years(2));
        let grid = SensitivityGrid { delivery_factors: vec![1.0], initial_fractions: vec![0.0, 1.0], block_years: vec![2] };
        let rows = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid).unwrap();
        assert!(rows[1].kpis.deficit_total <= rows[0].kpis.deficit_total + 1e-9);
        assert_eq!(rows[1].kpis.months, 24);
    }

    #[test]
    fn invalid_axis_rejected() {
        let h = seasonal_table(1989, 2, 1.0);
        let template = ScenarioConfig::canonical().with_years(years(2));
        let grid = SensitivityGrid { delivery_factors: vec![1.2], initial_fractions: vec![0.0], block_years: vec![2] };
        let err = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid);
        assert!(matches!(err, Err(SimError::Scenario(ScenarioError::InvalidDeliveryFactor { .. }))));

        let grid = SensitivityGrid { delivery_factors: vec![1.0], initial_fractions: vec![1.5], block_years: vec![2] };
        let err = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid);
        assert!(matches!(err, Err(SimError::Scenario(ScenarioError::InvalidParameter { .. }))));
    }

    #[test]
    fn block_means_average_over_blocks() {
        let h = seasonal_table(1989, 4, 1.0);
        let template = ScenarioConfig::canonical().with_years(years(4));
        let grid = SensitivityGrid { delivery_factors: vec![0.8], initial_fractions: vec![0.5], block_years: vec![2] };
        let rows = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid).unwrap();
        let means = mean_over_blocks(&rows);
        assert_eq!(means.len(), 1);
        assert_eq!(means[0].blocks, 2);
        let expected = (rows[0].kpis.deficit_total + rows[1].kpis.deficit_total) / 2.0;
        assert_abs_diff_eq!(means[0].deficit_total, expected, epsilon = 1e-12);
    }

    #[test]
    fn canonical_blocks_cover_thirty_years() {
        let ys = years(30);
        let runs: usize = SensitivityGrid::canonical()
            .block_years
            .iter()
            .map(|&b| split_blocks(&ys, b).unwrap().len())
            .sum();
        assert_eq!(runs, 6 + 3 + 2);
    }

    #[test]
    fn block_means_carry_the_withheld_demand() {
        let h = seasonal_table(1989, 4, 0.3);
        let template = ScenarioConfig::canonical().with_years(years(4));
        let grid = SensitivityGrid { delivery_factors: vec![0.5, 1.0], initial_fractions: vec![0.0], block_years: vec![2] };
        let rows = run_grid(&ReservoirConfig::canonical(), &template, &h, &grid).unwrap();
        let means = mean_over_blocks(&rows);
        assert_eq!(means.len(), 2);
        for c in &means {
            assert_abs_diff_eq!(c.deficit_with_fe, c.deficit_total + c.fe_shortfall, epsilon = 1e-9);
        }
        let (half, full) = (&means[0], &means[1]);
        assert_eq!((half.fe, full.fe), (0.5, 1.0));
        assert!(half.fe_shortfall > 0.0);
        assert_abs_diff_eq!(full.fe_shortfall, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(full.deficit_with_fe, full.deficit_total, epsilon = 1e-9);
        let expected = (rows[0].kpis.fe_shortfall + rows[2].kpis.fe_shortfall) / 2.0;
        assert_abs_diff_eq!(half.fe_shortfall, expected, epsilon = 1e-9);
    }
}
