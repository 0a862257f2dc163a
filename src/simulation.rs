use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::allocation::{Allocation, AllocationEngine, MonthState, StepInput};
use crate::config::{ReservoirConfig, ScenarioConfig};
use crate::demand::{DemandModel, SectorDemand};
use crate::error::{ScenarioError, SimError};
use crate::hydrology::{HydrologyProvider, MonthlyFlows};
use crate::senior_rights::SeniorRightsRule;
use crate::types::{HydroMonth, HydroYear};

/// Immutable record of one simulated month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthlyResult {
    /// Position of the year in the scenario, not the calendar.
    pub year_index: usize,
    pub year: HydroYear,
    pub month: HydroMonth,
    /// Demand before delivery factors.
    pub base_demand: SectorDemand,
    #[serde(flatten)]
    pub allocation: Allocation,
}

impl MonthlyResult {
    /// Demand removed by delivery factors: base minus effective.
    pub fn fe_shortfall(&self) -> f64 {
        self.base_demand.total() - self.allocation.demand.total()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Uninitialized,
    Running { cursor: usize },
    Completed,
    /// Stopped on an invariant violation; results up to the failing month are kept.
    Aborted,
}

/// Chains the monthly allocation over the scenario's ordered year list.
pub struct SimulationRunner {
    engine: AllocationEngine,
    rights: SeniorRightsRule,
    demand: DemandModel,
    scenario: ScenarioConfig,
    /// Flows per scenario month, indexed by `year_index * 12 + month - 1`.
    flows: Vec<MonthlyFlows>,
    state: RunState,
    results: Vec<MonthlyResult>,
}

impl SimulationRunner {
    /// Validate the configuration and resolve every flow the scenario needs.
    pub fn from_config<H>(
        reservoir: &ReservoirConfig,
        scenario: ScenarioConfig,
        hydrology: &H,
    ) -> Result<Self, ScenarioError>
    where
        H: HydrologyProvider + ?Sized,
    {
        reservoir.validate()?;
        scenario.validate(reservoir, hydrology)?;

        let mut flows = Vec::with_capacity(scenario.months());
        for &year in &scenario.years {
            for month in HydroMonth::all() {
                let f = hydrology.flows(year, month).unwrap_or_else(|| {
                    warn!(%year, %month, "no hydrology record, using zero flow");
                    MonthlyFlows::default()
                });
                flows.push(f);
            }
        }

        Ok(SimulationRunner {
            engine: AllocationEngine::from_config(reservoir),
            rights: SeniorRightsRule::new(reservoir.senior_rights.clone()),
            demand: DemandModel::new(reservoir.demand.clone()),
            results: Vec::with_capacity(scenario.months()),
            scenario,
            flows,
            state: RunState::Uninitialized,
        })
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn scenario(&self) -> &ScenarioConfig {
        &self.scenario
    }

    /// Reset to the configured initial stocks with an empty backlog.
    pub fn start(&mut self) {
        self.results.clear();
        self.state = RunState::Running { cursor: 0 };
    }

    fn initial_state(&self) -> MonthState {
        MonthState { stocks: self.scenario.initial, backlog: 0.0 }
    }

    /// Entry state for scenario month `cursor`: initial stocks for the first
    /// month, otherwise whatever the previous scenario month left behind.
    fn entry_state(&self, cursor: usize) -> MonthState {
        match self.results.last() {
            None => self.initial_state(),
            Some(prev) => {
                let year_boundary = cursor % 12 == 0;
                prev.allocation.carry(!year_boundary || self.scenario.carry_backlog)
            }
        }
    }

    /// Process one month. Returns `Ok(false)` once there is nothing left to do.
    pub fn step(&mut self) -> Result<bool, SimError> {
        let cursor = match self.state {
            RunState::Uninitialized => {
                self.start();
                0
            }
            RunState::Running { cursor } => cursor,
            RunState::Completed | RunState::Aborted => return Ok(false),
        };
        if cursor >= self.flows.len() {
            self.state = RunState::Completed;
            return Ok(false);
        }

        let year_index = cursor / 12;
        let year = self.scenario.years[year_index];
        let month = HydroMonth::from_index(cursor % 12);
        let flows = &self.flows[cursor];

        let input = StepInput {
            inflow: month.volume(flows.inflow),
            bypass: self.rights.bypass_volume(month, flows),
            demand: self.demand.effective(month, self.scenario.delivery),
        };
        let entry = self.entry_state(cursor);
        let allocation = self.engine.step(&entry, &input);

        if let Err(breach) = self.engine.verify(&allocation) {
            let violation = breach.at(year, month);
            error!(%violation, "aborting run");
            self.state = RunState::Aborted;
            return Err(violation.into());
        }

        self.results.push(MonthlyResult {
            year_index,
            year,
            month,
            base_demand: self.demand.base(month),
            allocation,
        });

        if month == HydroMonth::APRIL {
            debug!(
                %year,
                year_index,
                reserve = allocation.end.reserve,
                sector_a = allocation.end.sector_a,
                sector_b = allocation.end.sector_b,
                backlog = allocation.backlog,
                "year complete"
            );
        }

        self.state = RunState::Running { cursor: cursor + 1 };
        Ok(true)
    }

    /// Run every remaining month.
    pub fn run(&mut self) -> Result<(), SimError> {
        self.start();
        while self.step()? {}
        let deficit: f64 = self.results.iter().map(|r| r.allocation.deficit_total()).sum();
        info!(months = self.results.len(), years = self.scenario.years.len(), deficit, "run complete");
        Ok(())
    }

    pub fn results(&self) -> &[MonthlyResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<MonthlyResult> {
        self.results
    }
}

/// Build, run and collect a scenario in one call.
pub fn simulate<H>(
    reservoir: &ReservoirConfig,
    scenario: ScenarioConfig,
    hydrology: &H,
) -> Result<Vec<MonthlyResult>, SimError>
where
    H: HydrologyProvider + ?Sized,
{
    let mut runner = SimulationRunner::from_config(reservoir, scenario, hydrology)?;
    runner.run()?;
    Ok(runner.into_results())
}
