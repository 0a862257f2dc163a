use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::types::{HydroMonth, HydroYear};

/// Mean flows for one month, in m³/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MonthlyFlows {
    /// River flow entering the reservoir. Also the cap on the bypass requirement.
    pub inflow: f64,
    /// Contributions of the three downstream sub-basins.
    pub sub_basins: [f64; 3],
}

/// One line of the hydrology NDJSON input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydrologyRecord {
    pub year: HydroYear,
    pub month: HydroMonth,
    pub inflow: f64,
    #[serde(default)]
    pub sub_basins: [f64; 3],
}

/// Source of monthly flows for the simulation.
pub trait HydrologyProvider {
    /// Flows for (year, month), or `None` when the record has no entry.
    fn flows(&self, year: HydroYear, month: HydroMonth) -> Option<MonthlyFlows>;

    /// Whether the year appears in the record at all.
    fn has_year(&self, year: HydroYear) -> bool;

    /// Years available for replay, ascending.
    fn years(&self) -> Vec<HydroYear>;
}

/// In-memory hydrology record: one twelve-slot row per year.
#[derive(Debug, Clone, Default)]
pub struct HydrologyTable {
    years: Vec<HydroYear>,
    rows: Vec<[Option<MonthlyFlows>; 12]>,
}

#[derive(Debug, thiserror::Error)]
pub enum HydrologyLoadError {
    #[error("failed to read hydrology input: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {source}")]
    Parse { line: usize, source: serde_json::Error },
}

impl HydrologyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a single month.
    pub fn insert(&mut self, year: HydroYear, month: HydroMonth, flows: MonthlyFlows) {
        let row = match self.years.binary_search(&year) {
            Ok(i) => i,
            Err(i) => {
                self.years.insert(i, year);
                self.rows.insert(i, [None; 12]);
                i
            }
        };
        self.rows[row][month.index()] = Some(flows);
    }

    pub fn from_records(records: impl IntoIterator<Item = HydrologyRecord>) -> Self {
        let mut table = Self::new();
        for r in records {
            table.insert(r.year, r.month, MonthlyFlows { inflow: r.inflow, sub_basins: r.sub_basins });
        }
        table
    }

    /// Parse NDJSON, one `HydrologyRecord` per non-blank line.
    pub fn read_ndjson(reader: impl BufRead) -> Result<Self, HydrologyLoadError> {
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: HydrologyRecord = serde_json::from_str(&line)
                .map_err(|source| HydrologyLoadError::Parse { line: line_no + 1, source })?;
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    pub fn len_years(&self) -> usize {
        self.years.len()
    }
}

impl HydrologyProvider for HydrologyTable {
    fn flows(&self, year: HydroYear, month: HydroMonth) -> Option<MonthlyFlows> {
        let row = self.years.binary_search(&year).ok()?;
        self.rows[row][month.index()]
    }

    fn has_year(&self, year: HydroYear) -> bool {
        self.years.binary_search(&year).is_ok()
    }

    fn years(&self) -> Vec<HydroYear> {
        self.years.clone()
    }
}

/// Deterministic seasonal record for tests: wet winters, dry summers, each
/// year scaled by a slowly varying factor so years differ.
#[cfg(test)]
pub(crate) fn seasonal_table(first: u16, n_years: u16, scale: f64) -> HydrologyTable {
    // May..Apr mean flows (m³/s) loosely shaped like a snow/rain regime.
    const SHAPE: [f64; 12] = [90.0, 140.0, 160.0, 150.0, 130.0, 120.0, 100.0, 70.0, 45.0, 35.0, 40.0, 55.0];
    let mut table = HydrologyTable::new();
    for k in 0..n_years {
        let factor = scale * (0.55 + 0.1 * f64::from((k * 7) % 10));
        for month in HydroMonth::all() {
            let inflow = SHAPE[month.index()] * factor;
            table.insert(
                HydroYear(first + k),
                month,
                MonthlyFlows { inflow, sub_basins: [inflow * 0.20, inflow * 0.10, inflow * 0.05] },
            );
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn insert_keeps_years_sorted() {
        let mut t = HydrologyTable::new();
        t.insert(HydroYear(2000), HydroMonth::MAY, MonthlyFlows::default());
        t.insert(HydroYear(1990), HydroMonth::MAY, MonthlyFlows::default());
        t.insert(HydroYear(1995), HydroMonth::APRIL, MonthlyFlows::default());
        assert_eq!(t.years(), vec![HydroYear(1990), HydroYear(1995), HydroYear(2000)]);
    }

    #[test]
    fn missing_month_is_none_but_year_known() {
        let mut t = HydrologyTable::new();
        t.insert(HydroYear(1990), HydroMonth::MAY, MonthlyFlows { inflow: 5.0, sub_basins: [0.0; 3] });
        assert!(t.has_year(HydroYear(1990)));
        assert!(t.flows(HydroYear(1990), HydroMonth::APRIL).is_none());
        assert!(!t.has_year(HydroYear(1991)));
    }

    #[test]
    fn reads_ndjson_and_skips_blank_lines() {
        let input = r#"{"year":1989,"month":1,"inflow":86.3,"sub_basins":[10.1,4.2,2.0]}

{"year":1989,"month":2,"inflow":120.0}
"#;
        let t = HydrologyTable::read_ndjson(Cursor::new(input)).unwrap();
        let may = t.flows(HydroYear(1989), HydroMonth::MAY).unwrap();
        assert_eq!(may.inflow, 86.3);
        assert_eq!(may.sub_basins, [10.1, 4.2, 2.0]);
        let jun = t.flows(HydroYear(1989), HydroMonth::new(2).unwrap()).unwrap();
        assert_eq!(jun.sub_basins, [0.0; 3], "absent sub-basins default to zero");
    }

    #[test]
    fn ndjson_error_reports_line_number() {
        let input = "{\"year\":1989,\"month\":1,\"inflow\":1.0}\n{\"year\":1989,\"month\":13,\"inflow\":1.0}\n";
        let err = HydrologyTable::read_ndjson(Cursor::new(input)).unwrap_err();
        assert!(matches!(err, HydrologyLoadError::Parse { line: 2, .. }), "got {err:?}");
    }

    #[test]
    fn seasonal_table_covers_every_month() {
        let t = seasonal_table(1989, 3, 1.0);
        assert_eq!(t.len_years(), 3);
        for y in t.years() {
            for m in HydroMonth::all() {
                assert!(t.flows(y, m).is_some());
            }
        }
    }
}
