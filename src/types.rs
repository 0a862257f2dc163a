use std::fmt;

use serde::{Deserialize, Serialize};

/// A hydrological year, identified by the calendar year in which it starts.
/// `HydroYear(1989)` covers May 1989 through April 1990.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HydroYear(pub u16);

impl fmt::Display for HydroYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0, self.0 + 1)
    }
}

/// Hydrological month, 1 = May … 12 = April.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct HydroMonth(u8);

/// Days per hydrological month. February is always 28 days.
const DAYS: [u32; 12] = [31, 30, 31, 31, 30, 31, 30, 31, 31, 28, 31, 30];

const LABELS: [&str; 12] =
    ["may", "jun", "jul", "ago", "sep", "oct", "nov", "dic", "ene", "feb", "mar", "abr"];

impl HydroMonth {
    pub const MAY: HydroMonth = HydroMonth(1);
    pub const APRIL: HydroMonth = HydroMonth(12);

    pub fn new(m: u8) -> Option<Self> {
        (1..=12).contains(&m).then_some(HydroMonth(m))
    }

    /// All twelve months in hydrological order.
    pub fn all() -> impl Iterator<Item = HydroMonth> {
        (1..=12).map(HydroMonth)
    }

    /// Month at zero-based position `i`, wrapping every twelve.
    pub fn from_index(i: usize) -> Self {
        HydroMonth((i % 12) as u8 + 1)
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based position, for indexing monthly tables.
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Civil month (1 = January) this hydrological month falls in.
    pub fn civil(self) -> u8 {
        (self.0 + 3) % 12 + 1
    }

    pub fn seconds(self) -> f64 {
        f64::from(DAYS[self.index()] * 24 * 3600)
    }

    /// Convert a mean flow rate (m³/s) over this month to a volume in Hm³.
    pub fn volume(self, rate_m3s: f64) -> f64 {
        rate_m3s * self.seconds() / 1_000_000.0
    }

    pub fn label(self) -> &'static str {
        LABELS[self.index()]
    }
}

impl TryFrom<u8> for HydroMonth {
    type Error = String;

    fn try_from(m: u8) -> Result<Self, Self::Error> {
        HydroMonth::new(m).ok_or_else(|| format!("hydrological month must be 1..=12, got {m}"))
    }
}

impl From<HydroMonth> for u8 {
    fn from(m: HydroMonth) -> u8 {
        m.0
    }
}

impl fmt::Display for HydroMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The three storage accounts of the reservoir.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Account {
    Reserve,
    SectorA,
    SectorB,
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Account::Reserve => "reserve",
            Account::SectorA => "sector A",
            Account::SectorB => "sector B",
        })
    }
}

/// The two demand-bearing accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sector {
    A,
    B,
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sector::A => "sector A",
            Sector::B => "sector B",
        })
    }
}

/// Volumes (Hm³) held per account.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stocks {
    pub reserve: f64,
    pub sector_a: f64,
    pub sector_b: f64,
}

impl Stocks {
    pub fn new(reserve: f64, sector_a: f64, sector_b: f64) -> Self {
        Stocks { reserve, sector_a, sector_b }
    }

    pub fn get(&self, account: Account) -> f64 {
        match account {
            Account::Reserve => self.reserve,
            Account::SectorA => self.sector_a,
            Account::SectorB => self.sector_b,
        }
    }

    pub fn total(&self) -> f64 {
        self.reserve + self.sector_a + self.sector_b
    }

    /// Each account scaled by `fraction` (used for "x% full" initial states).
    pub fn scaled(&self, fraction: f64) -> Self {
        Stocks {
            reserve: self.reserve * fraction,
            sector_a: self.sector_a * fraction,
            sector_b: self.sector_b * fraction,
        }
    }
}

pub const ACCOUNTS: [Account; 3] = [Account::Reserve, Account::SectorA, Account::SectorB];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn civil_month_mapping() {
        let civil: Vec<u8> = HydroMonth::all().map(HydroMonth::civil).collect();
        assert_eq!(civil, vec![5, 6, 7, 8, 9, 10, 11, 12, 1, 2, 3, 4]);
    }

    #[test]
    fn february_is_always_28_days() {
        let feb = HydroMonth::new(10).unwrap();
        assert_eq!(feb.civil(), 2);
        assert_eq!(feb.seconds(), 28.0 * 86_400.0);
    }

    #[test]
    fn year_has_365_days() {
        let total: f64 = HydroMonth::all().map(HydroMonth::seconds).sum();
        assert_eq!(total, 365.0 * 86_400.0);
    }

    #[test]
    fn volume_conversion() {
        // 10 m³/s over 31 days = 26.784 Hm³
        let may = HydroMonth::MAY;
        assert!((may.volume(10.0) - 26.784).abs() < 1e-12);
    }

    #[test]
    fn month_out_of_range_rejected() {
        assert!(HydroMonth::new(0).is_none());
        assert!(HydroMonth::new(13).is_none());
        assert!(serde_json::from_str::<HydroMonth>("13").is_err());
        assert_eq!(serde_json::from_str::<HydroMonth>("12").unwrap(), HydroMonth::APRIL);
    }

    #[test]
    fn hydro_year_display() {
        assert_eq!(HydroYear(1989).to_string(), "1989/1990");
    }

    #[test]
    fn hydro_year_serializes_as_number() {
        assert_eq!(serde_json::to_string(&HydroYear(2001)).unwrap(), "2001");
    }
}
