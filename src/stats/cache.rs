use crate::prelude::*;

use crate::api::DayTotals;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const CACHE_VERSION: u32 = 1;

pub fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

pub fn round0(v: f64) -> f64 {
    v.round()
}

/// One finalized day. `total_load`, `saved_kwh` and `savings_vnd` are
/// optional for compatibility with files written before those fields
/// existed; accessors derive them on read without mutating the record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyRecord {
    #[serde(default)]
    pub pv: f64,
    #[serde(default)]
    pub grid: f64,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub essential: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_load: Option<f64>,
    #[serde(default)]
    pub charge: f64,
    #[serde(default)]
    pub discharge: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_kwh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub savings_vnd: Option<f64>,
}

impl DailyRecord {
    /// Builds a fully-derived, rounded record from a day's totals.
    pub fn from_totals(t: &DayTotals, tariff: f64) -> Self {
        let load = round1(t.load);
        let essential = round1(t.essential);
        let total_load = round1(load + essential);
        let grid = round1(t.grid);
        let saved_kwh = round1((total_load - grid).max(0.0));
        Self {
            pv: round1(t.pv),
            grid,
            load,
            essential,
            total_load: Some(total_load),
            charge: round1(t.charge),
            discharge: round1(t.discharge),
            saved_kwh: Some(saved_kwh),
            savings_vnd: Some(round0(saved_kwh * tariff)),
        }
    }

    pub fn total_load(&self) -> f64 {
        self.total_load.unwrap_or(self.load + self.essential)
    }

    pub fn saved_kwh(&self) -> f64 {
        self.saved_kwh
            .unwrap_or_else(|| (self.total_load() - self.grid).max(0.0))
    }

    pub fn savings_vnd(&self, tariff: f64) -> f64 {
        self.savings_vnd
            .unwrap_or_else(|| self.saved_kwh() * tariff)
    }

    /// True when every field, stored or derived, is effectively zero.
    pub fn is_empty(&self, tariff: f64) -> bool {
        [
            self.pv,
            self.grid,
            self.load,
            self.essential,
            self.total_load(),
            self.charge,
            self.discharge,
            self.saved_kwh(),
            self.savings_vnd(tariff),
        ]
        .iter()
        .all(|v| v.abs() < 1e-6)
    }

    /// True when any energy field is meaningfully nonzero.
    pub fn has_data(&self) -> bool {
        [self.pv, self.grid, self.load, self.essential, self.charge, self.discharge]
            .iter()
            .any(|v| v.abs() > 1e-3)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monthly {
    #[serde(default = "zero_months")]
    pub pv: [f64; 12],
    #[serde(default = "zero_months")]
    pub grid: [f64; 12],
    #[serde(default = "zero_months")]
    pub load: [f64; 12],
    #[serde(default = "zero_months")]
    pub essential: [f64; 12],
    #[serde(default = "zero_months")]
    pub total_load: [f64; 12],
    #[serde(default = "zero_months")]
    pub charge: [f64; 12],
    #[serde(default = "zero_months")]
    pub discharge: [f64; 12],
    #[serde(default = "zero_months")]
    pub saved_kwh: [f64; 12],
    #[serde(default = "zero_months")]
    pub savings_vnd: [f64; 12],
}

fn zero_months() -> [f64; 12] {
    [0.0; 12]
}

impl Default for Monthly {
    fn default() -> Self {
        Self {
            pv: zero_months(),
            grid: zero_months(),
            load: zero_months(),
            essential: zero_months(),
            total_load: zero_months(),
            charge: zero_months(),
            discharge: zero_months(),
            saved_kwh: zero_months(),
            savings_vnd: zero_months(),
        }
    }
}

/// Rollup totals used for monthly, yearly and lifetime summaries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldTotals {
    #[serde(default)]
    pub pv: f64,
    #[serde(default)]
    pub grid: f64,
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub essential: f64,
    #[serde(default)]
    pub total_load: f64,
    #[serde(default)]
    pub charge: f64,
    #[serde(default)]
    pub discharge: f64,
    #[serde(default)]
    pub saved_kwh: f64,
    #[serde(default)]
    pub savings_vnd: f64,
}

impl FieldTotals {
    pub fn add(&mut self, other: &FieldTotals) {
        self.pv += other.pv;
        self.grid += other.grid;
        self.load += other.load;
        self.essential += other.essential;
        self.total_load += other.total_load;
        self.charge += other.charge;
        self.discharge += other.discharge;
        self.saved_kwh += other.saved_kwh;
        self.savings_vnd += other.savings_vnd;
    }

    pub fn rounded(mut self) -> Self {
        self.pv = round1(self.pv);
        self.grid = round1(self.grid);
        self.load = round1(self.load);
        self.essential = round1(self.essential);
        self.total_load = round1(self.total_load);
        self.charge = round1(self.charge);
        self.discharge = round1(self.discharge);
        self.saved_kwh = round1(self.saved_kwh);
        self.savings_vnd = round0(self.savings_vnd);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Coverage {
    #[serde(default)]
    pub earliest: Option<NaiveDate>,
    #[serde(default)]
    pub latest: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub last_backfill_date: Option<NaiveDate>,
    #[serde(default)]
    pub coverage: Coverage,
    #[serde(default)]
    pub empty_dates: BTreeSet<NaiveDate>,
}

fn default_version() -> u32 {
    CACHE_VERSION
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            last_backfill_date: None,
            coverage: Coverage::default(),
            empty_dates: BTreeSet::new(),
        }
    }
}

/// Persistent store for one device and one calendar year.
///
/// Invariant after every mutating call: each month bucket equals the sum of
/// its days, and the yearly totals equal the sum of the month buckets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct YearCache {
    #[serde(default)]
    pub daily: BTreeMap<NaiveDate, DailyRecord>,
    #[serde(default)]
    pub monthly: Monthly,
    #[serde(default)]
    pub yearly_total: FieldTotals,
    #[serde(default)]
    pub meta: Meta,
}

impl YearCache {
    /// Writes or overwrites one day and incrementally refreshes that day's
    /// month bucket plus the yearly totals. O(days in month).
    pub fn update_daily(&mut self, date: NaiveDate, record: DailyRecord) {
        self.daily.insert(date, record);

        let cov = &mut self.meta.coverage;
        if cov.earliest.map_or(true, |e| date < e) {
            cov.earliest = Some(date);
        }
        if cov.latest.map_or(true, |l| date > l) {
            cov.latest = Some(date);
        }

        self.meta.empty_dates.remove(&date);

        self.recompute_month(date.month());
        self.recompute_yearly_from_monthly();
    }

    /// Marks a date as confirmed empty. Does not create or alter a daily
    /// record.
    pub fn mark_empty(&mut self, date: NaiveDate) {
        self.meta.empty_dates.insert(date);
    }

    /// Full rebuild of monthly arrays and yearly totals from the daily map.
    pub fn recompute_aggregates(&mut self, tariff: f64) {
        let mut monthly = Monthly::default();

        for (date, record) in &self.daily {
            let m = date.month0() as usize;
            monthly.pv[m] += record.pv;
            monthly.grid[m] += record.grid;
            monthly.load[m] += record.load;
            monthly.essential[m] += record.essential;
            monthly.total_load[m] += record.total_load();
            monthly.charge[m] += record.charge;
            monthly.discharge[m] += record.discharge;
            monthly.saved_kwh[m] += record.saved_kwh();
            monthly.savings_vnd[m] += record.savings_vnd(tariff);
        }

        for m in 0..12 {
            monthly.pv[m] = round1(monthly.pv[m]);
            monthly.grid[m] = round1(monthly.grid[m]);
            monthly.load[m] = round1(monthly.load[m]);
            monthly.essential[m] = round1(monthly.essential[m]);
            monthly.total_load[m] = round1(monthly.total_load[m]);
            monthly.charge[m] = round1(monthly.charge[m]);
            monthly.discharge[m] = round1(monthly.discharge[m]);
            monthly.saved_kwh[m] = round1(monthly.saved_kwh[m]);
            monthly.savings_vnd[m] = round0(monthly.savings_vnd[m]);
        }

        self.monthly = monthly;
        self.recompute_yearly_from_monthly();
    }

    fn recompute_month(&mut self, month: u32) {
        let m = month as usize - 1;
        let mut sums = FieldTotals::default();

        for (date, record) in &self.daily {
            if date.month() != month {
                continue;
            }
            sums.pv += record.pv;
            sums.grid += record.grid;
            sums.load += record.load;
            sums.essential += record.essential;
            sums.total_load += record.total_load();
            sums.charge += record.charge;
            sums.discharge += record.discharge;
            sums.saved_kwh += record.saved_kwh.unwrap_or(0.0);
            sums.savings_vnd += record.savings_vnd.unwrap_or(0.0);
        }

        self.monthly.pv[m] = round1(sums.pv);
        self.monthly.grid[m] = round1(sums.grid);
        self.monthly.load[m] = round1(sums.load);
        self.monthly.essential[m] = round1(sums.essential);
        self.monthly.total_load[m] = round1(sums.total_load);
        self.monthly.charge[m] = round1(sums.charge);
        self.monthly.discharge[m] = round1(sums.discharge);
        self.monthly.saved_kwh[m] = round1(sums.saved_kwh);
        self.monthly.savings_vnd[m] = round0(sums.savings_vnd);
    }

    fn recompute_yearly_from_monthly(&mut self) {
        let m = &self.monthly;
        self.yearly_total = FieldTotals {
            pv: round1(m.pv.iter().sum()),
            grid: round1(m.grid.iter().sum()),
            load: round1(m.load.iter().sum()),
            essential: round1(m.essential.iter().sum()),
            total_load: round1(m.total_load.iter().sum()),
            charge: round1(m.charge.iter().sum()),
            discharge: round1(m.discharge.iter().sum()),
            saved_kwh: round1(m.saved_kwh.iter().sum()),
            savings_vnd: round0(m.savings_vnd.iter().sum()),
        };
    }

    /// Detects the known artifact where an earlier rollup bug left the
    /// first eleven month buckets sharing one nonzero value.
    pub fn needs_recompute(&self) -> bool {
        if self.daily.is_empty() {
            return false;
        }
        for arr in [&self.monthly.pv, &self.monthly.grid, &self.monthly.load] {
            let first = arr[0];
            if first != 0.0 && arr[..11].iter().all(|v| *v == first) {
                return true;
            }
        }
        false
    }

    pub fn summarize_month(&self, month: u32) -> FieldTotals {
        let m = month as usize - 1;
        let load = self.monthly.load[m];
        let essential = self.monthly.essential[m];
        let mut total_load = self.monthly.total_load[m];
        if total_load == 0.0 && (load != 0.0 || essential != 0.0) {
            total_load = round1(load + essential);
        }
        FieldTotals {
            pv: round1(self.monthly.pv[m]),
            grid: round1(self.monthly.grid[m]),
            load: round1(load),
            essential: round1(essential),
            total_load: round1(total_load),
            charge: round1(self.monthly.charge[m]),
            discharge: round1(self.monthly.discharge[m]),
            saved_kwh: round1(self.monthly.saved_kwh[m]),
            savings_vnd: round0(self.monthly.savings_vnd[m]),
        }
    }

    pub fn summarize_year(&self) -> FieldTotals {
        let mut totals = self.yearly_total;
        if totals.total_load == 0.0 && (totals.load != 0.0 || totals.essential != 0.0) {
            totals.total_load = round1(totals.load + totals.essential);
        }
        totals
    }
}

/// Directory-backed store: `{base_dir}/{device_id}/{year}.json`.
#[derive(Debug, Clone)]
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn device_dir(&self, device_id: &str) -> PathBuf {
        self.base_dir.join(device_id)
    }

    pub fn year_path(&self, device_id: &str, year: i32) -> PathBuf {
        self.device_dir(device_id).join(format!("{}.json", year))
    }

    /// Loads a year file, returning an empty well-formed cache when the
    /// file is missing or unreadable. No consistency repair happens here;
    /// see `load_repaired`.
    pub fn load(&self, device_id: &str, year: i32) -> YearCache {
        let path = self.year_path(device_id, year);
        if !path.exists() {
            return YearCache::default();
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cache) => cache,
                Err(err) => {
                    warn!("unparseable cache file {}: {}", path.display(), err);
                    YearCache::default()
                }
            },
            Err(err) => {
                warn!("error reading {}: {}", path.display(), err);
                YearCache::default()
            }
        }
    }

    /// Loads a year file and, when the monthly arrays look structurally
    /// inconsistent, repairs them with a full recompute. The repair is
    /// logged and reported so callers can observe it.
    pub fn load_repaired(&self, device_id: &str, year: i32, tariff: f64) -> (YearCache, bool) {
        let mut cache = self.load(device_id, year);
        if cache.needs_recompute() {
            info!(
                "repairing aggregates for {}/{}: monthly arrays look inconsistent",
                device_id, year
            );
            cache.recompute_aggregates(tariff);
            if let Err(err) = self.save(device_id, year, &cache) {
                warn!("best-effort save after repair failed: {}", err);
            }
            return (cache, true);
        }
        (cache, false)
    }

    pub fn save(&self, device_id: &str, year: i32, cache: &YearCache) -> Result<()> {
        let dir = self.device_dir(device_id);
        std::fs::create_dir_all(&dir)
            .map_err(|err| anyhow!("error creating {}: {}", dir.display(), err))?;

        let path = self.year_path(device_id, year);
        let content = serde_json::to_string_pretty(cache)?;
        std::fs::write(&path, content)
            .map_err(|err| anyhow!("error writing {}: {}", path.display(), err))?;
        Ok(())
    }

    pub fn purge_year(&self, device_id: &str, year: i32) -> bool {
        let path = self.year_path(device_id, year);
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => return true,
                Err(err) => warn!("failed to purge {}: {}", path.display(), err),
            }
        }
        false
    }

    /// Deletes every year file for a device, keeping the directory.
    pub fn purge_device(&self, device_id: &str) -> bool {
        let dir = self.device_dir(device_id);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return false,
        };

        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(err) => warn!("failed to delete {}: {}", path.display(), err),
                }
            }
        }
        deleted > 0
    }

    /// Years with a `{year}.json` file for this device, ascending.
    pub fn list_years(&self, device_id: &str) -> Vec<i32> {
        let mut years = Vec::new();
        if let Ok(entries) = std::fs::read_dir(self.device_dir(device_id)) {
            for entry in entries.flatten() {
                if let Some(year) = year_from_path(&entry.path()) {
                    years.push(year);
                }
            }
        }
        years.sort_unstable();
        years
    }

    /// Sum of every year's totals for a device.
    pub fn lifetime_totals(&self, device_id: &str) -> FieldTotals {
        let mut totals = FieldTotals::default();
        for year in self.list_years(device_id) {
            let cache = self.load(device_id, year);
            totals.add(&cache.summarize_year());
        }
        totals.rounded()
    }
}

fn year_from_path(path: &Path) -> Option<i32> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}
