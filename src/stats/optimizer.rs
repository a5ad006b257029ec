use crate::prelude::*;

use crate::stats::cache::{CacheStore, DailyRecord, YearCache};
use chrono::NaiveDate;

/// All six energy fields exactly zero. Records are rounded on write, so an
/// exact comparison is safe here.
pub fn is_empty_day(record: &DailyRecord) -> bool {
    record.pv == 0.0
        && record.grid == 0.0
        && record.load == 0.0
        && record.essential == 0.0
        && record.charge == 0.0
        && record.discharge == 0.0
}

/// Moves all-zero days out of the daily map and into the empty-date set,
/// then rebuilds the aggregates. Returns how many days were moved.
pub fn normalize(cache: &mut YearCache, tariff: f64) -> usize {
    let empty: Vec<NaiveDate> = cache
        .daily
        .iter()
        .filter(|(_, record)| is_empty_day(record))
        .map(|(date, _)| *date)
        .collect();

    for date in &empty {
        cache.daily.remove(date);
        cache.meta.empty_dates.insert(*date);
    }

    if !empty.is_empty() {
        cache.recompute_aggregates(tariff);
    }

    empty.len()
}

/// Normalizes one year file on disk. A year with nothing to remove is left
/// untouched.
pub fn optimize_year(store: &CacheStore, device_id: &str, year: i32, tariff: f64) -> Result<usize> {
    let mut cache = store.load(device_id, year);
    if cache.daily.is_empty() && cache.meta.empty_dates.is_empty() {
        return Ok(0);
    }

    let removed = normalize(&mut cache, tariff);
    if removed > 0 {
        store.save(device_id, year, &cache)?;
        info!(
            "optimized {}/{}: moved {} empty days, kept {}",
            device_id,
            year,
            removed,
            cache.daily.len()
        );
    }

    Ok(removed)
}

/// Runs the optimizer over every cached year for a device.
pub fn optimize_device(store: &CacheStore, device_id: &str, tariff: f64) -> Result<usize> {
    let mut removed = 0;
    for year in store.list_years(device_id) {
        removed += optimize_year(store, device_id, year, tariff)?;
    }
    Ok(removed)
}
