use chrono::NaiveDate;
use lumentree_bridge::api::DayTotals;
use lumentree_bridge::stats::cache::{CacheStore, DailyRecord, YearCache};

const TARIFF: f64 = 2900.0;

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn sample_totals() -> DayTotals {
    DayTotals {
        pv: 10.0,
        grid: 2.0,
        load: 5.0,
        essential: 3.0,
        total_load: 8.0,
        charge: 1.0,
        discharge: 0.5,
    }
}

#[test]
fn record_derivations() {
    let record = DailyRecord::from_totals(&sample_totals(), TARIFF);

    assert_eq!(record.total_load, Some(8.0));
    assert_eq!(record.saved_kwh, Some(6.0)); // 8.0 total load - 2.0 grid
    assert_eq!(record.savings_vnd, Some(17400.0)); // 6.0 * 2900
}

#[test]
fn update_daily_rolls_up() {
    let mut cache = YearCache::default();
    let day = date("2025-03-15");

    cache.update_daily(day, DailyRecord::from_totals(&sample_totals(), TARIFF));

    assert_eq!(cache.monthly.pv[2], 10.0);
    assert_eq!(cache.monthly.saved_kwh[2], 6.0);
    assert_eq!(cache.monthly.savings_vnd[2], 17400.0);
    assert_eq!(cache.yearly_total.pv, 10.0);
    assert_eq!(cache.yearly_total.savings_vnd, 17400.0);
    assert_eq!(cache.meta.coverage.earliest, Some(day));
    assert_eq!(cache.meta.coverage.latest, Some(day));
}

#[test]
fn update_daily_is_idempotent() {
    let mut cache = YearCache::default();
    let day = date("2025-03-15");
    let record = DailyRecord::from_totals(&sample_totals(), TARIFF);

    cache.update_daily(day, record.clone());
    let first = cache.clone();
    cache.update_daily(day, record);

    assert_eq!(cache, first);
}

#[test]
fn incremental_matches_full_recompute() {
    let mut incremental = YearCache::default();
    for day in 1..=20 {
        let mut totals = sample_totals();
        totals.pv += day as f64;
        let date = NaiveDate::from_ymd_opt(2025, 1 + (day % 3), day).unwrap();
        incremental.update_daily(date, DailyRecord::from_totals(&totals, TARIFF));
    }

    let mut recomputed = incremental.clone();
    recomputed.recompute_aggregates(TARIFF);

    assert_eq!(incremental.monthly, recomputed.monthly);
    assert_eq!(incremental.yearly_total, recomputed.yearly_total);
}

#[test]
fn daily_and_empty_dates_are_mutually_exclusive() {
    let mut cache = YearCache::default();
    let day = date("2025-06-01");

    cache.mark_empty(day);
    assert!(cache.meta.empty_dates.contains(&day));

    cache.update_daily(day, DailyRecord::from_totals(&sample_totals(), TARIFF));
    assert!(!cache.meta.empty_dates.contains(&day));
    assert!(cache.daily.contains_key(&day));
}

#[test]
fn legacy_records_derive_without_mutation() {
    let record = DailyRecord {
        pv: 4.0,
        grid: 1.0,
        load: 2.0,
        essential: 1.5,
        total_load: None,
        charge: 0.0,
        discharge: 0.0,
        saved_kwh: None,
        savings_vnd: None,
    };

    assert_eq!(record.total_load(), 3.5);
    assert_eq!(record.saved_kwh(), 2.5);
    assert_eq!(record.savings_vnd(TARIFF), 7250.0);
    // Accessors must not backfill the stored fields.
    assert_eq!(record.total_load, None);
    assert_eq!(record.saved_kwh, None);
}

#[test]
fn summaries_fall_back_to_load_plus_essential() {
    let mut cache = YearCache::default();
    cache.monthly.load[0] = 3.0;
    cache.monthly.essential[0] = 2.0;

    let month = cache.summarize_month(1);
    assert_eq!(month.total_load, 5.0);
}

#[test]
fn detects_broken_monthly_arrays() {
    let mut cache = YearCache::default();
    cache.update_daily(
        date("2025-01-05"),
        DailyRecord::from_totals(&sample_totals(), TARIFF),
    );

    assert!(!cache.needs_recompute());

    // The known artifact: first eleven buckets all share one nonzero value.
    cache.monthly.pv = [7.0; 12];
    cache.monthly.pv[11] = 0.0;
    assert!(cache.needs_recompute());
}

#[test]
fn store_round_trips_and_repairs() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());

    // Missing file loads as an empty well-formed cache.
    let empty = store.load("dev1", 2025);
    assert!(empty.daily.is_empty());

    let mut cache = YearCache::default();
    cache.update_daily(
        date("2025-03-15"),
        DailyRecord::from_totals(&sample_totals(), TARIFF),
    );
    store.save("dev1", 2025, &cache).unwrap();

    let loaded = store.load("dev1", 2025);
    assert_eq!(loaded, cache);

    // Corrupt the monthly arrays; load_repaired fixes and reports it.
    let mut broken = cache.clone();
    broken.monthly.pv = [9.9; 12];
    broken.monthly.pv[11] = 0.0;
    store.save("dev1", 2025, &broken).unwrap();

    let (repaired, was_repaired) = store.load_repaired("dev1", 2025, TARIFF);
    assert!(was_repaired);
    assert_eq!(repaired.monthly, cache.monthly);

    // And the repair was persisted.
    let (_, repaired_again) = store.load_repaired("dev1", 2025, TARIFF);
    assert!(!repaired_again);
}

#[test]
fn lifetime_totals_span_years() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());

    for year in [2024, 2025] {
        let mut cache = YearCache::default();
        let day = NaiveDate::from_ymd_opt(year, 5, 1).unwrap();
        cache.update_daily(day, DailyRecord::from_totals(&sample_totals(), TARIFF));
        store.save("dev1", year, &cache).unwrap();
    }

    assert_eq!(store.list_years("dev1"), vec![2024, 2025]);

    let lifetime = store.lifetime_totals("dev1");
    assert_eq!(lifetime.pv, 20.0);
    assert_eq!(lifetime.savings_vnd, 34800.0);

    assert!(store.purge_year("dev1", 2024));
    assert_eq!(store.list_years("dev1"), vec![2025]);
}
