use chrono::NaiveDate;
use lumentree_bridge::api::MonthBulk;
use lumentree_bridge::stats::aggregator::days_in_month;
use lumentree_bridge::stats::cache::{CacheStore, DailyRecord, YearCache};
use lumentree_bridge::stats::{migrate, optimizer};

const TARIFF: f64 = 2900.0;

#[test]
fn month_bulk_day_mapping() {
    let bulk = MonthBulk {
        pv: vec![10.0, 0.0],
        grid: vec![2.0, 0.0],
        load: vec![5.0, 0.0],
        essential: vec![3.0, 0.0],
        charge: vec![1.0, 0.0],
        discharge: vec![0.5, 0.0],
    };

    let day = bulk.day(0);
    assert_eq!(day.pv, 10.0);
    assert_eq!(day.total_load, 8.0);
    assert!(bulk.day_has_data(0));
    assert!(!bulk.day_has_data(1));

    // Past the end of the arrays everything reads as zero.
    let missing = bulk.day(30);
    assert_eq!(missing.pv, 0.0);
    assert!(!bulk.day_has_data(30));
}

#[test]
fn bulk_fill_matches_incremental_aggregates() {
    let days = 10;
    let bulk = MonthBulk {
        pv: (0..days).map(|d| d as f64 + 1.0).collect(),
        grid: vec![2.0; days],
        load: vec![5.0; days],
        essential: vec![3.0; days],
        charge: vec![1.0; days],
        discharge: vec![0.5; days],
    };

    let mut incremental = YearCache::default();
    for day0 in 0..days {
        let date = NaiveDate::from_ymd_opt(2025, 4, day0 as u32 + 1).unwrap();
        incremental.update_daily(date, DailyRecord::from_totals(&bulk.day(day0), TARIFF));
    }

    let mut recomputed = incremental.clone();
    recomputed.recompute_aggregates(TARIFF);

    assert_eq!(incremental.monthly, recomputed.monthly);
    assert_eq!(incremental.yearly_total, recomputed.yearly_total);
    assert_eq!(incremental.monthly.pv[3], 55.0); // 1+2+..+10
}

#[test]
fn optimizer_moves_empty_days() {
    let real = DailyRecord {
        pv: 4.0,
        grid: 1.0,
        ..Default::default()
    };

    let mut cache = YearCache::default();
    cache.update_daily(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(), real);
    cache.update_daily(
        NaiveDate::from_ymd_opt(2025, 2, 2).unwrap(),
        DailyRecord::default(),
    );
    cache.update_daily(
        NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
        DailyRecord::default(),
    );

    let moved = optimizer::normalize(&mut cache, TARIFF);

    assert_eq!(moved, 2);
    assert_eq!(cache.daily.len(), 1);
    assert_eq!(cache.meta.empty_dates.len(), 2);
    assert_eq!(cache.monthly.pv[1], 4.0);
}

#[test]
fn optimize_year_persists() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());

    let mut cache = YearCache::default();
    cache.update_daily(
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        DailyRecord {
            pv: 2.0,
            ..Default::default()
        },
    );
    cache.update_daily(
        NaiveDate::from_ymd_opt(2025, 7, 2).unwrap(),
        DailyRecord::default(),
    );
    store.save("dev1", 2025, &cache).unwrap();

    let removed = optimizer::optimize_year(&store, "dev1", 2025, TARIFF).unwrap();
    assert_eq!(removed, 1);

    let loaded = store.load("dev1", 2025);
    assert_eq!(loaded.daily.len(), 1);
    assert_eq!(loaded.meta.empty_dates.len(), 1);
}

#[test]
fn migration_fills_total_load_with_backup() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());

    // A pre-total_load file: records carry only the base fields.
    let mut cache = YearCache::default();
    let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
    cache.daily.insert(
        day,
        DailyRecord {
            pv: 6.0,
            grid: 1.0,
            load: 2.0,
            essential: 1.0,
            ..Default::default()
        },
    );
    cache.monthly.load[5] = 2.0;
    cache.monthly.essential[5] = 1.0;
    cache.yearly_total.load = 2.0;
    cache.yearly_total.essential = 1.0;
    store.save("dev1", 2024, &cache).unwrap();

    let migrated = migrate::migrate_device(&store, "dev1").unwrap();
    assert_eq!(migrated, 1);

    let backup = store.year_path("dev1", 2024).with_extension("json.backup");
    assert!(backup.exists());

    let loaded = store.load("dev1", 2024);
    assert_eq!(loaded.daily[&day].total_load, Some(3.0));
    assert_eq!(loaded.monthly.total_load[5], 3.0);
    assert_eq!(loaded.yearly_total.total_load, 3.0);

    // Re-running is a no-op and must not overwrite the backup.
    let again = migrate::migrate_device(&store, "dev1").unwrap();
    assert_eq!(again, 0);
}

#[test]
fn month_lengths() {
    assert_eq!(days_in_month(2025, 1), 31);
    assert_eq!(days_in_month(2025, 2), 28);
    assert_eq!(days_in_month(2024, 2), 29);
    assert_eq!(days_in_month(2025, 12), 31);
}
