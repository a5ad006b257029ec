use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Utc};
use mockito::Matcher;

use lumentree_bridge::api::Client;
use lumentree_bridge::stats::cache::{CacheStore, DailyRecord, YearCache};
use lumentree_bridge::stats::Aggregator;

const TARIFF: f64 = 2900.0;

fn aggregator(server: &mockito::Server, dir: &Path) -> Aggregator {
    let api = Arc::new(Client::new(&server.url(), Duration::from_secs(5)).unwrap());
    api.set_token(Some("tok-1".to_string()));
    Aggregator::new(api, CacheStore::new(dir), "dev1", TARIFF)
}

async fn mock_day_endpoints(server: &mut mockito::Server, pv: &str, other: &str) {
    server
        .mock("GET", "/lesvr/getPVDayData")
        .match_query(Matcher::Any)
        .with_body(pv.to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/lesvr/getBatDayData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":1,"data":{}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/lesvr/getOtherDayData")
        .match_query(Matcher::Any)
        .with_body(other.to_string())
        .create_async()
        .await;
}

#[tokio::test]
async fn backfill_all_stops_after_empty_streak() {
    let mut server = mockito::Server::new_async().await;

    // Every day the server knows nothing about comes back as a zero-filled
    // success, so the walk has to stop on the streak, not on errors.
    mock_day_endpoints(
        &mut server,
        r#"{"returnValue":1,"data":{}}"#,
        r#"{"returnValue":1,"data":{}}"#,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(&server, dir.path());

    let summary = agg.backfill_all(None, 3).await.unwrap();

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.empty, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn backfill_all_skips_cached_days() {
    let mut server = mockito::Server::new_async().await;
    mock_day_endpoints(
        &mut server,
        r#"{"returnValue":1,"data":{}}"#,
        r#"{"returnValue":1,"data":{}}"#,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(&server, dir.path());

    // Today is already cached, so the walk starts fetching at yesterday.
    let today = Utc::now().date_naive();
    let mut cache = YearCache::default();
    cache.update_daily(
        today,
        DailyRecord {
            pv: 4.0,
            ..Default::default()
        },
    );
    agg.store().save("dev1", today.year(), &cache).unwrap();

    let summary = agg.backfill_all(None, 2).await.unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.fetched, 2);
    assert_eq!(summary.empty, 2);
}

#[tokio::test]
async fn empty_date_recheck_recovers_data() {
    let mut server = mockito::Server::new_async().await;
    mock_day_endpoints(
        &mut server,
        r#"{"returnValue":1,"data":{"pv":{"tableValue":50}}}"#,
        r#"{"returnValue":1,"data":{
            "grid":{"tableValue":10},
            "homeload":{"tableValue":20},
            "essentialLoad":{"tableValue":10}
        }}"#,
    )
    .await;

    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(&server, dir.path());

    let year = Utc::now().year();
    let date = NaiveDate::from_ymd_opt(year, 1, 15).unwrap();
    let mut cache = YearCache::default();
    cache.mark_empty(date);
    agg.store().save("dev1", year, &cache).unwrap();

    let outcome = agg.backfill_empty_dates(1, 10).await.unwrap();

    assert_eq!(outcome.recovered, 1);
    assert_eq!(outcome.confirmed_empty, 0);
    assert_eq!(outcome.errors, 0);

    let saved = agg.store().load("dev1", year);
    assert!(saved.meta.empty_dates.is_empty());
    assert_eq!(saved.daily[&date].pv, 5.0);
    assert_eq!(saved.daily[&date].total_load, Some(3.0));
}

#[tokio::test]
async fn smart_backfill_fills_months_and_replaces_zero_days() {
    let mut server = mockito::Server::new_async().await;

    // Year scan: data only in June.
    server
        .mock("GET", "/lesvr/getYearData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "pv":{"tableValueInfo":[0,0,0,0,0,300,0,0,0,0,0,0]},
                "grid":{"tableValueInfo":[0,0,0,0,0,0,0,0,0,0,0,0]},
                "homeload":{"tableValueInfo":[0,0,0,0,0,0,0,0,0,0,0,0]}
            }}"#,
        )
        .create_async()
        .await;
    // June: the first two days carry data.
    server
        .mock("GET", "/lesvr/getMonthData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "pv":{"tableValueInfo":[10,20]},
                "grid":{"tableValueInfo":[0,0]},
                "homeload":{"tableValueInfo":[0,0]},
                "essentialLoad":{"tableValueInfo":[0,0]},
                "bat":{"tableValueInfo":[0,0]},
                "batF":{"tableValueInfo":[0,0]}
            }}"#,
        )
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(&server, dir.path());

    // June 1st is cached as a zero-data day; the bulk response has real
    // values for it, so it must be replaced rather than skipped.
    let year = Utc::now().year();
    let june1 = NaiveDate::from_ymd_opt(year, 6, 1).unwrap();
    let mut cache = YearCache::default();
    cache.update_daily(june1, DailyRecord::default());
    agg.store().save("dev1", year, &cache).unwrap();

    let stats = agg.smart_backfill(1, false).await.unwrap();

    assert_eq!(stats.years_with_data, vec![year]);
    assert_eq!(stats.years_processed, 1);
    assert_eq!(stats.months_processed, 1);
    assert_eq!(stats.days_updated, 1);
    assert_eq!(stats.days_added, 29);
    assert_eq!(stats.errors, 0);

    let saved = agg.store().load("dev1", year);
    assert_eq!(saved.daily[&june1].pv, 1.0);
    let june2 = NaiveDate::from_ymd_opt(year, 6, 2).unwrap();
    assert_eq!(saved.daily[&june2].pv, 2.0);
    assert_eq!(saved.monthly.pv[5], 3.0);
}
