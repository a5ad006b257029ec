use std::time::Duration;

use chrono::NaiveDate;
use mockito::Matcher;

use lumentree_bridge::api::{series_5min_kwh, series_hour_kwh, Client};
use lumentree_bridge::error::ApiError;

fn client(server: &mockito::Server) -> Client {
    Client::new(&server.url(), Duration::from_secs(5)).unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

#[tokio::test]
async fn authenticate_exchanges_server_time_for_token() {
    let mut server = mockito::Server::new_async().await;

    let time_mock = server
        .mock("GET", "/lesvr/getServerTime")
        .with_body(r#"{"data":{"serverTime":"1700000000"}}"#)
        .create_async()
        .await;
    let token_mock = server
        .mock("POST", "/lesvr/shareDevices")
        .match_header("source", "2")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("deviceIds".into(), "H12345678".into()),
            Matcher::UrlEncoded("serverTime".into(), "1700000000".into()),
        ]))
        .with_body(r#"{"returnValue":1,"data":{"token":"tok-1"}}"#)
        .create_async()
        .await;

    let client = client(&server);
    let token = client.authenticate("H12345678").await.unwrap();

    assert_eq!(token, "tok-1");
    time_mock.assert_async().await;
    token_mock.assert_async().await;
}

#[tokio::test]
async fn missing_token_fails_before_any_request() {
    let server = mockito::Server::new_async().await;
    let client = client(&server);

    let err = client.fetch_year("H12345678", 2025).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn return_value_203_maps_to_auth_error() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/lesvr/getYearData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":203,"msg":"token expired"}"#)
        .expect(1) // application errors are not retried
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let err = client.fetch_year("H12345678", 2025).await.unwrap_err();
    assert!(err.is_auth());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_errors_are_retried_then_reported() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("GET", "/lesvr/getYearData")
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(3)
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let err = client.fetch_year("H12345678", 2025).await.unwrap_err();
    assert!(matches!(err, ApiError::Network(_)));
    assert!(err.is_transient());
    mock.assert_async().await;
}

#[tokio::test]
async fn day_merge_treats_empty_success_as_zeros() {
    let mut server = mockito::Server::new_async().await;

    // tableValue fields carry tenths of a kWh, sometimes as strings.
    server
        .mock("GET", "/lesvr/getPVDayData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":1,"data":{"pv":{"tableValue":"150"}}}"#)
        .create_async()
        .await;
    // A successful response without data is a day with nothing recorded,
    // not a failure.
    server
        .mock("GET", "/lesvr/getBatDayData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":1,"msg":"no record"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/lesvr/getOtherDayData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "grid":{"tableValue":20},
                "homeload":{"tableValue":50},
                "essentialLoad":{"tableValue":30}
            }}"#,
        )
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let day = client.fetch_day("H12345678", date("2025-06-01")).await;

    assert!(day.battery.is_ok());
    assert!(!day.all_failed());
    assert!(!day.any_auth_failure());

    let totals = day.totals();
    assert_eq!(totals.pv, 15.0);
    assert_eq!(totals.grid, 2.0);
    assert_eq!(totals.load, 5.0);
    assert_eq!(totals.essential, 3.0);
    assert_eq!(totals.total_load, 8.0);
    assert_eq!(totals.charge, 0.0);
    assert_eq!(totals.discharge, 0.0);
}

#[tokio::test]
async fn day_merge_carries_endpoint_errors() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/lesvr/getPVDayData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":1,"data":{"pv":{"tableValue":80}}}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/lesvr/getBatDayData")
        .match_query(Matcher::Any)
        .with_body(r#"{"returnValue":0,"msg":"system busy"}"#)
        .expect(1) // application errors are not retried
        .create_async()
        .await;
    server
        .mock("GET", "/lesvr/getOtherDayData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "grid":{"tableValue":10},
                "homeload":{"tableValue":20},
                "essentialLoad":{"tableValue":10}
            }}"#,
        )
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let day = client.fetch_day("H12345678", date("2025-06-01")).await;

    assert!(day.battery.is_err());
    assert!(!day.all_failed());
    assert!(!day.any_auth_failure());

    // The failed sub-fetch contributes zeros; the rest come through.
    let totals = day.totals();
    assert_eq!(totals.pv, 8.0);
    assert_eq!(totals.grid, 1.0);
    assert_eq!(totals.total_load, 3.0);
    assert_eq!(totals.charge, 0.0);
    assert_eq!(totals.discharge, 0.0);
}

#[tokio::test]
async fn month_data_scales_tenths_to_kwh() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/lesvr/getMonthData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "pv":{"tableValueInfo":[10,25,0]},
                "grid":{"tableValueInfo":[5,0,0]},
                "homeload":{"tableValueInfo":[8,8,0]},
                "essentialLoad":{"tableValueInfo":[2,2,0]},
                "bat":{"tableValueInfo":[1,1,0]},
                "batF":{"tableValueInfo":[0,1,0]}
            }}"#,
        )
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let month = client.fetch_month("H12345678", 2025, 6).await.unwrap();
    assert_eq!(month.pv, vec![1.0, 2.5, 0.0]);
    assert_eq!(month.day(0).total_load, 1.0);
    assert!(month.day_has_data(1));
    assert!(!month.day_has_data(2));
}

#[tokio::test]
async fn year_data_reports_months_with_data() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/lesvr/getYearData")
        .match_query(Matcher::Any)
        .with_body(
            r#"{"returnValue":1,"data":{
                "pv":{"tableValueInfo":[0,120,0,0,0,0,0,0,0,0,0,35]},
                "grid":{"tableValueInfo":[0,0,0,0,0,0,0,0,0,0,0,0]},
                "homeload":{"tableValueInfo":[0,0,0,40,0,0,0,0,0,0,0,0]}
            }}"#,
        )
        .create_async()
        .await;

    let client = client(&server);
    client.set_token(Some("tok-1".to_string()));

    let year = client.fetch_year("H12345678", 2025).await.unwrap();
    assert_eq!(year.pv[1], 12.0);
    assert_eq!(year.months_with_data(), vec![2, 4, 12]);
}

#[test]
fn hourly_buckets_from_5min_samples() {
    // 24 samples of 600 W at 5-minute spacing cover the first two hours.
    let kwh5 = series_5min_kwh(&[600.0; 24]);
    assert!((kwh5[0] - 0.05).abs() < 1e-9);

    let hourly = series_hour_kwh(&kwh5);
    assert_eq!(hourly.len(), 24);
    assert!((hourly[0] - 0.6).abs() < 1e-9);
    assert!((hourly[1] - 0.6).abs() < 1e-9);
    assert_eq!(hourly[2], 0.0);
}
