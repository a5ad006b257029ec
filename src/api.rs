use crate::prelude::*;

use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const URL_GET_SERVER_TIME: &str = "/lesvr/getServerTime";
const URL_SHARE_DEVICES: &str = "/lesvr/shareDevices";
const URL_DEVICE_MANAGE: &str = "/lesvr/deviceManage";
const URL_GET_OTHER_DAY_DATA: &str = "/lesvr/getOtherDayData";
const URL_GET_PV_DAY_DATA: &str = "/lesvr/getPVDayData";
const URL_GET_BAT_DAY_DATA: &str = "/lesvr/getBatDayData";
const URL_GET_YEAR_DATA: &str = "/lesvr/getYearData";
const URL_GET_MONTH_DATA: &str = "/lesvr/getMonthData";

const API_MAX_RETRIES: u32 = 3;
const API_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const API_RETRY_MAX_DELAY: Duration = Duration::from_secs(10);

const AUTH_MAX_RETRIES: u32 = 3;
const AUTH_RETRY_DELAY: Duration = Duration::from_millis(500);

pub const DEVICE_INFO_TTL: Duration = Duration::from_secs(3600);

/// Application-level response envelope shared by every endpoint except
/// getServerTime (which carries data without a returnValue).
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "returnValue")]
    return_value: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    #[serde(rename = "deviceType")]
    pub device_type: Option<String>,
    #[serde(rename = "controllerVersion")]
    pub controller_version: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// In-memory TTL cache for device info. Device metadata rarely changes, so
/// hits skip a round trip; expired entries are evicted on access.
pub struct DeviceInfoCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, DeviceInfo)>>,
}

impl DeviceInfoCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceInfo> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, (at, _)| at.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!("evicted {} expired device info entries", evicted);
        }
        entries.get(device_id).map(|(_, info)| info.clone())
    }

    pub fn insert(&self, device_id: &str, info: DeviceInfo) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(device_id.to_string(), (Instant::now(), info));
    }
}

/// Result of one of the three day-data sub-fetches. The error kind is kept
/// so the merge step can tell auth failures from transient ones.
pub type FetchResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, Default)]
pub struct PvDay {
    pub today_kwh: Option<f64>,
    pub hourly_kwh: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct BatteryDay {
    pub charge_today: Option<f64>,
    pub discharge_today: Option<f64>,
    pub charge_hourly_kwh: Vec<f64>,
    pub discharge_hourly_kwh: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct OtherDay {
    pub grid_today: Option<f64>,
    pub load_today: Option<f64>,
    pub essential_today: Option<f64>,
    pub total_load_today: Option<f64>,
    pub grid_hourly_kwh: Vec<f64>,
    pub load_hourly_kwh: Vec<f64>,
    pub essential_hourly_kwh: Vec<f64>,
    pub total_load_hourly_kwh: Vec<f64>,
}

/// One day's statistics, assembled from the three concurrent endpoint
/// calls. Sub-fetch failures are carried as-is; totals() substitutes zero.
#[derive(Debug)]
pub struct DayStats {
    pub date: NaiveDate,
    pub pv: FetchResult<PvDay>,
    pub battery: FetchResult<BatteryDay>,
    pub other: FetchResult<OtherDay>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DayTotals {
    pub pv: f64,
    pub grid: f64,
    pub load: f64,
    pub essential: f64,
    pub total_load: f64,
    pub charge: f64,
    pub discharge: f64,
}

impl DayStats {
    /// Best-effort union of the sub-fetches: a failed call contributes
    /// zeros instead of aborting the day.
    pub fn totals(&self) -> DayTotals {
        let mut t = DayTotals::default();

        match &self.pv {
            Ok(pv) => t.pv = pv.today_kwh.unwrap_or(0.0),
            Err(err) => warn!("pv day fetch missing for {}: {}", self.date, err),
        }

        match &self.battery {
            Ok(bat) => {
                t.charge = bat.charge_today.unwrap_or(0.0);
                t.discharge = bat.discharge_today.unwrap_or(0.0);
            }
            Err(err) => warn!("battery day fetch missing for {}: {}", self.date, err),
        }

        match &self.other {
            Ok(other) => {
                t.grid = other.grid_today.unwrap_or(0.0);
                t.load = other.load_today.unwrap_or(0.0);
                t.essential = other.essential_today.unwrap_or(0.0);
                t.total_load = other
                    .total_load_today
                    .unwrap_or(t.load + t.essential);
            }
            Err(err) => warn!("grid/load day fetch missing for {}: {}", self.date, err),
        }

        t
    }

    pub fn any_auth_failure(&self) -> bool {
        [
            self.pv.as_ref().err().map(ApiError::is_auth),
            self.battery.as_ref().err().map(ApiError::is_auth),
            self.other.as_ref().err().map(ApiError::is_auth),
        ]
        .iter()
        .any(|f| *f == Some(true))
    }

    pub fn all_failed(&self) -> bool {
        self.pv.is_err() && self.battery.is_err() && self.other.is_err()
    }
}

/// Bulk year response: one value per month per field, already scaled to kWh.
#[derive(Debug, Clone, Default)]
pub struct YearBulk {
    pub pv: [f64; 12],
    pub grid: [f64; 12],
    pub load: [f64; 12],
    pub essential: [f64; 12],
    pub charge: [f64; 12],
    pub discharge: [f64; 12],
}

impl YearBulk {
    /// Months (1-12) where any of pv/grid/load is nonzero.
    pub fn months_with_data(&self) -> Vec<u32> {
        (0..12)
            .filter(|&m| self.pv[m] > 0.0 || self.grid[m] > 0.0 || self.load[m] > 0.0)
            .map(|m| m as u32 + 1)
            .collect()
    }
}

/// Bulk month response: one value per day per field, scaled to kWh. Arrays
/// may be shorter than the month; missing days read as zero.
#[derive(Debug, Clone, Default)]
pub struct MonthBulk {
    pub pv: Vec<f64>,
    pub grid: Vec<f64>,
    pub load: Vec<f64>,
    pub essential: Vec<f64>,
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
}

impl MonthBulk {
    pub fn day(&self, day0: usize) -> DayTotals {
        let at = |v: &Vec<f64>| v.get(day0).copied().unwrap_or(0.0);
        let load = at(&self.load);
        let essential = at(&self.essential);
        DayTotals {
            pv: at(&self.pv),
            grid: at(&self.grid),
            load,
            essential,
            total_load: load + essential,
            charge: at(&self.charge),
            discharge: at(&self.discharge),
        }
    }

    pub fn day_has_data(&self, day0: usize) -> bool {
        let at = |v: &Vec<f64>| v.get(day0).copied().unwrap_or(0.0);
        at(&self.pv) > 0.0 || at(&self.grid) > 0.0 || at(&self.load) > 0.0
    }
}

pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
    device_info: DeviceInfoCache,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(Self::default_headers())
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
            device_info: DeviceInfoCache::new(DEVICE_INFO_TTL),
        })
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("versionCode", HeaderValue::from_static("1.6.3"));
        headers.insert("platform", HeaderValue::from_static("2"));
        headers.insert("wifiStatus", HeaderValue::from_static("1"));
        headers.insert(
            reqwest::header::USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (Linux; Android 10; SM-G970F) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.120 Mobile Safari/537.36",
            ),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers
    }

    pub fn set_token(&self, token: Option<String>) {
        let set = token.is_some();
        *self.token.lock().unwrap() = token;
        debug!("api token {}", if set { "set" } else { "cleared" });
    }

    fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    /// Core request wrapper: retries network and 5xx failures with capped
    /// exponential backoff, never retries auth or application errors.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, String)],
        form: &[(&str, String)],
        extra_headers: &[(&'static str, &'static str)],
        requires_auth: bool,
        check_return_value: bool,
    ) -> std::result::Result<Envelope, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        let auth = if requires_auth {
            match self.token() {
                Some(token) => Some(token),
                None => {
                    error!("token needed for {}", path);
                    return Err(ApiError::Auth("token required".to_string()));
                }
            }
        } else {
            None
        };

        let mut delay = API_RETRY_BASE_DELAY;
        let mut last_err = None;

        for attempt in 1..=API_MAX_RETRIES {
            let mut req = self.http.request(method.clone(), &url);
            if !query.is_empty() {
                req = req.query(query);
            }
            if !form.is_empty() {
                req = req.form(form);
            }
            for (name, value) in extra_headers {
                req = req.header(*name, *value);
            }
            if let Some(token) = &auth {
                req = req.header(reqwest::header::AUTHORIZATION, token);
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(err) => {
                    let err = ApiError::from(err);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    warn!(
                        "network error {} (attempt {}/{}): {}, retrying in {:?}",
                        url, attempt, API_MAX_RETRIES, err, delay
                    );
                    last_err = Some(err);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(API_RETRY_MAX_DELAY);
                    continue;
                }
            };

            let status = response.status();
            debug!("HTTP {} {}: {}", method, url, status);

            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(ApiError::Auth(format!("HTTP {} from {}", status, path)));
            }

            if status.is_server_error() {
                warn!(
                    "server error {} from {} (attempt {}/{}), retrying in {:?}",
                    status, url, attempt, API_MAX_RETRIES, delay
                );
                last_err = Some(ApiError::Network(format!("HTTP {}", status)));
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(API_RETRY_MAX_DELAY);
                continue;
            }

            let body = response
                .text()
                .await
                .map_err(|err| ApiError::Network(err.to_string()))?;

            let envelope: Envelope = serde_json::from_str(&body).map_err(|_| {
                let preview: String = body.chars().take(300).collect();
                error!("invalid JSON from {}: {}", url, preview);
                ApiError::Api(format!("invalid JSON from {}", path))
            })?;

            if !status.is_success() {
                return Err(ApiError::Api(format!("HTTP {} from {}", status, path)));
            }

            if check_return_value && envelope.return_value != Some(1) {
                let msg = envelope.msg.clone().unwrap_or_else(|| "Unknown".to_string());
                error!(
                    "api error {}: code={:?}, msg='{}'",
                    url, envelope.return_value, msg
                );
                if envelope.return_value == Some(203) {
                    return Err(ApiError::Auth(format!("code=203: {}", msg)));
                }
                return Err(ApiError::Api(format!(
                    "{} (code={:?})",
                    msg, envelope.return_value
                )));
            }

            return Ok(envelope);
        }

        Err(last_err
            .unwrap_or_else(|| ApiError::Network("request failed (unknown error)".to_string())))
    }

    async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Value, ApiError> {
        let envelope = self
            .request(reqwest::Method::GET, path, query, &[], &[], true, true)
            .await?;
        Ok(envelope.data.unwrap_or(Value::Null))
    }

    // auth {{{
    async fn get_server_time(&self) -> std::result::Result<i64, ApiError> {
        let envelope = self
            .request(
                reqwest::Method::GET,
                URL_GET_SERVER_TIME,
                &[],
                &[],
                &[],
                false,
                false,
            )
            .await?;

        envelope
            .data
            .as_ref()
            .and_then(|d| d.get("serverTime"))
            .and_then(value_as_i64)
            .ok_or_else(|| ApiError::Api("no serverTime in response".to_string()))
    }

    async fn get_token(
        &self,
        device_id: &str,
        server_time: i64,
    ) -> std::result::Result<String, ApiError> {
        let form = [
            ("deviceIds", device_id.to_string()),
            ("serverTime", server_time.to_string()),
        ];
        let envelope = self
            .request(
                reqwest::Method::POST,
                URL_SHARE_DEVICES,
                &[],
                &form,
                &[("source", "2")],
                false,
                true,
            )
            .await?;

        envelope
            .data
            .as_ref()
            .and_then(|d| d.get("token"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| ApiError::Auth("no token in response".to_string()))
    }

    /// Runs the server-time + token exchange and stores the token on the
    /// client. Retried a few times with a short fixed spacing.
    pub async fn authenticate(&self, device_id: &str) -> std::result::Result<String, ApiError> {
        info!("authenticating device {}", device_id);
        let mut last_err = None;

        for attempt in 1..=AUTH_MAX_RETRIES {
            let result = async {
                let server_time = self.get_server_time().await?;
                self.get_token(device_id, server_time).await
            }
            .await;

            match result {
                Ok(token) => {
                    info!("authentication successful for {}", device_id);
                    self.set_token(Some(token.clone()));
                    return Ok(token);
                }
                Err(err) => {
                    warn!("auth attempt {}/{} failed: {}", attempt, AUTH_MAX_RETRIES, err);
                    last_err = Some(err);
                }
            }

            if attempt < AUTH_MAX_RETRIES {
                tokio::time::sleep(AUTH_RETRY_DELAY).await;
            }
        }

        error!("authentication failed after {} attempts", AUTH_MAX_RETRIES);
        Err(last_err.unwrap_or_else(|| ApiError::Auth("authentication failed".to_string())))
    }
    // }}}

    pub async fn get_device_info(
        &self,
        device_id: &str,
    ) -> std::result::Result<DeviceInfo, ApiError> {
        if device_id.is_empty() {
            return Err(ApiError::Api("device id missing".to_string()));
        }

        if let Some(info) = self.device_info.get(device_id) {
            debug!("using cached device info for {}", device_id);
            return Ok(info);
        }

        let query = [("page", "1".to_string()), ("snName", device_id.to_string())];
        let envelope = self
            .request(
                reqwest::Method::POST,
                URL_DEVICE_MANAGE,
                &query,
                &[],
                &[],
                true,
                true,
            )
            .await?;

        let device = envelope
            .data
            .as_ref()
            .and_then(|d| d.get("devices"))
            .and_then(|d| d.as_array())
            .and_then(|list| list.first())
            .cloned()
            .ok_or_else(|| ApiError::Api(format!("device not found: {}", device_id)))?;

        let info: DeviceInfo = serde_json::from_value(device)
            .map_err(|err| ApiError::Api(format!("invalid device info: {}", err)))?;

        info!(
            "device info: id={:?}, type={:?}, controller={:?}",
            info.device_id, info.device_type, info.controller_version
        );

        self.device_info.insert(device_id, info.clone());
        Ok(info)
    }

    // day data {{{
    /// Fetches one day's statistics with the three endpoint calls running
    /// concurrently.
    pub async fn fetch_day(&self, device_id: &str, date: NaiveDate) -> DayStats {
        debug!("fetching daily stats for {} @ {}", device_id, date);

        let query_date = date.format("%Y-%m-%d").to_string();
        let params = [
            ("deviceId", device_id.to_string()),
            ("queryDate", query_date),
        ];

        let (pv, battery, other) = tokio::join!(
            self.fetch_pv_day(&params),
            self.fetch_battery_day(&params),
            self.fetch_other_day(&params),
        );

        DayStats {
            date,
            pv,
            battery,
            other,
        }
    }

    async fn fetch_pv_day(
        &self,
        params: &[(&str, String)],
    ) -> std::result::Result<PvDay, ApiError> {
        let data = self.get(URL_GET_PV_DAY_DATA, params).await?;
        let pv = data.get("pv").cloned().unwrap_or(Value::Null);

        let mut result = PvDay {
            today_kwh: table_value_kwh(&pv),
            hourly_kwh: Vec::new(),
        };

        let series_w = float_list(pv.get("tableValueInfo"));
        if !series_w.is_empty() {
            let kwh5 = series_5min_kwh(&series_w);
            result.hourly_kwh = series_hour_kwh(&kwh5);
            if result.today_kwh.is_none() {
                result.today_kwh = Some(kwh5.iter().sum());
            }
        }

        Ok(result)
    }

    async fn fetch_battery_day(
        &self,
        params: &[(&str, String)],
    ) -> std::result::Result<BatteryDay, ApiError> {
        let data = self.get(URL_GET_BAT_DAY_DATA, params).await?;

        let mut result = BatteryDay::default();

        if let Some(bats) = data.get("bats").and_then(|b| b.as_array()) {
            result.charge_today = bats.first().and_then(table_value_kwh_ref);
            result.discharge_today = bats.get(1).and_then(table_value_kwh_ref);
        }

        // The wire reports positive = discharge; internally positive =
        // charge, matching the realtime battery power convention.
        let series_w = float_list(data.get("tableValueInfo"));
        if !series_w.is_empty() {
            let inverted: Vec<f64> = series_w.iter().map(|w| -w).collect();
            let charge_w: Vec<f64> = inverted.iter().map(|w| w.max(0.0)).collect();
            let discharge_w: Vec<f64> = inverted.iter().map(|w| (-w).max(0.0)).collect();
            result.charge_hourly_kwh = series_hour_kwh(&series_5min_kwh(&charge_w));
            result.discharge_hourly_kwh = series_hour_kwh(&series_5min_kwh(&discharge_w));
        }

        Ok(result)
    }

    async fn fetch_other_day(
        &self,
        params: &[(&str, String)],
    ) -> std::result::Result<OtherDay, ApiError> {
        let data = self.get(URL_GET_OTHER_DAY_DATA, params).await?;

        let grid = data.get("grid").cloned().unwrap_or(Value::Null);
        let load = data.get("homeload").cloned().unwrap_or(Value::Null);
        let essential = data.get("essentialLoad").cloned().unwrap_or(Value::Null);

        let mut result = OtherDay {
            grid_today: table_value_kwh(&grid),
            load_today: table_value_kwh(&load),
            essential_today: table_value_kwh(&essential),
            ..Default::default()
        };

        if result.load_today.is_some() || result.essential_today.is_some() {
            result.total_load_today = Some(
                result.load_today.unwrap_or(0.0) + result.essential_today.unwrap_or(0.0),
            );
        }

        let grid_w = float_list(grid.get("tableValueInfo"));
        if !grid_w.is_empty() {
            result.grid_hourly_kwh = series_hour_kwh(&series_5min_kwh(&grid_w));
        }

        let load_w = float_list(load.get("tableValueInfo"));
        if !load_w.is_empty() {
            result.load_hourly_kwh = series_hour_kwh(&series_5min_kwh(&load_w));
        }

        let essential_w = float_list(essential.get("tableValueInfo"));
        if !essential_w.is_empty() {
            result.essential_hourly_kwh = series_hour_kwh(&series_5min_kwh(&essential_w));
        }

        if !load_w.is_empty() && !essential_w.is_empty() {
            let len = load_w.len().max(essential_w.len());
            let total_w: Vec<f64> = (0..len)
                .map(|i| {
                    load_w.get(i).copied().unwrap_or(0.0)
                        + essential_w.get(i).copied().unwrap_or(0.0)
                })
                .collect();
            let total_kwh5 = series_5min_kwh(&total_w);
            result.total_load_hourly_kwh = series_hour_kwh(&total_kwh5);
            if result.total_load_today.is_none() {
                result.total_load_today = Some(total_kwh5.iter().sum());
            }
        }

        Ok(result)
    }
    // }}}

    // bulk data {{{
    pub async fn fetch_year(
        &self,
        device_id: &str,
        year: i32,
    ) -> std::result::Result<YearBulk, ApiError> {
        debug!("fetching year data for {} @ {}", device_id, year);

        let params = [
            ("deviceId", device_id.to_string()),
            ("year", year.to_string()),
        ];
        let data = self.get(URL_GET_YEAR_DATA, &params).await?;

        if data.is_null() {
            return Err(ApiError::Api(format!("empty year data for {}", year)));
        }

        Ok(YearBulk {
            pv: monthly_array(&data, "pv"),
            grid: monthly_array(&data, "grid"),
            load: monthly_array(&data, "homeload"),
            essential: monthly_array(&data, "essentialLoad"),
            charge: monthly_array(&data, "bat"),
            discharge: monthly_array(&data, "batF"),
        })
    }

    pub async fn fetch_month(
        &self,
        device_id: &str,
        year: i32,
        month: u32,
    ) -> std::result::Result<MonthBulk, ApiError> {
        debug!("fetching month data for {} @ {}-{:02}", device_id, year, month);

        let params = [
            ("deviceId", device_id.to_string()),
            ("year", year.to_string()),
            ("month", month.to_string()),
        ];
        let data = self.get(URL_GET_MONTH_DATA, &params).await?;

        Ok(MonthBulk {
            pv: daily_array(&data, "pv"),
            grid: daily_array(&data, "grid"),
            load: daily_array(&data, "homeload"),
            essential: daily_array(&data, "essentialLoad"),
            charge: daily_array(&data, "bat"),
            discharge: daily_array(&data, "batF"),
        })
    }
    // }}}
}

// series helpers {{{

/// W samples at 5-minute intervals to kWh per sample.
pub fn series_5min_kwh(series_w: &[f64]) -> Vec<f64> {
    let factor = (5.0 / 60.0) / 1000.0;
    series_w.iter().map(|w| w * factor).collect()
}

/// Sums the 12 five-minute samples within each clock hour; always 24
/// buckets, zero-filled past the end of the series.
pub fn series_hour_kwh(series_kwh5: &[f64]) -> Vec<f64> {
    (0..24)
        .map(|h| {
            let start = h * 12;
            if start >= series_kwh5.len() {
                0.0
            } else {
                series_kwh5[start..(start + 12).min(series_kwh5.len())]
                    .iter()
                    .sum()
            }
        })
        .collect()
}

fn float_list(value: Option<&Value>) -> Vec<f64> {
    value
        .and_then(|v| v.as_array())
        .map(|list| list.iter().filter_map(value_as_f64).collect())
        .unwrap_or_default()
}

/// tableValue fields carry tenths of a kWh.
fn table_value_kwh(item: &Value) -> Option<f64> {
    item.get("tableValue").and_then(value_as_f64).map(|v| v / 10.0)
}

fn table_value_kwh_ref(item: &Value) -> Option<f64> {
    table_value_kwh(item)
}

fn monthly_array(data: &Value, key: &str) -> [f64; 12] {
    let mut out = [0.0; 12];
    let values = float_list(data.get(key).and_then(|item| item.get("tableValueInfo")));
    for (i, v) in values.iter().take(12).enumerate() {
        out[i] = v / 10.0;
    }
    out
}

fn daily_array(data: &Value, key: &str) -> Vec<f64> {
    float_list(data.get(key).and_then(|item| item.get("tableValueInfo")))
        .iter()
        .map(|v| v / 10.0)
        .collect()
}

/// Vendor responses mix numbers and numeric strings.
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
// }}}
