use crate::prelude::*;

use crate::api::{Client, DayTotals, FetchResult};
use crate::stats::cache::{CacheStore, DailyRecord};
use crate::stats::optimizer;
use chrono::{Datelike, Days, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Spacing between day fetches when walking explicit date lists.
const RANGE_BASE_DELAY: Duration = Duration::from_millis(200);
/// Spacing for long scans, where throughput matters more.
const SCAN_BASE_DELAY: Duration = Duration::from_millis(100);
/// Ceiling for the error backoff on any strategy.
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Hard ceiling on an unbounded history walk, roughly 100 years.
const UNLIMITED_DAY_CEILING: u64 = 36600;

pub const DEFAULT_EMPTY_STREAK: usize = 14;
pub const GAPS_MAX_YEARS: u32 = 3;
pub const GAPS_MAX_DAYS_PER_RUN: usize = 60;
pub const EMPTY_DATES_MAX_YEARS: u32 = 5;
pub const EMPTY_DATES_MAX_DAYS_PER_RUN: usize = 100;
pub const SMART_BACKFILL_MAX_YEARS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackfillSummary {
    pub fetched: usize,
    pub empty: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EmptyDatesOutcome {
    pub recovered: usize,
    pub confirmed_empty: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmartBackfillStats {
    pub years_processed: usize,
    pub months_processed: usize,
    pub days_added: usize,
    pub days_updated: usize,
    pub years_with_data: Vec<i32>,
    pub errors: usize,
}

/// Orchestrates backfill and finalization: fetches day totals over HTTP and
/// persists them through the year cache store.
#[derive(Clone)]
pub struct Aggregator {
    api: Arc<Client>,
    store: CacheStore,
    device_id: String,
    tariff: f64,
    stop: Arc<AtomicBool>,
}

impl Aggregator {
    pub fn new(api: Arc<Client>, store: CacheStore, device_id: &str, tariff: f64) -> Self {
        Self {
            api,
            store,
            device_id: device_id.to_string(),
            tariff,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that lets another task request an early, clean exit. The
    /// current year file is saved before any strategy returns.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Fetches one day's totals, collapsing the three sub-fetches into a
    /// single result. Auth failures win over transient ones so callers can
    /// abort instead of hammering a dead token.
    async fn fetch_day_totals(&self, date: NaiveDate) -> FetchResult<DayTotals> {
        let stats = self.api.fetch_day(&self.device_id, date).await;

        if stats.any_auth_failure() {
            return Err(ApiError::Auth(format!("day fetch for {}", date)));
        }
        if stats.all_failed() {
            return Err(ApiError::Network(format!(
                "all day endpoints failed for {}",
                date
            )));
        }

        Ok(stats.totals())
    }

    /// Backfills an explicit list of dates, skipping any already cached.
    /// Returns how many days were written.
    pub async fn backfill_days(&self, dates: &[NaiveDate]) -> Result<usize> {
        let mut by_year: BTreeMap<i32, Vec<NaiveDate>> = BTreeMap::new();
        for date in dates {
            by_year.entry(date.year()).or_default().push(*date);
        }

        let mut filled = 0;
        let mut delay = RANGE_BASE_DELAY;

        for (year, days) in by_year {
            let mut cache = self.store.load(&self.device_id, year);
            let mut dirty = false;

            for date in days {
                if self.stopped() {
                    break;
                }
                if cache.daily.contains_key(&date) {
                    continue;
                }

                match self.fetch_day_totals(date).await {
                    Ok(totals) => {
                        cache.update_daily(date, DailyRecord::from_totals(&totals, self.tariff));
                        cache.meta.last_backfill_date = Some(date);
                        dirty = true;
                        filled += 1;
                        delay = RANGE_BASE_DELAY;
                    }
                    Err(err) if err.is_auth() => {
                        if dirty {
                            self.store.save(&self.device_id, year, &cache)?;
                        }
                        return Err(err.into());
                    }
                    Err(err) => {
                        delay = (delay * 2).min(BACKOFF_CAP);
                        warn!("error fetching {}: {}, backing off to {:?}", date, err, delay);
                        continue;
                    }
                }

                tokio::time::sleep(delay).await;
            }

            if dirty {
                self.store.save(&self.device_id, year, &cache)?;
            }
            if self.stopped() {
                break;
            }
        }

        Ok(filled)
    }

    /// Walks backwards from today, one day at a time, writing every fetched
    /// day into the cache. The server answers with a zero-filled structure
    /// for days it has nothing for, so zero days are stored too; they can be
    /// re-checked later via the empty-dates pass.
    ///
    /// With `max_years` set the walk covers exactly that span and ignores
    /// the empty streak. Unbounded walks stop after `empty_streak`
    /// consecutive zero days, with a hard day ceiling as a backstop.
    pub async fn backfill_all(
        &self,
        max_years: Option<u32>,
        empty_streak: usize,
    ) -> Result<BackfillSummary> {
        let today = Utc::now().date_naive();
        let ignore_streak = max_years.is_some();
        let limit_days = match max_years {
            Some(years) => u64::from(years) * 366,
            None => UNLIMITED_DAY_CEILING,
        };

        info!(
            "backfill started: device={}, limit={} days, empty_streak={}",
            self.device_id,
            limit_days,
            if ignore_streak {
                "ignored".to_string()
            } else {
                empty_streak.to_string()
            }
        );

        let mut summary = BackfillSummary::default();
        let mut streak = 0;
        let mut delay = SCAN_BASE_DELAY;

        let mut current_year: Option<i32> = None;
        let mut cache = None;

        for i in 0..limit_days {
            if self.stopped() {
                break;
            }

            let date = match today.checked_sub_days(Days::new(i)) {
                Some(date) => date,
                None => break,
            };
            let year = date.year();

            if current_year != Some(year) {
                if let (Some(prev), Some(prev_cache)) = (current_year, cache.as_ref()) {
                    self.store.save(&self.device_id, prev, prev_cache)?;
                    info!(
                        "year {} done: {} fetched, {} empty, {} skipped so far",
                        prev, summary.fetched, summary.empty, summary.skipped
                    );
                }
                cache = Some(self.store.load(&self.device_id, year));
                current_year = Some(year);
            }

            let year_cache = cache.as_mut().unwrap();

            if year_cache.daily.contains_key(&date) {
                streak = 0;
                summary.skipped += 1;
                continue;
            }

            match self.fetch_day_totals(date).await {
                Ok(totals) => {
                    let record = DailyRecord::from_totals(&totals, self.tariff);
                    let has_data = record.has_data();

                    year_cache.update_daily(date, record);
                    year_cache.meta.last_backfill_date = Some(date);
                    summary.fetched += 1;

                    if !has_data {
                        summary.empty += 1;
                    }

                    if !ignore_streak {
                        if has_data {
                            streak = 0;
                        } else {
                            streak += 1;
                            if streak >= empty_streak {
                                info!(
                                    "stopping at {}: {} consecutive empty days, assuming start of history",
                                    date, streak
                                );
                                break;
                            }
                        }
                    }

                    delay = SCAN_BASE_DELAY;
                }
                Err(err) if err.is_auth() => {
                    if let (Some(year), Some(year_cache)) = (current_year, cache.as_ref()) {
                        self.store.save(&self.device_id, year, year_cache)?;
                    }
                    return Err(err.into());
                }
                Err(err) => {
                    summary.errors += 1;
                    delay = (delay * 2).min(BACKOFF_CAP);
                    warn!("error fetching {}: {}, backing off to {:?}", date, err, delay);
                    continue;
                }
            }

            tokio::time::sleep(delay).await;
        }

        if let (Some(year), Some(year_cache)) = (current_year, cache.as_ref()) {
            self.store.save(&self.device_id, year, year_cache)?;
        }

        info!(
            "backfill completed: device={}, fetched={}, empty={}, skipped={}, errors={}",
            self.device_id, summary.fetched, summary.empty, summary.skipped, summary.errors
        );
        Ok(summary)
    }

    /// Fills missing days inside the last `max_years` calendar years, up to
    /// `max_days_per_run` fetches per invocation. Returns how many days were
    /// filled.
    pub async fn backfill_gaps(&self, max_years: u32, max_days_per_run: usize) -> Result<usize> {
        let today = Utc::now().date_naive();
        let mut filled = 0;
        let mut delay = RANGE_BASE_DELAY;

        for year_offset in 0..max_years {
            if filled >= max_days_per_run || self.stopped() {
                break;
            }

            let year = today.year() - year_offset as i32;
            let start = match NaiveDate::from_ymd_opt(year, 1, 1) {
                Some(date) => date,
                None => continue,
            };
            let end = if year == today.year() {
                today
            } else {
                match NaiveDate::from_ymd_opt(year, 12, 31) {
                    Some(date) => date,
                    None => continue,
                }
            };

            let mut cache = self.store.load(&self.device_id, year);
            let mut dirty = false;

            let mut date = start;
            while date <= end {
                if filled >= max_days_per_run || self.stopped() {
                    break;
                }

                if !cache.daily.contains_key(&date) {
                    match self.fetch_day_totals(date).await {
                        Ok(totals) => {
                            cache.update_daily(
                                date,
                                DailyRecord::from_totals(&totals, self.tariff),
                            );
                            cache.meta.last_backfill_date = Some(date);
                            dirty = true;
                            filled += 1;
                            delay = RANGE_BASE_DELAY;
                        }
                        Err(err) if err.is_auth() => {
                            if dirty {
                                self.store.save(&self.device_id, year, &cache)?;
                            }
                            return Err(err.into());
                        }
                        Err(err) => {
                            delay = (delay * 2).min(BACKOFF_CAP);
                            warn!(
                                "error fetching {}: {}, backing off to {:?}",
                                date, err, delay
                            );
                        }
                    }

                    tokio::time::sleep(delay).await;
                }

                date = match date.succ_opt() {
                    Some(next) => next,
                    None => break,
                };
            }

            if dirty {
                self.store.save(&self.device_id, year, &cache)?;
            }
        }

        Ok(filled)
    }

    /// Re-checks dates previously confirmed empty. Useful after parsing
    /// fixes: a date that now comes back with data is recovered into the
    /// daily map, otherwise its empty marker is confirmed.
    pub async fn backfill_empty_dates(
        &self,
        max_years: u32,
        max_days_per_run: usize,
    ) -> Result<EmptyDatesOutcome> {
        let today = Utc::now().date_naive();
        let mut outcome = EmptyDatesOutcome::default();
        let mut delay = SCAN_BASE_DELAY;

        for year_offset in 0..max_years {
            if outcome.recovered + outcome.confirmed_empty >= max_days_per_run || self.stopped() {
                break;
            }

            let year = today.year() - year_offset as i32;
            let mut cache = self.store.load(&self.device_id, year);
            let empty_dates: Vec<NaiveDate> = cache.meta.empty_dates.iter().copied().collect();
            if empty_dates.is_empty() {
                continue;
            }

            info!("re-checking {} empty dates in {}", empty_dates.len(), year);
            let mut dirty = false;

            for date in empty_dates {
                if outcome.recovered + outcome.confirmed_empty >= max_days_per_run
                    || self.stopped()
                {
                    break;
                }

                match self.fetch_day_totals(date).await {
                    Ok(totals) => {
                        let record = DailyRecord::from_totals(&totals, self.tariff);
                        if record.has_data() {
                            info!(
                                "recovered {}: pv={:.2}, grid={:.2}, load={:.2}",
                                date, record.pv, record.grid, record.load
                            );
                            cache.update_daily(date, record);
                            cache.meta.last_backfill_date = Some(date);
                            dirty = true;
                            outcome.recovered += 1;
                        } else {
                            debug!("confirmed empty {}", date);
                            outcome.confirmed_empty += 1;
                        }
                        delay = SCAN_BASE_DELAY;
                    }
                    Err(err) if err.is_auth() => {
                        if dirty {
                            self.store.save(&self.device_id, year, &cache)?;
                        }
                        return Err(err.into());
                    }
                    Err(err) => {
                        outcome.errors += 1;
                        delay = (delay * 2).min(BACKOFF_CAP);
                        warn!(
                            "error re-checking {}: {}, backing off to {:?}",
                            date, err, delay
                        );
                        continue;
                    }
                }

                tokio::time::sleep(delay).await;
            }

            if dirty {
                self.store.save(&self.device_id, year, &cache)?;
            }
        }

        info!(
            "empty-date recheck done: recovered={}, confirmed={}, errors={}",
            outcome.recovered, outcome.confirmed_empty, outcome.errors
        );
        Ok(outcome)
    }

    /// Bulk backfill: scans years via the year endpoint, then fills whole
    /// months via the month endpoint. Much cheaper than day-by-day walks
    /// since one call covers a month. Only missing days and cached zero days
    /// the bulk response has data for are written.
    pub async fn smart_backfill(
        &self,
        max_years: u32,
        optimize: bool,
    ) -> Result<SmartBackfillStats> {
        let today = Utc::now().date_naive();
        let mut stats = SmartBackfillStats::default();

        info!(
            "smart backfill started: device={}, max_years={}",
            self.device_id, max_years
        );

        // Pass 1: find months worth fetching.
        let mut months_by_year: BTreeMap<i32, Vec<u32>> = BTreeMap::new();
        for year_offset in 0..max_years {
            let year = today.year() - year_offset as i32;
            if year < 2000 {
                break;
            }

            match self.api.fetch_year(&self.device_id, year).await {
                Ok(bulk) => {
                    let months = bulk.months_with_data();
                    if !months.is_empty() {
                        debug!("year {} has data in months {:?}", year, months);
                        months_by_year.insert(year, months);
                    }
                }
                Err(err) if err.is_auth() => return Err(err.into()),
                Err(err) => {
                    debug!("year scan {} failed: {}", year, err);
                }
            }
        }

        stats.years_with_data = months_by_year.keys().copied().collect();
        info!("found data in {} years", months_by_year.len());

        // Pass 2: fill months, newest year first.
        for (&year, months) in months_by_year.iter().rev() {
            if self.stopped() {
                break;
            }

            let mut cache = self.store.load(&self.device_id, year);
            let mut dirty = false;

            for &month in months {
                if self.stopped() {
                    break;
                }

                let bulk = match self.api.fetch_month(&self.device_id, year, month).await {
                    Ok(bulk) => bulk,
                    Err(err) if err.is_auth() => {
                        if dirty {
                            cache.recompute_aggregates(self.tariff);
                            self.store.save(&self.device_id, year, &cache)?;
                        }
                        return Err(err.into());
                    }
                    Err(err) => {
                        warn!("month fetch {}-{:02} failed: {}", year, month, err);
                        stats.errors += 1;
                        continue;
                    }
                };

                let mut added = 0;
                let mut updated = 0;

                for day0 in 0..days_in_month(year, month) {
                    let date = match NaiveDate::from_ymd_opt(year, month, day0 as u32 + 1) {
                        Some(date) => date,
                        None => continue,
                    };

                    match cache.daily.get(&date) {
                        Some(existing) => {
                            // Replace only zero-data records the bulk
                            // response has real values for.
                            if !existing.has_data() && bulk.day_has_data(day0) {
                                updated += 1;
                            } else {
                                continue;
                            }
                        }
                        None => added += 1,
                    }

                    let record = DailyRecord::from_totals(&bulk.day(day0), self.tariff);
                    cache.update_daily(date, record);
                }

                if added > 0 || updated > 0 {
                    dirty = true;
                    stats.days_added += added;
                    stats.days_updated += updated;
                    stats.months_processed += 1;
                    debug!("month {}-{:02}: added {}, updated {}", year, month, added, updated);
                }

                tokio::time::sleep(SCAN_BASE_DELAY).await;
            }

            if dirty {
                cache.recompute_aggregates(self.tariff);
                self.store.save(&self.device_id, year, &cache)?;
                stats.years_processed += 1;
                info!("saved year {}", year);
            }
        }

        // Pass 3: move all-zero days into the empty-date set.
        if optimize {
            for &year in &stats.years_with_data {
                if let Err(err) =
                    optimizer::optimize_year(&self.store, &self.device_id, year, self.tariff)
                {
                    warn!("optimize pass for {} failed: {}", year, err);
                }
            }
        }

        info!(
            "smart backfill completed: {} years, {} months, {} added, {} updated, {} errors",
            stats.years_processed,
            stats.months_processed,
            stats.days_added,
            stats.days_updated,
            stats.errors
        );
        Ok(stats)
    }

    /// Finalizes a completed day: re-fetches it from the API and stores
    /// either the record or an empty-date marker. A day already in the
    /// daily map is left alone.
    pub async fn finalize_day(&self, date: NaiveDate) -> Result<bool> {
        let year = date.year();
        let (mut cache, _) = self.store.load_repaired(&self.device_id, year, self.tariff);

        if cache.daily.contains_key(&date) {
            debug!("{} already finalized", date);
            return Ok(false);
        }

        let totals = self.fetch_day_totals(date).await?;
        let record = DailyRecord::from_totals(&totals, self.tariff);

        if record.is_empty(self.tariff) {
            info!("{} has no data, marking empty", date);
            cache.mark_empty(date);
        } else {
            info!(
                "finalized {}: pv={:.1}, grid={:.1}, load={:.1}, saved={:.1}",
                date,
                record.pv,
                record.grid,
                record.total_load(),
                record.saved_kwh()
            );
            cache.update_daily(date, record);
            cache.meta.last_backfill_date = Some(date);
        }

        self.store.save(&self.device_id, year, &cache)?;
        Ok(true)
    }

    pub fn summarize_month(&self, year: i32, month: u32) -> crate::stats::cache::FieldTotals {
        let (cache, _) = self.store.load_repaired(&self.device_id, year, self.tariff);
        cache.summarize_month(month)
    }

    pub fn summarize_year(&self, year: i32) -> crate::stats::cache::FieldTotals {
        let (cache, _) = self.store.load_repaired(&self.device_id, year, self.tariff);
        cache.summarize_year()
    }
}

pub fn days_in_month(year: i32, month: u32) -> usize {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };

    match (NaiveDate::from_ymd_opt(year, month, 1), next) {
        (Some(first), Some(next)) => (next - first).num_days() as usize,
        _ => 0,
    }
}
