use crate::prelude::*;

use crate::api::Client;
use crate::mqtt::ReadingEvent;
use crate::stats::aggregator::Aggregator;
use crate::stats::cache::{CacheStore, DailyRecord, FieldTotals};
use crate::stats::migrate;
use chrono::{Datelike, NaiveDate, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Snapshot(StatsSnapshot),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

/// Today's statistics plus the chart arrays, published every refresh and
/// retained for the query surface.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub date: NaiveDate,
    pub today: DailyRecord,
    pub pv_hourly_kwh: Vec<f64>,
    pub grid_hourly_kwh: Vec<f64>,
    pub load_hourly_kwh: Vec<f64>,
    pub charge_hourly_kwh: Vec<f64>,
    pub discharge_hourly_kwh: Vec<f64>,
    pub month: FieldTotals,
    pub year: FieldTotals,
}

#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    api: Arc<Client>,
    aggregator: Aggregator,
    latest: Arc<Mutex<Option<StatsSnapshot>>>,
    last_date: Arc<Mutex<Option<NaiveDate>>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Result<Self> {
        let api = Arc::new(Client::new(
            config.api().base_url(),
            Duration::from_secs(config.api().timeout_secs()),
        )?);

        let store = CacheStore::new(config.stats().cache_dir());
        let aggregator = Aggregator::new(
            api.clone(),
            store,
            config.device().id(),
            config.stats().tariff_vnd_per_kwh(),
        );

        Ok(Self {
            config,
            channels,
            api,
            aggregator,
            latest: Arc::new(Mutex::new(None)),
            last_date: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn start(&self) -> Result<()> {
        if self.config.api().enabled() {
            futures::try_join!(self.stats_loop(), self.reading_receiver())?;
        } else {
            info!("api disabled, skipping stats coordinator");
            self.reading_receiver().await?;
        }

        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.stats.send(ChannelData::Shutdown);
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    // query surface {{{
    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.latest.lock().unwrap().clone()
    }

    pub fn summarize_month(&self, year: i32, month: u32) -> FieldTotals {
        self.aggregator.summarize_month(year, month)
    }

    pub fn summarize_year(&self, year: i32) -> FieldTotals {
        self.aggregator.summarize_year(year)
    }

    pub fn lifetime_totals(&self) -> FieldTotals {
        self.aggregator
            .store()
            .lifetime_totals(self.config.device().id())
    }
    // }}}

    /// Fetches today's stats on the configured interval, finalizing the
    /// previous day when the date rolls over.
    async fn stats_loop(&self) -> Result<()> {
        let device = self.config.device();

        self.api.authenticate(device.id()).await?;

        if let Err(err) = migrate::migrate_device(self.aggregator.store(), device.id()) {
            warn!("cache migration failed: {}", err);
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.stats().daily_interval_secs(),
        ));
        let mut control = self.channels.stats.subscribe();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = self.refresh().await {
                        warn!("stats refresh failed: {}", err);
                    }
                }

                message = control.recv() => {
                    if let Ok(ChannelData::Shutdown) = message {
                        info!("stats coordinator shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// One refresh pass. Transient failures keep the previous snapshot so
    /// the query surface stays stale-but-present.
    async fn refresh(&self) -> Result<()> {
        let device = self.config.device();
        let tariff = self.config.stats().tariff_vnd_per_kwh();
        let today = Utc::now().date_naive();

        let previous = self.last_date.lock().unwrap().replace(today);
        if let Some(prev) = previous {
            if prev != today {
                if let Err(err) = self.aggregator.finalize_day(prev).await {
                    warn!("failed to finalize {}: {}", prev, err);
                }
            }
        }

        let stats = self.api.fetch_day(device.id(), today).await;

        if stats.any_auth_failure() {
            warn!("token rejected, re-authenticating");
            self.api.authenticate(device.id()).await?;
            return Ok(());
        }
        if stats.all_failed() {
            warn!("all day endpoints failed, keeping previous snapshot");
            return Ok(());
        }

        let today_record = DailyRecord::from_totals(&stats.totals(), tariff);

        let pv_hourly_kwh = stats
            .pv
            .as_ref()
            .map(|pv| pv.hourly_kwh.clone())
            .unwrap_or_default();
        let (charge_hourly_kwh, discharge_hourly_kwh) = stats
            .battery
            .as_ref()
            .map(|b| (b.charge_hourly_kwh.clone(), b.discharge_hourly_kwh.clone()))
            .unwrap_or_default();
        let (grid_hourly_kwh, load_hourly_kwh) = stats
            .other
            .as_ref()
            .map(|o| (o.grid_hourly_kwh.clone(), o.total_load_hourly_kwh.clone()))
            .unwrap_or_default();

        let snapshot = StatsSnapshot {
            date: today,
            today: today_record,
            pv_hourly_kwh,
            grid_hourly_kwh,
            load_hourly_kwh,
            charge_hourly_kwh,
            discharge_hourly_kwh,
            month: self.aggregator.summarize_month(today.year(), today.month()),
            year: self.aggregator.summarize_year(today.year()),
        };

        debug!(
            "snapshot for {}: pv={:.1}, grid={:.1}, load={:.1}, saved={:.1}",
            snapshot.date,
            snapshot.today.pv,
            snapshot.today.grid,
            snapshot.today.total_load(),
            snapshot.today.saved_kwh()
        );

        *self.latest.lock().unwrap() = Some(snapshot.clone());
        let _ = self.channels.stats.send(ChannelData::Snapshot(snapshot));

        Ok(())
    }

    // mqtt -> log/output stream
    async fn reading_receiver(&self) -> Result<()> {
        let mut events = self.channels.from_mqtt.subscribe();
        let mut control = self.channels.stats.subscribe();

        loop {
            tokio::select! {
                event = events.recv() => match event? {
                    ReadingEvent::Batch(batch) => {
                        if let Some(reading) = &batch.reading {
                            info!("reading: {}", serde_json::to_string(reading)?);
                        }
                        if let Some(cells) = &batch.cells {
                            info!("cells: {}", serde_json::to_string(cells)?);
                        }
                    }
                    ReadingEvent::Online(online) => {
                        info!("device {}", if online { "online" } else { "offline" });
                    }
                    ReadingEvent::ConnectionFailed => {
                        error!("mqtt link failed permanently, realtime stream stopped");
                    }
                },

                message = control.recv() => {
                    if let Ok(ChannelData::Shutdown) = message {
                        info!("reading receiver shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
