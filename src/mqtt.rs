use crate::prelude::*;

use crate::modbus::{self, CellBlock, Decoded, Reading};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const KEEP_ALIVE: Duration = Duration::from_secs(20);
const CONNACK_TIMEOUT: Duration = Duration::from_secs(20);
const RECONNECT_BASE_SECS: u64 = 5;
const RECONNECT_MAX_SECS: u64 = 60;
const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Frames arriving within one window are coalesced into a single batch.
const BATCH_FLUSH: Duration = Duration::from_millis(100);

/// Delay before attempt `n` (1-based): 5s doubling per attempt, capped at
/// 60s.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(6);
    let secs = RECONNECT_BASE_SECS.saturating_mul(1 << shift);
    Duration::from_secs(secs.min(RECONNECT_MAX_SECS))
}

/// Connect-attempt budget. Resets whenever a connection is established;
/// once spent, the session must stop instead of retrying forever.
#[derive(Debug, Default)]
pub struct ReconnectPolicy {
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connected(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next attempt, or None when the budget is
    /// spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= MAX_CONNECT_ATTEMPTS {
            None
        } else {
            Some(reconnect_delay(self.attempt))
        }
    }
}

// coordinator -> mqtt
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    ReadCommand(Vec<u8>),
    Shutdown,
}

/// Decoded frames batched over one flush window. A window usually carries a
/// main reading, a cell block, or both when polls land close together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadingBatch {
    pub reading: Option<Reading>,
    pub cells: Option<CellBlock>,
}

// mqtt -> subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingEvent {
    Batch(ReadingBatch),
    Online(bool),
    /// Sent exactly once, when the reconnect budget is exhausted.
    ConnectionFailed,
}

pub type Sender = broadcast::Sender<ChannelData>;

// session -> dispatcher
enum LinkEvent {
    Frame(Decoded),
    Disconnected,
}

/// Batching and online-state tracking, driven by the dispatcher task.
/// Returns the events to broadcast instead of sending them itself.
pub struct Batcher {
    offline_after: Duration,
    batch: ReadingBatch,
    last_frame: Option<Instant>,
    online: bool,
}

impl Batcher {
    pub fn new(offline_after: Duration) -> Self {
        Self {
            offline_after,
            batch: ReadingBatch::default(),
            last_frame: None,
            online: false,
        }
    }

    pub fn frame(&mut self, frame: Decoded) {
        match frame {
            Decoded::Main(reading) => self.batch.reading = Some(reading),
            Decoded::Cells(cells) => self.batch.cells = Some(cells),
        }
        self.last_frame = Some(Instant::now());
    }

    /// Flush tick: publishes a pending batch, announcing the device online
    /// first when needed, or reports offline once the quiet period exceeds
    /// the watchdog window.
    pub fn flush(&mut self) -> Vec<ReadingEvent> {
        let mut events = Vec::new();

        if self.batch.reading.is_some() || self.batch.cells.is_some() {
            if !self.online {
                self.online = true;
                events.push(ReadingEvent::Online(true));
            }
            events.push(ReadingEvent::Batch(std::mem::take(&mut self.batch)));
        } else if self.online {
            if let Some(at) = self.last_frame {
                if at.elapsed() >= self.offline_after {
                    warn!(
                        "no frames for {:?}, marking device offline",
                        self.offline_after
                    );
                    self.online = false;
                    events.push(ReadingEvent::Online(false));
                }
            }
        }

        events
    }

    /// The link dropped: any pending batch goes out and the device is
    /// reported offline right away instead of waiting for the watchdog.
    pub fn disconnected(&mut self) -> Vec<ReadingEvent> {
        let mut events = Vec::new();

        if self.batch.reading.is_some() || self.batch.cells.is_some() {
            events.push(ReadingEvent::Batch(std::mem::take(&mut self.batch)));
        }
        if self.online {
            self.online = false;
            events.push(ReadingEvent::Online(false));
        }
        self.last_frame = None;

        events
    }
}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        // Single-writer handoff: the eventloop task decodes and forwards,
        // the dispatcher alone batches and publishes events.
        let (tx, rx) = mpsc::channel(64);

        futures::try_join!(self.session(tx), self.dispatcher(rx))?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    /// Connects, pumps, reconnects. Returns Ok on shutdown; gives up with an
    /// error after the attempt budget, signalling subscribers first.
    async fn session(&self, frames: mpsc::Sender<LinkEvent>) -> Result<()> {
        let mut policy = ReconnectPolicy::new();

        loop {
            match self.connect().await {
                Ok((client, eventloop)) => {
                    policy.connected();
                    match self.pump(client, eventloop, &frames).await {
                        Ok(()) => return Ok(()),
                        Err(err) => {
                            warn!("mqtt session ended: {}", err);
                            // Dropped link: the dispatcher reports offline
                            // before any reconnect wait starts.
                            let _ = frames.send(LinkEvent::Disconnected).await;
                        }
                    }
                }
                Err(err) => warn!("mqtt connect failed: {}", err),
            }

            match policy.next_delay() {
                Some(delay) => {
                    info!(
                        "reconnecting in {:?} (attempt {}/{})",
                        delay,
                        policy.attempts(),
                        MAX_CONNECT_ATTEMPTS
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!("mqtt gave up after {} attempts", policy.attempts());
                    let _ = self.channels.from_mqtt.send(ReadingEvent::ConnectionFailed);
                    bail!("mqtt connection failed after {} attempts", policy.attempts());
                }
            }
        }
    }

    /// The broker expects an app-style client id and drops reused ones, so
    /// each connection gets a fresh timestamp suffix.
    async fn connect(&self) -> Result<(AsyncClient, EventLoop)> {
        let mqtt = self.config.mqtt();
        let device = self.config.device();

        let client_id = format!(
            "android-{}-{}",
            device.id(),
            chrono::Utc::now().timestamp()
        );

        let mut options = MqttOptions::new(client_id, mqtt.host(), mqtt.port());
        options.set_keep_alive(KEEP_ALIVE);
        options.set_credentials(mqtt.username(), mqtt.password());

        info!("connecting to mqtt at {}:{}", mqtt.host(), mqtt.port());

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let connack = tokio::time::timeout(CONNACK_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => return Ok(ack),
                    Ok(_) => continue,
                    Err(err) => return Err(anyhow!("{}", err)),
                }
            }
        })
        .await;

        match connack {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => bail!("mqtt handshake failed: {}", err),
            Err(_) => bail!("no connack within {:?}", CONNACK_TIMEOUT),
        }

        client
            .subscribe(format!("reportApp/{}", device.serial()), QoS::AtMostOnce)
            .await?;

        info!("mqtt connected, subscribed to reportApp/{}", device.serial());
        Ok((client, eventloop))
    }

    async fn pump(
        &self,
        client: AsyncClient,
        mut eventloop: EventLoop,
        frames: &mpsc::Sender<LinkEvent>,
    ) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();
        let command_topic = format!("listenApp/{}", self.config.device().serial());

        loop {
            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        trace!("RX {} bytes on {}", publish.payload.len(), publish.topic);
                        if let Some(decoded) = modbus::decode(&hex::encode(&publish.payload)) {
                            if frames.send(LinkEvent::Frame(decoded)).await.is_err() {
                                bail!("send(frames) failed - dispatcher gone?");
                            }
                        }
                    }
                    Ok(_) => {} // keepalives etc
                    Err(err) => bail!("mqtt poll: {}", err),
                },

                message = receiver.recv() => match message? {
                    Shutdown => {
                        info!("MQTT received shutdown signal");
                        let _ = client.disconnect().await;
                        return Ok(());
                    }
                    ReadCommand(bytes) => {
                        debug!("TX {} bytes to {}", bytes.len(), command_topic);
                        client
                            .publish(&command_topic, QoS::AtMostOnce, false, bytes)
                            .await?;
                    }
                },
            }
        }
    }

    /// Batches decoded frames and publishes them on the flush tick, tracking
    /// online state. A device that was online and goes quiet for 2.5 poll
    /// intervals is reported offline; a dropped link reports offline
    /// immediately.
    async fn dispatcher(&self, mut frames: mpsc::Receiver<LinkEvent>) -> Result<()> {
        let poll_ms = self.config.mqtt().poll_interval_secs() * 1000;
        let offline_after = Duration::from_millis(poll_ms * 5 / 2);

        let mut flush = tokio::time::interval(BATCH_FLUSH);
        let mut batcher = Batcher::new(offline_after);

        loop {
            let events = tokio::select! {
                event = frames.recv() => match event {
                    Some(LinkEvent::Frame(frame)) => {
                        batcher.frame(frame);
                        Vec::new()
                    }
                    Some(LinkEvent::Disconnected) => {
                        warn!("mqtt link lost, notifying subscribers");
                        batcher.disconnected()
                    }
                    None => {
                        info!("frame dispatcher exiting");
                        return Ok(());
                    }
                },

                _ = flush.tick() => batcher.flush(),
            };

            for event in events {
                let _ = self.channels.from_mqtt.send(event);
            }
        }
    }
}
