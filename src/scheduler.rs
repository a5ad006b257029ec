use crate::prelude::*;

use crate::modbus::registers;

const SLAVE_ID: u8 = 1;
const READ_HOLDING: u8 = 3;

/// The cell block changes slowly; poll it once per this many main polls.
const CELL_POLL_EVERY: u64 = 6;

#[derive(Clone)]
pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.mqtt().enabled() {
            return Ok(());
        }

        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            self.config.mqtt().poll_interval_secs(),
        ));
        let mut receiver = self.channels.to_mqtt.subscribe();
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick += 1;

                    let main = crate::modbus::build_read_command(
                        SLAVE_ID,
                        READ_HOLDING,
                        registers::MAIN_START,
                        registers::MAIN_COUNT,
                    );
                    if self.channels.to_mqtt.send(mqtt::ChannelData::ReadCommand(main)).is_err() {
                        bail!("send(to_mqtt) failed - channel closed?");
                    }

                    if tick % CELL_POLL_EVERY == 0 {
                        let cells = crate::modbus::build_read_command(
                            SLAVE_ID,
                            READ_HOLDING,
                            registers::CELL_START,
                            registers::CELL_COUNT,
                        );
                        let _ = self.channels.to_mqtt.send(mqtt::ChannelData::ReadCommand(cells));
                    }
                }

                message = receiver.recv() => {
                    if let Ok(mqtt::ChannelData::Shutdown) = message {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
