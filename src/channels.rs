use crate::prelude::*;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_mqtt: broadcast::Sender<crate::mqtt::ChannelData>,
    pub from_mqtt: broadcast::Sender<crate::mqtt::ReadingEvent>,
    pub stats: broadcast::Sender<crate::coordinator::ChannelData>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_mqtt: Self::channel(),
            from_mqtt: Self::channel(),
            stats: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
