pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::ApiError;
pub use crate::options::Options;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{api, coordinator, modbus, mqtt, scheduler, stats};
