pub mod registers;

use crate::prelude::*;

use serde::Serialize;
use std::collections::BTreeMap;

use registers::addr;

const RESPONSE_SEPARATOR: &str = "2b2b2b2b";

/// One decoded main-block frame. Fields are absent when the register could
/// not be read or its value was rejected.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Reading {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_in_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_freq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_in_freq: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv1_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv2_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv1_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv2_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pv_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_in_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ac_out_va: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_power: Option<f64>,
    pub battery_status: String,
    pub grid_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_soc: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_ups_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master_slave_status: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_serial: Option<String>,
}

/// Summary of one battery cell-voltage block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellBlock {
    pub num: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub diff: f64,
    pub cells: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Main(Reading),
    Cells(CellBlock),
}

pub fn crc16_modbus(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// Builds a Modbus read request: slave id, function code, start address and
/// register count, with the CRC appended little-endian.
pub fn build_read_command(slave: u8, function: u8, address: u16, count: u16) -> Vec<u8> {
    let mut frame = vec![slave, function];
    frame.extend_from_slice(&address.to_be_bytes());
    frame.extend_from_slice(&count.to_be_bytes());
    let crc = crc16_modbus(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Decodes a hex-encoded response frame into a main reading or a cell block.
///
/// Never returns an error to the caller: every malformed input path logs and
/// yields None so the poll loop keeps running.
pub fn decode(payload_hex: &str) -> Option<Decoded> {
    let payload = payload_hex.trim().to_ascii_lowercase();
    if !payload.is_ascii() {
        debug!("payload contains non-hex characters");
        return None;
    }

    let resp = locate_response(&payload)?;
    if resp.len() < 12 {
        debug!("frame too short ({} hex chars)", resp.len());
        return None;
    }

    check_crc(resp);

    let byte_count = usize::from_str_radix(&resp[4..6], 16).ok()?;
    let data = match hex::decode(&resp[6..resp.len() - 4]) {
        Ok(data) => data,
        Err(err) => {
            debug!("frame data is not valid hex: {}", err);
            return None;
        }
    };

    if data.len() != byte_count {
        warn!("length mismatch: {} data bytes vs {} declared", data.len(), byte_count);
    }
    if data.is_empty() && byte_count > 0 {
        warn!("frame declared {} bytes but carried none", byte_count);
        return None;
    }

    let data = classify(&resp, byte_count, data)?;

    if data.len() == registers::CELL_BYTES {
        decode_cells(&data).map(Decoded::Cells)
    } else {
        Some(Decoded::Main(decode_main(&data)))
    }
}

/// The device either sends the Modbus response directly or prefixes it with
/// an envelope split off by a `++++` separator.
fn locate_response(payload: &str) -> Option<&str> {
    if let Some((_, resp)) = payload.split_once(RESPONSE_SEPARATOR) {
        if resp.starts_with("0103") || resp.starts_with("0104") {
            return Some(resp);
        }
        debug!("separator present but response segment has unexpected prefix");
        return None;
    }
    if payload.starts_with("0103") || payload.starts_with("0104") {
        return Some(payload);
    }
    debug!("payload does not look like a read response");
    None
}

/// CRC mismatches are non-fatal: some firmware revisions in the field emit
/// stale CRCs, so the check is a diagnostic only.
fn check_crc(resp: &str) {
    let body = match hex::decode(&resp[..resp.len() - 4]) {
        Ok(body) => body,
        Err(_) => return,
    };
    let calculated = crc16_modbus(&body).to_le_bytes();
    let received = &resp[resp.len() - 4..];
    if hex::encode(calculated) != received {
        warn!(
            "crc mismatch (frame accepted): received {}, calculated {}",
            received,
            hex::encode(calculated)
        );
    }
}

/// Sorts the frame into a cell block, a main block (possibly with a trailing
/// metadata tail to drop), or a reject. Returns data normalized to exactly
/// the block size the decoder expects.
fn classify(resp: &str, byte_count: usize, mut data: Vec<u8>) -> Option<Vec<u8>> {
    const MAIN: usize = registers::MAIN_BYTES;
    const MAIN_EXTENDED: usize = registers::MAIN_BYTES + 12;

    if byte_count == registers::CELL_BYTES && data.len() == registers::CELL_BYTES {
        return Some(data);
    }

    if (byte_count == MAIN && data.len() == MAIN)
        || (byte_count == MAIN_EXTENDED && data.len() == MAIN_EXTENDED)
    {
        data.truncate(MAIN);
        return Some(data);
    }

    // 198 bytes is a known legacy shape: a 99-register response that is
    // really the main block with partial metadata.
    if byte_count == 198 && data.len() == 198 {
        debug!("legacy 198-byte frame, truncating to {} bytes", MAIN);
        data.truncate(MAIN);
        return Some(data);
    }

    // Modbus exception responses and short control messages; not worth a
    // log line at any level above debug.
    if data.len() == 2 {
        debug!("modbus exception response: {}", &resp[..resp.len().min(20)]);
        return None;
    }
    if data.len() <= 20 {
        debug!("short response ({} bytes), ignoring", data.len());
        return None;
    }

    if data.len().abs_diff(MAIN) <= 20 && data.len() >= MAIN - 10 {
        debug!("near-main length ({} bytes), normalizing to {}", data.len(), MAIN);
        data.resize(MAIN, 0);
        return Some(data);
    }

    warn!(
        "unrecognized frame length {} (declared {}), preview: {}",
        data.len(),
        byte_count,
        &resp[..resp.len().min(60)]
    );
    None
}

fn decode_cells(data: &[u8]) -> Option<CellBlock> {
    let mut cells = BTreeMap::new();
    let mut total = 0.0;
    let mut min = f64::MAX;
    let mut max = f64::MIN;

    for i in 0..data.len() / 2 {
        if let Some(mv) = registers::read_u16(data, i as u16, 1.0) {
            let volts = (mv / 1000.0 * 1000.0).round() / 1000.0;
            if volts > 1.0 && volts < 5.0 {
                cells.insert(format!("c_{:02}", i + 1), volts);
                total += volts;
                min = min.min(volts);
                max = max.max(volts);
            }
        }
    }

    let num = cells.len();
    if num == 0 {
        warn!("no valid cells in cell block");
        return None;
    }

    let avg = (total / num as f64 * 1000.0).round() / 1000.0;
    let diff = if num > 1 {
        ((max - min) * 1000.0).round() / 1000.0
    } else {
        0.0
    };

    Some(CellBlock {
        num,
        avg,
        min,
        max,
        diff,
        cells,
    })
}

fn decode_main(data: &[u8]) -> Reading {
    let mut r = Reading::default();

    r.battery_voltage = registers::read_u16(data, addr::BATTERY_VOLTAGE, 0.01);
    // Sign convention here is positive = charging; the wire reports the
    // opposite for current and power.
    r.battery_current = registers::read_i16(data, addr::BATTERY_CURRENT, 0.01).map(|v| -v);

    r.ac_out_voltage = registers::read_u16(data, addr::AC_OUT_VOLTAGE, 0.1);
    r.grid_voltage = registers::read_u16(data, addr::GRID_VOLTAGE, 0.1);
    r.ac_in_voltage = r.grid_voltage;

    r.ac_out_freq = registers::read_u16(data, addr::AC_OUT_FREQ, 0.01);
    r.ac_in_freq = registers::read_u16(data, addr::AC_IN_FREQ, 0.01);

    r.device_temp = registers::read_i16(data, addr::DEVICE_TEMP, 1.0).and_then(|raw| {
        let celsius = ((raw - 1000.0) / 10.0 * 10.0).round() / 10.0;
        if celsius > -40.0 && celsius < 150.0 {
            Some(celsius)
        } else {
            None
        }
    });

    r.pv1_voltage = registers::read_u16(data, addr::PV1_VOLTAGE, 1.0);
    r.pv2_voltage = registers::read_u16(data, addr::PV2_VOLTAGE, 1.0);

    r.grid_power = registers::read_i16(data, addr::GRID_POWER, 1.0);
    r.ac_in_power =
        registers::read_u16(data, addr::AC_IN_POWER, 1.0).map(|v| (v / 100.0 * 100.0).round() / 100.0);
    r.load_power = registers::read_u16(data, addr::LOAD_POWER, 1.0);
    r.ac_out_power = registers::read_u16(data, addr::AC_OUT_POWER, 1.0);
    r.ac_out_va = registers::read_u16(data, addr::AC_OUT_VA, 1.0);

    r.battery_power = registers::read_i16(data, addr::BATTERY_POWER, 1.0).map(|v| -v);
    r.battery_status = match r.battery_power {
        Some(p) if p > 0.0 => "Charging".to_string(),
        Some(_) => "Discharging".to_string(),
        None => "Unknown".to_string(),
    };

    r.grid_status = match r.grid_power {
        Some(p) if p > 0.0 => "Importing".to_string(),
        Some(_) => "Exporting".to_string(),
        None => "Unknown".to_string(),
    };

    r.pv1_power = registers::read_u16(data, addr::PV1_POWER, 1.0);
    r.pv2_power = registers::read_u16(data, addr::PV2_POWER, 1.0);
    r.pv_power = match (r.pv1_power, r.pv2_power) {
        (None, None) => None,
        (pv1, pv2) => Some(pv1.unwrap_or(0.0) + pv2.unwrap_or(0.0)),
    };

    r.battery_soc =
        registers::read_u16(data, addr::BATTERY_SOC, 1.0).map(|v| v.clamp(0.0, 100.0) as u8);

    r.is_ups_mode = registers::read_u16(data, addr::UPS_MODE, 1.0).map(|v| v == 0.0);

    r.battery_type = registers::read_u16(data, addr::BATTERY_TYPE, 1.0)
        .map(|v| registers::battery_type_label(v as u16).to_string());

    r.master_slave_status = registers::read_u16(data, addr::MASTER_SLAVE_STATUS, 1.0);

    r.device_serial =
        registers::read_string(data, addr::DEVICE_MODEL_START, registers::SERIAL_WORDS);

    r
}
