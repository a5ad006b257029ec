/// Register addresses for the main 95-register input block.
///
/// The layout is fixed by the inverter firmware; addresses are word offsets
/// from the start of the block.
pub mod addr {
    pub const DEVICE_MODEL_START: u16 = 3;
    pub const BATTERY_VOLTAGE: u16 = 11;
    pub const BATTERY_CURRENT: u16 = 12;
    pub const AC_OUT_VOLTAGE: u16 = 13;
    pub const GRID_VOLTAGE: u16 = 15;
    pub const AC_OUT_FREQ: u16 = 16;
    pub const AC_IN_FREQ: u16 = 17;
    pub const AC_OUT_POWER: u16 = 18;
    pub const PV1_VOLTAGE: u16 = 20;
    pub const PV1_POWER: u16 = 22;
    pub const DEVICE_TEMP: u16 = 24;
    pub const BATTERY_TYPE: u16 = 37;
    pub const BATTERY_SOC: u16 = 50;
    pub const AC_IN_POWER: u16 = 53;
    pub const AC_OUT_VA: u16 = 58;
    pub const GRID_POWER: u16 = 59;
    pub const BATTERY_POWER: u16 = 61;
    pub const LOAD_POWER: u16 = 67;
    pub const UPS_MODE: u16 = 68;
    pub const MASTER_SLAVE_STATUS: u16 = 70;
    pub const PV2_VOLTAGE: u16 = 72;
    pub const PV2_POWER: u16 = 74;
}

/// Main block: registers 0..95.
pub const MAIN_START: u16 = 0;
pub const MAIN_COUNT: u16 = 95;
pub const MAIN_BYTES: usize = MAIN_COUNT as usize * 2;

/// Battery cell block: registers 250..300, one cell voltage (mV) per word.
pub const CELL_START: u16 = 250;
pub const CELL_COUNT: u16 = 50;
pub const CELL_BYTES: usize = CELL_COUNT as usize * 2;

/// Serial number lives in a 5-register ASCII window.
pub const SERIAL_WORDS: u16 = 5;

/// Battery type codes; anything unmapped reports as a generic "Present".
pub fn battery_type_label(code: u16) -> &'static str {
    match code {
        2 => "No Battery",
        _ => "Present",
    }
}

/// Reads a 16-bit big-endian register at a word address. Returns the value
/// scaled and rounded to 3 decimals, or None when out of range or the scaled
/// result is not finite.
pub fn read_u16(data: &[u8], address: u16, scale: f64) -> Option<f64> {
    let offset = address as usize * 2;
    let bytes = data.get(offset..offset + 2)?;
    let raw = u16::from_be_bytes([bytes[0], bytes[1]]);
    finite(raw as f64 * scale)
}

/// Signed variant of `read_u16`.
pub fn read_i16(data: &[u8], address: u16, scale: f64) -> Option<f64> {
    let offset = address as usize * 2;
    let bytes = data.get(offset..offset + 2)?;
    let raw = i16::from_be_bytes([bytes[0], bytes[1]]);
    finite(raw as f64 * scale)
}

/// Reads a trimmed ASCII string from a register window. NUL bytes and
/// non-ASCII input are dropped rather than failing the whole frame.
pub fn read_string(data: &[u8], address: u16, words: u16) -> Option<String> {
    let offset = address as usize * 2;
    let len = words as usize * 2;
    let bytes = data.get(offset..offset + len)?;
    let s: String = bytes
        .iter()
        .filter(|b| b.is_ascii() && **b != 0)
        .map(|b| *b as char)
        .collect();
    let s = s.trim().to_string();
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn finite(value: f64) -> Option<f64> {
    let rounded = (value * 1000.0).round() / 1000.0;
    if rounded.is_finite() {
        Some(rounded)
    } else {
        None
    }
}
