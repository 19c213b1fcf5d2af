//! Line protocol spoken by the battery pack.
//!
//! The pack prints one record per line, usually a JSON object. Lines arrive
//! padded with NUL bytes (`\0`, `\0 `) and occasionally wrapped after a hyphen,
//! so decoding is deliberately forgiving: clean, rejoin, then try JSON and fall
//! back to a loose `key: value` reader. Anything that still does not make sense
//! becomes [`Record::Unparseable`]; decoding never fails loudly.

use crate::types::{BatteryInfo, BatterySnapshot, BootInfo, NOT_DETECTED};
use regex::Regex;
use serde_json::{Map, Number, Value};
use std::sync::OnceLock;

pub const CELL_TEMP: &str = "CellTemp(degK)";
pub const CELL_VOLTAGE: &str = "CellVoltage(mV)";
pub const CHARGER_VOLTAGE: &str = "ChargerVoltage(mV)";
pub const CURRENT: &str = "Current(mA)";
pub const CYCLE_COUNT: &str = "CycleCount";
pub const STATE_OF_CHARGE: &str = "SOC(%)";
pub const TIME_TO_EMPTY: &str = "TimeToEmpty(min)";
pub const USB_OUT_1: &str = "USB OUT-1(mV)";
pub const USB_OUT_2: &str = "USB OUT-2(mV)";

pub const FIRMWARE_VERSION: &str = "FirmwareVersion";
pub const BOOT_DATA: &str = "BootData";
pub const SERIAL_NUMBER: &str = "SerialNumber";

const KELVIN_OFFSET: f64 = 273.15;
const MAX_FRAGMENTS: usize = 4;

/// Classified content of one line.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Telemetry(BatterySnapshot),
    DeviceInfo(BatteryInfo),
    Unparseable(String),
}

/// Stateful decoder for one connection: joins wrapped lines, then decodes.
#[derive(Debug, Default)]
pub struct ProtocolDecoder {
    assembler: LineAssembler,
}

impl ProtocolDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw line and returns the records it completes: none while a
    /// wrapped record is still open, two when a held fragment turns out to be
    /// a truncated record of its own.
    pub fn push_line(&mut self, raw: &[u8]) -> Vec<Record> {
        let fragment = strip_padding(&String::from_utf8_lossy(raw));
        let mut records = Vec::new();
        if !self.assembler.is_pending() {
            records.extend(self.assembler.push_fragment(fragment).map(|t| decode_record(&t)));
            return records;
        }

        if starts_record(&fragment) {
            records.push(decode_record(&self.assembler.take()));
            records.extend(self.assembler.push_fragment(fragment).map(|t| decode_record(&t)));
            return records;
        }

        let held = self.assembler.pending_text();
        let Some(joined) = self.assembler.push_fragment(fragment.clone()) else {
            return records;
        };
        let record = decode_record(&joined);
        if matches!(record, Record::Unparseable(_)) {
            let alone = decode_record(&fragment);
            if !matches!(alone, Record::Unparseable(_)) {
                records.push(decode_record(&held));
                records.push(alone);
                return records;
            }
        }
        records.push(record);
        records
    }
}

/// A fragment opening a new object cannot continue a wrapped one.
fn starts_record(fragment: &str) -> bool {
    fragment.trim_start().starts_with('{')
}

/// Holds lines that end in a wrap hyphen until the continuation arrives.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<String>,
}

impl LineAssembler {
    pub fn push(&mut self, raw: &[u8]) -> Option<String> {
        self.push_fragment(strip_padding(&String::from_utf8_lossy(raw)))
    }

    fn push_fragment(&mut self, fragment: String) -> Option<String> {
        self.pending.push(fragment);
        let joined = self.pending_text();
        if joined.trim_end().ends_with('-') && self.pending.len() < MAX_FRAGMENTS {
            return None;
        }
        self.pending.clear();
        Some(joined)
    }

    /// Releases whatever is held, as one text.
    pub fn take(&mut self) -> String {
        let joined = self.pending_text();
        self.pending.clear();
        joined
    }

    fn pending_text(&self) -> String {
        self.pending.join("\n")
    }

    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Padding removal, wrap rejoin and trailing-whitespace trim, in that order.
pub fn clean_line(text: &str) -> String {
    let stripped = strip_padding(text);
    let joined = rejoin_wrapped(&stripped);
    joined.trim_end().to_string()
}

fn strip_padding(text: &str) -> String {
    text.replace("\0 ", "").replace('\0', "")
}

fn rejoin_wrapped(text: &str) -> String {
    static WRAP: OnceLock<Option<Regex>> = OnceLock::new();
    match WRAP.get_or_init(|| Regex::new(r"-[ \t\r]*\n\s*").ok()) {
        Some(re) => re.replace_all(text, "-").into_owned(),
        None => text.to_string(),
    }
}

/// Decodes one complete record.
pub fn decode_record(text: &str) -> Record {
    let cleaned = clean_line(text);
    if cleaned.trim().is_empty() {
        return Record::Unparseable("empty line".to_string());
    }
    let Some(fields) = parse_fields(&cleaned) else {
        return Record::Unparseable(format!("not a structured record: {cleaned}"));
    };
    classify(&fields)
}

fn classify(fields: &Map<String, Value>) -> Record {
    let keys: Vec<String> = fields.keys().map(|k| normalize(k)).collect();
    if keys.iter().any(|k| is_firmware_key(k)) {
        return Record::DeviceInfo(device_info(fields));
    }
    if keys.iter().any(|k| is_charge_key(k)) {
        return match telemetry(fields) {
            Ok(snapshot) => Record::Telemetry(snapshot),
            Err(reason) => Record::Unparseable(reason),
        };
    }
    Record::Unparseable("no recognised keys".to_string())
}

fn is_firmware_key(normalized: &str) -> bool {
    normalized.contains("firmwareversion") || normalized == "fwversion"
}

fn is_charge_key(normalized: &str) -> bool {
    normalized.starts_with("soc") || normalized.contains("stateofcharge")
}

fn telemetry(fields: &Map<String, Value>) -> Result<BatterySnapshot, String> {
    let temp_k = number(fields, CELL_TEMP)?;
    let cycle_count = number(fields, CYCLE_COUNT)?;
    let percentage = number(fields, STATE_OF_CHARGE)?;
    Ok(BatterySnapshot {
        temperature: round2(temp_k - KELVIN_OFFSET),
        cell_voltage: round2(number(fields, CELL_VOLTAGE)? / 1000.0),
        input_voltage: round2(number(fields, CHARGER_VOLTAGE)? / 1000.0),
        current: round2(number(fields, CURRENT)? / 1000.0),
        cycle_count: whole(cycle_count, CYCLE_COUNT)?,
        percentage: whole(percentage, STATE_OF_CHARGE)?,
        time_to_empty: (number(fields, TIME_TO_EMPTY)? * 60.0) as i64,
        usb_out_1_voltage: round2(number(fields, USB_OUT_1)? / 1000.0),
        usb_out_2_voltage: round2(number(fields, USB_OUT_2)? / 1000.0),
    })
}

fn device_info(fields: &Map<String, Value>) -> BatteryInfo {
    BatteryInfo {
        firmware_version: lookup(fields, FIRMWARE_VERSION)
            .map(text)
            .unwrap_or_else(|| NOT_DETECTED.to_string()),
        boot: boot_info(lookup(fields, BOOT_DATA)),
        serial_number: lookup(fields, SERIAL_NUMBER)
            .map(text)
            .unwrap_or_else(|| NOT_DETECTED.to_string()),
    }
}

fn boot_info(value: Option<&Value>) -> BootInfo {
    let mut boot = BootInfo::default();
    match value {
        Some(Value::Object(map)) => {
            for (key, v) in map {
                let k = normalize(key);
                if k.contains("pcb") {
                    boot.pcb_version = text(v);
                } else if k.contains("date") {
                    boot.date = text(v);
                } else if k.contains("version") || k.contains("code") {
                    boot.code_version = text(v);
                }
            }
        }
        Some(Value::String(s)) => {
            let parts: Vec<&str> = if s.contains(',') {
                s.split(',').map(str::trim).filter(|p| !p.is_empty()).collect()
            } else {
                s.split_whitespace().collect()
            };
            let slots = [
                &mut boot.code_version,
                &mut boot.pcb_version,
                &mut boot.date,
            ];
            for (slot, part) in slots.into_iter().zip(parts) {
                *slot = part.to_string();
            }
        }
        Some(other) => boot.code_version = text(other),
        None => {}
    }
    boot
}

fn lookup<'a>(fields: &'a Map<String, Value>, wire_key: &str) -> Option<&'a Value> {
    fields.get(wire_key).or_else(|| {
        let wanted = normalize(wire_key);
        fields
            .iter()
            .find(|(k, _)| normalize(k) == wanted)
            .map(|(_, v)| v)
    })
}

fn number(fields: &Map<String, Value>, wire_key: &str) -> Result<f64, String> {
    let value = lookup(fields, wire_key).ok_or_else(|| format!("missing field {wire_key}"))?;
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|n| n.is_finite())
        .ok_or_else(|| format!("field {wire_key} is not numeric: {value}"))
}

fn whole(n: f64, wire_key: &str) -> Result<u32, String> {
    if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
        Ok(n as u32)
    } else {
        Err(format!("field {wire_key} is not a count: {n}"))
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => NOT_DETECTED.to_string(),
        other => other.to_string(),
    }
}

fn normalize(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// JSON object first, then the loose `key: value` form.
pub fn parse_fields(text: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
        return Some(map);
    }
    parse_loose(text)
}

fn parse_loose(text: &str) -> Option<Map<String, Value>> {
    let body = strip_braces(text.trim());
    let mut map = Map::new();
    for part in split_top_level(body, &[',', ';', '\n']) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (key, value) = split_pair(part)?;
        let key = unquote(key.trim());
        if key.is_empty() {
            return None;
        }
        map.insert(key.to_string(), loose_value(value.trim())?);
    }
    if map.is_empty() {
        None
    } else {
        Some(map)
    }
}

fn loose_value(raw: &str) -> Option<Value> {
    if raw.starts_with('{') {
        return parse_loose(raw).map(Value::Object);
    }
    if raw.len() >= 2
        && ((raw.starts_with('"') && raw.ends_with('"'))
            || (raw.starts_with('\'') && raw.ends_with('\'')))
    {
        return Some(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Some(Value::Number(n));
    }
    match raw {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => Some(Value::String(raw.to_string())),
    }
}

fn strip_braces(s: &str) -> &str {
    match s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        Some(inner) => inner,
        None => s,
    }
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

/// Splits on any of `seps` that sits outside quotes and braces.
fn split_top_level<'a>(s: &'a str, seps: &[char]) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 && seps.contains(&c) => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// First `:` or `=` outside quotes separates key from value.
fn split_pair(part: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    for (i, c) in part.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, ':') | (None, '=') => return Some((&part[..i], &part[i + 1..])),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TELEMETRY: &str = r#"{"CellTemp(degK)": 300.0, "CellVoltage(mV)": 3700, "ChargerVoltage(mV)": 5120, "Current(mA)": -420, "CycleCount": 12, "SOC(%)": 87, "TimeToEmpty(min)": 10, "USB OUT-1(mV)": 5004, "USB OUT-2(mV)": 0}"#;

    fn expect_telemetry(record: Record) -> BatterySnapshot {
        match record {
            Record::Telemetry(s) => s,
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[test]
    fn test_telemetry_conversions() {
        let snap = expect_telemetry(decode_record(TELEMETRY));
        assert!((snap.temperature - 26.85).abs() < 1e-9);
        assert_eq!(snap.cell_voltage, 3.70);
        assert_eq!(snap.input_voltage, 5.12);
        assert_eq!(snap.current, -0.42);
        assert_eq!(snap.cycle_count, 12);
        assert_eq!(snap.percentage, 87);
        assert_eq!(snap.time_to_empty, 600);
        assert_eq!(snap.usb_out_1_voltage, 5.0);
        assert_eq!(snap.usb_out_2_voltage, 0.0);
    }

    #[test]
    fn test_null_padding_is_stripped() {
        let padded = format!("\0\0 {}\0 \0\r\n", TELEMETRY.replace(", ", ",\0 "));
        let snap = expect_telemetry(decode_record(&padded));
        assert_eq!(snap.percentage, 87);
    }

    #[test]
    fn test_wrapped_line_in_one_text() {
        let wrapped = TELEMETRY.replace("USB OUT-1", "USB OUT- \n  1");
        let snap = expect_telemetry(decode_record(&wrapped));
        assert_eq!(snap.usb_out_1_voltage, 5.0);
    }

    #[test]
    fn test_decoder_joins_wrapped_fragments() {
        let (head, tail) = TELEMETRY.split_at(TELEMETRY.find("USB OUT-2").unwrap() + 8);
        assert!(head.ends_with('-'));
        let mut decoder = ProtocolDecoder::new();
        assert!(decoder.push_line(format!("{head} \0").as_bytes()).is_empty());
        let mut records = decoder.push_line(tail.as_bytes());
        assert_eq!(records.len(), 1);
        let snap = expect_telemetry(records.remove(0));
        assert_eq!(snap.usb_out_2_voltage, 0.0);
    }

    #[test]
    fn test_truncated_record_does_not_swallow_next_one() {
        let mut decoder = ProtocolDecoder::new();
        assert!(decoder
            .push_line(br#"{"CellTemp(degK)": 300.0, "Current(mA)": -"#)
            .is_empty());
        let records = decoder.push_line(TELEMETRY.as_bytes());
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], Record::Unparseable(_)));
        assert_eq!(expect_telemetry(records[1].clone()).percentage, 87);
        assert!(decoder.push_line(TELEMETRY.as_bytes()).len() == 1);
    }

    #[test]
    fn test_continuation_that_parses_alone_is_kept() {
        let mut decoder = ProtocolDecoder::new();
        assert!(decoder.push_line(b"SOC(%): 4-").is_empty());
        let loose = "CellTemp(degK): 300.0, CellVoltage(mV): 3700, ChargerVoltage(mV): 0, \
                     Current(mA): 10, CycleCount: 1, SOC(%): 50, TimeToEmpty(min): 1, \
                     USB OUT-1(mV): 0, USB OUT-2(mV): 0";
        let records = decoder.push_line(loose.as_bytes());
        assert_eq!(records.len(), 2);
        assert_eq!(expect_telemetry(records[1].clone()).percentage, 50);
    }

    #[test]
    fn test_assembler_take_releases_held_fragments() {
        let mut assembler = LineAssembler::default();
        assert!(assembler.push(b"a-").is_none());
        assert!(assembler.push(b"b-").is_none());
        assert_eq!(assembler.take(), "a-\nb-");
        assert!(!assembler.is_pending());
    }

    #[test]
    fn test_assembler_gives_up_after_max_fragments() {
        let mut assembler = LineAssembler::default();
        for _ in 0..MAX_FRAGMENTS - 1 {
            assert!(assembler.push(b"abc-").is_none());
        }
        assert!(assembler.push(b"abc-").is_some());
        assert!(!assembler.is_pending());
    }

    #[test]
    fn test_device_info_record() {
        let line = r#"{"FirmwareVersion": "2.0.1", "BootData": {"Version": "1.3", "PCBVersion": "4", "Date": "05/11/21"}, "SerialNumber": "DB-000123"}"#;
        match decode_record(line) {
            Record::DeviceInfo(info) => {
                assert_eq!(info.firmware_version, "2.0.1");
                assert_eq!(info.boot.code_version, "1.3");
                assert_eq!(info.boot.pcb_version, "4");
                assert_eq!(info.boot.date, "05/11/21");
                assert_eq!(info.serial_number, "DB-000123");
            }
            other => panic!("expected device info, got {other:?}"),
        }
    }

    #[test]
    fn test_device_info_with_boot_string_and_missing_serial() {
        let line = r#"{"FirmwareVersion": 3, "BootData": "1.1, 2, 01/02/21"}"#;
        match decode_record(line) {
            Record::DeviceInfo(info) => {
                assert_eq!(info.firmware_version, "3");
                assert_eq!(info.boot.code_version, "1.1");
                assert_eq!(info.boot.pcb_version, "2");
                assert_eq!(info.boot.date, "01/02/21");
                assert_eq!(info.serial_number, "ND");
            }
            other => panic!("expected device info, got {other:?}"),
        }
    }

    #[test]
    fn test_firmware_key_wins_over_charge_key() {
        let line = r#"{"FirmwareVersion": "1.0", "SOC(%)": 50}"#;
        assert!(matches!(decode_record(line), Record::DeviceInfo(_)));
    }

    #[test]
    fn test_loose_key_value_telemetry() {
        let line = "CellTemp(degK): 298.15, CellVoltage(mV): 4100, ChargerVoltage(mV): 0, \
                    Current(mA): 1500, CycleCount: 3, SOC(%): 99, TimeToEmpty(min): 1.5, \
                    USB OUT-1(mV)=5000; USB OUT-2(mV)=4990";
        let snap = expect_telemetry(decode_record(line));
        assert_eq!(snap.temperature, 25.0);
        assert_eq!(snap.cell_voltage, 4.1);
        assert_eq!(snap.current, 1.5);
        assert_eq!(snap.time_to_empty, 90);
        assert_eq!(snap.usb_out_2_voltage, 4.99);
    }

    #[test]
    fn test_loose_device_info_with_nested_boot() {
        let line = "FirmwareVersion: '1.2', BootData: {Version: 7, PCBVersion: 2}, SerialNumber: X1";
        match decode_record(line) {
            Record::DeviceInfo(info) => {
                assert_eq!(info.firmware_version, "1.2");
                assert_eq!(info.boot.code_version, "7");
                assert_eq!(info.boot.pcb_version, "2");
                assert_eq!(info.boot.date, "ND");
                assert_eq!(info.serial_number, "X1");
            }
            other => panic!("expected device info, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_lines_are_unparseable() {
        for line in [
            "",
            "\0\0\0",
            "garbage without separators",
            "{\"CellTemp(degK)\": 300",
            "hello: world",
            "[1, 2, 3]",
        ] {
            assert!(
                matches!(decode_record(line), Record::Unparseable(_)),
                "line {line:?} should not decode"
            );
        }
    }

    #[test]
    fn test_missing_telemetry_field_is_unparseable() {
        let line = r#"{"SOC(%)": 50, "CellTemp(degK)": 300}"#;
        match decode_record(line) {
            Record::Unparseable(reason) => assert!(reason.contains("missing field")),
            other => panic!("expected unparseable, got {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_percentage_is_unparseable() {
        let line = TELEMETRY.replace("\"SOC(%)\": 87", "\"SOC(%)\": 87.5");
        assert!(matches!(decode_record(&line), Record::Unparseable(_)));
    }

    #[test]
    fn test_numeric_strings_are_accepted() {
        let line = TELEMETRY.replace("\"CycleCount\": 12", "\"CycleCount\": \"12\"");
        assert_eq!(expect_telemetry(decode_record(&line)).cycle_count, 12);
    }

    #[test]
    fn test_invalid_utf8_does_not_panic() {
        let mut decoder = ProtocolDecoder::new();
        let records = decoder.push_line(&[0xff, 0xfe, b'{', 0x00]);
        assert!(matches!(records.as_slice(), [Record::Unparseable(_)]));
    }

    #[test]
    fn test_split_top_level_respects_nesting() {
        let parts = split_top_level("a: 1, b: {c: 2, d: 3}, e: 'x,y'", &[',']);
        assert_eq!(parts, vec!["a: 1", " b: {c: 2, d: 3}", " e: 'x,y'"]);
    }
}
