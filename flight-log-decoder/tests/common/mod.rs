//! Synthetic logs and a mock export endpoint shared by the integration tests

#![allow(dead_code)]

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};
use flight_log_decoder::{
    BackendMessage, ExportPayload, FormatKind, LogFile, MessageTypeFilter, ParserSession,
    SessionConfig, SinkConfig,
};
use httpmock::prelude::*;
use httpmock::Mock;

const SYNC: [u8; 2] = [0xA3, 0x95];
const FMT_TYPE: u8 = 0x80;

pub const ATT: u8 = 1;
pub const GPS: u8 = 2;
pub const MODE: u8 = 3;
pub const IMU: u8 = 4;
pub const UNITS: u8 = 5;

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(len, 0);
    out
}

fn fmt_record(type_id: u8, length: u8, name: &str, format: &str, columns: &str) -> Vec<u8> {
    let mut out = vec![SYNC[0], SYNC[1], FMT_TYPE, type_id, length];
    out.extend(padded(name, 4));
    out.extend(padded(format, 16));
    out.extend(padded(columns, 64));
    out
}

fn record(type_id: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = vec![SYNC[0], SYNC[1], type_id];
    out.extend(body);
    out
}

fn att(time_us: u64, roll_cd: i16) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(time_us).unwrap();
    body.write_i16::<LittleEndian>(roll_cd).unwrap();
    body.write_i16::<LittleEndian>(0).unwrap();
    record(ATT, body)
}

fn gps(time_us: u64, instance: u8, lat: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(time_us).unwrap();
    body.write_u8(instance).unwrap();
    body.write_i32::<LittleEndian>(lat).unwrap();
    record(GPS, body)
}

fn mode(time_us: u64, mode: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(time_us).unwrap();
    body.write_u8(mode).unwrap();
    record(MODE, body)
}

fn imu(time_us: u64, acc_x: f32) -> Vec<u8> {
    let mut body = Vec::new();
    body.write_u64::<LittleEndian>(time_us).unwrap();
    body.write_f32::<LittleEndian>(acc_x).unwrap();
    record(IMU, body)
}

/// DataFlash log with ATT, GPS (two instances), MODE and IMU records
///
/// ATT, GPS and MODE are in the built-in filter, IMU is not. Records are
/// one second apart starting at 1 s.
pub fn dataflash_log() -> Vec<u8> {
    let mut log = Vec::new();
    log.extend(fmt_record(FMT_TYPE, 89, "FMT", "BBnNZ", "Type,Length,Name,Format,Columns"));
    log.extend(fmt_record(ATT, 15, "ATT", "Qcc", "TimeUS,Roll,Pitch"));
    log.extend(fmt_record(GPS, 16, "GPS", "QBL", "TimeUS,I,Lat"));
    log.extend(fmt_record(MODE, 12, "MODE", "QM", "TimeUS,Mode"));
    log.extend(fmt_record(IMU, 15, "IMU", "Qf", "TimeUS,AccX"));
    log.extend(fmt_record(UNITS, 44, "FMTU", "QBNN", "TimeUS,FmtType,UnitIds,MultIds"));

    let mut units = Vec::new();
    units.write_u64::<LittleEndian>(0).unwrap();
    units.write_u8(GPS).unwrap();
    units.extend(padded("s#D", 16));
    units.extend(padded("F-G", 16));
    log.extend(record(UNITS, units));

    log.extend(mode(500_000, 4));
    for i in 1..=3u64 {
        let t = i * 1_000_000;
        log.extend(att(t, (i * 100) as i16));
        log.extend(gps(t + 1, 0, 473_000_000 + i as i32));
        log.extend(gps(t + 2, 1, 474_000_000 + i as i32));
        log.extend(imu(t + 3, i as f32));
    }
    log
}

fn tlog_frame(timestamp_us: u64, message_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u64::<BigEndian>(timestamp_us).unwrap();
    out.extend([0xFE, payload.len() as u8, 0, 1, 1, message_id]);
    out.extend_from_slice(payload);
    out.extend([0, 0]);
    out
}

/// Telemetry log with ATTITUDE at 1, 2 and 3 s after boot plus heartbeats
pub fn tlog_log() -> Vec<u8> {
    let mut log = Vec::new();
    for i in 1..=3u32 {
        let mut attitude = Vec::new();
        attitude.write_u32::<LittleEndian>(i * 1000).unwrap();
        for _ in 0..6 {
            attitude.write_f32::<LittleEndian>(0.5).unwrap();
        }
        let ts = 1_700_000_000_000_000 + i as u64 * 1_000_000;
        log.extend(tlog_frame(ts, 30, &attitude));
        log.extend(tlog_frame(ts + 10, 0, &[0, 0, 0, 0, 2, 3, 81, 4, 3]));
    }
    log
}

/// DJI flight record (version 3) with three OSD records, a home point and
/// one embedded JPEG
pub fn dji_log() -> Vec<u8> {
    fn record(record_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![record_type, payload.len() as u8];
        out.extend_from_slice(payload);
        out.push(0xFF);
        out
    }

    let mut body = Vec::new();
    for i in 0..3 {
        let mut osd = Vec::new();
        osd.write_f64::<LittleEndian>((8.5 + i as f64 * 0.1).to_radians()).unwrap();
        osd.write_f64::<LittleEndian>(47.25f64.to_radians()).unwrap();
        for value in [120i16 + i * 10, 5, -5, 0, 10, -10, 900] {
            osd.write_i16::<LittleEndian>(value).unwrap();
        }
        body.extend(record(1, &osd));
        if i == 0 {
            let mut home = Vec::new();
            home.write_f64::<LittleEndian>(8.5f64.to_radians()).unwrap();
            home.write_f64::<LittleEndian>(47.25f64.to_radians()).unwrap();
            home.write_f32::<LittleEndian>(410.0).unwrap();
            body.extend(record(2, &home));
            body.extend(record(57, DJI_JPEG));
        }
    }

    let mut log = Vec::new();
    log.write_u64::<LittleEndian>((12 + body.len()) as u64).unwrap();
    log.write_u16::<LittleEndian>(4).unwrap();
    log.extend([3, 0]);
    log.extend(body);
    log.extend(b"DJI\0");
    log
}

/// Image bytes embedded in [`dji_log`]
pub const DJI_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

pub const EXPORT_PATH: &str = "/api/process-flight-data";

/// Session config exporting to `server`
pub fn export_config(server: &MockServer) -> SessionConfig {
    SessionConfig::new().with_sink(SinkConfig::new(server.url(EXPORT_PATH)).with_timeout_ms(2000))
}

/// Export endpoint answering `status` to a JSON POST of `{"messages": messages}`
pub fn export_endpoint<'a>(
    server: &'a MockServer,
    messages: serde_json::Value,
    status: u16,
) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(POST)
            .path(EXPORT_PATH)
            .header("content-type", "application/json")
            .json_body(serde_json::json!({ "messages": messages }));
        then.status(status);
    })
}

/// The messages a complete parse of `file` exports
pub fn expected_export(file: Vec<u8>, kind: FormatKind) -> serde_json::Value {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();
    session.parse(LogFile::new(file, kind), &mut sink).unwrap();
    let surface = session.surface().unwrap();
    serde_json::Value::Object(ExportPayload::from_surface(&surface).messages)
}
