//! Proprietary drone flight record backend (DJI `.txt` flight records)
//!
//! The file starts with a small header:
//!
//! | offset | size | content |
//! |--------|------|---------|
//! | 0      | 8    | end offset of the record area (u64 LE) |
//! | 8      | 2    | length of the trailing details block (u16 LE) |
//! | 10     | 1    | file version |
//!
//! Records follow at offset 12 and are framed as `type, length, payload, 0xFF`.
//! Records of files with version 6 or later are scrambled; they are indexed
//! and listed but not decoded.

use super::{trim_messages, LogBackend, MessageSink, ProgressReporter};
use crate::config::MessageTypeFilter;
use crate::types::{
    BackendMessage, EmbeddedFile, FieldData, FlightLogError, FormatKind, Message, MessageMap,
    Metadata, Result, ResultSurface, TIME_FIELD,
};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;

const HEADER_LEN: usize = 12;
const VERSION_OFFSET: usize = 10;
const FIRST_SCRAMBLED_VERSION: u8 = 6;
const RECORD_END: u8 = 0xFF;

const TYPE_OSD: u8 = 1;
const TYPE_HOME: u8 = 2;
const TYPE_JPEG: u8 = 57;

const OSD_LEN: usize = 30;
const HOME_LEN: usize = 20;
/// OSD records are written at 10 Hz
const OSD_INTERVAL_MS: f64 = 100.0;

fn record_name(record_type: u8) -> String {
    let name = match record_type {
        1 => "OSD",
        2 => "HOME",
        3 => "GIMBAL",
        4 => "RC",
        5 => "CUSTOM",
        6 => "DEFORM",
        7 => "CENTER_BATTERY",
        8 => "SMART_BATTERY",
        9 => "APP_TIP",
        10 => "APP_WARN",
        11 => "RC_GPS",
        13 => "RECOVER",
        14 => "APP_GPS",
        15 => "FIRMWARE",
        40 => "COMPONENT",
        57 => "JPEG",
        other => return format!("TYPE_{}", other),
    };
    name.to_string()
}

fn read_scaled(raw: &[u8]) -> f64 {
    LittleEndian::read_i16(raw) as f64 * 0.1
}

/// Aircraft state columns
#[derive(Default)]
struct OsdColumns {
    time: Vec<f64>,
    longitude: Vec<f64>,
    latitude: Vec<f64>,
    height: Vec<f64>,
    x_speed: Vec<f64>,
    y_speed: Vec<f64>,
    z_speed: Vec<f64>,
    pitch: Vec<f64>,
    roll: Vec<f64>,
    yaw: Vec<f64>,
}

impl OsdColumns {
    fn push(&mut self, time: f64, payload: &[u8]) {
        self.time.push(time);
        self.longitude.push(LittleEndian::read_f64(&payload[0..8]).to_degrees());
        self.latitude.push(LittleEndian::read_f64(&payload[8..16]).to_degrees());
        self.height.push(read_scaled(&payload[16..18]));
        self.x_speed.push(read_scaled(&payload[18..20]));
        self.y_speed.push(read_scaled(&payload[20..22]));
        self.z_speed.push(read_scaled(&payload[22..24]));
        self.pitch.push(read_scaled(&payload[24..26]));
        self.roll.push(read_scaled(&payload[26..28]));
        self.yaw.push(read_scaled(&payload[28..30]));
    }

    fn into_message(self) -> Message {
        Message::new()
            .with_field(TIME_FIELD, FieldData::Float64(self.time))
            .with_field("longitude", FieldData::Float64(self.longitude))
            .with_field("latitude", FieldData::Float64(self.latitude))
            .with_field("height", FieldData::Float64(self.height))
            .with_field("xSpeed", FieldData::Float64(self.x_speed))
            .with_field("ySpeed", FieldData::Float64(self.y_speed))
            .with_field("zSpeed", FieldData::Float64(self.z_speed))
            .with_field("pitch", FieldData::Float64(self.pitch))
            .with_field("roll", FieldData::Float64(self.roll))
            .with_field("yaw", FieldData::Float64(self.yaw))
    }
}

/// Home point columns
#[derive(Default)]
struct HomeColumns {
    time: Vec<f64>,
    longitude: Vec<f64>,
    latitude: Vec<f64>,
    height: Vec<f32>,
}

impl HomeColumns {
    fn push(&mut self, time: f64, payload: &[u8]) {
        self.time.push(time);
        self.longitude.push(LittleEndian::read_f64(&payload[0..8]).to_degrees());
        self.latitude.push(LittleEndian::read_f64(&payload[8..16]).to_degrees());
        self.height.push(LittleEndian::read_f32(&payload[16..20]));
    }

    fn into_message(self) -> Message {
        Message::new()
            .with_field(TIME_FIELD, FieldData::Float64(self.time))
            .with_field("longitude", FieldData::Float64(self.longitude))
            .with_field("latitude", FieldData::Float64(self.latitude))
            .with_field("height", FieldData::Float32(self.height))
    }
}

/// Backend for proprietary drone flight records
pub struct ProprietaryBackend {
    data: Vec<u8>,
    messages: MessageMap,
    files: Vec<EmbeddedFile>,
    metadata: Metadata,
    available: Vec<String>,
}

impl ProprietaryBackend {
    /// Create a backend over `data`; nothing is parsed until `process_data`
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            messages: MessageMap::new(),
            files: Vec::new(),
            metadata: Metadata::new(),
            available: Vec::new(),
        }
    }
}

impl LogBackend for ProprietaryBackend {
    fn kind(&self) -> FormatKind {
        FormatKind::Proprietary
    }

    fn process_data(
        &mut self,
        _filter: Option<&MessageTypeFilter>,
        sink: &mut dyn MessageSink,
    ) -> Result<()> {
        let data = &self.data;
        log::info!("Parsing flight record ({} bytes)", data.len());

        if data.len() < HEADER_LEN {
            return Err(FlightLogError::DecodeFailure(format!(
                "Flight record too short for header: {} bytes",
                data.len()
            )));
        }

        let records_end = LittleEndian::read_u64(&data[0..8]);
        let details_len = LittleEndian::read_u16(&data[8..10]);
        let version = data[VERSION_OFFSET];
        let scrambled = version >= FIRST_SCRAMBLED_VERSION;

        let truncated = records_end > data.len() as u64;
        let end = if truncated || records_end < HEADER_LEN as u64 {
            data.len()
        } else {
            records_end as usize
        };
        if truncated {
            log::warn!(
                "Record area ends at {} but file has only {} bytes",
                records_end,
                data.len()
            );
        }
        if scrambled {
            log::warn!("Flight record version {} is scrambled, records are listed only", version);
        }

        let mut progress = ProgressReporter::new(end);
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        let mut osd = OsdColumns::default();
        let mut home = HomeColumns::default();
        let mut files = Vec::new();
        let mut current_time = 0.0;
        let mut records = 0usize;
        let mut skipped_bytes = 0usize;
        let mut pos = HEADER_LEN;

        while pos + 2 <= end {
            let record_type = data[pos];
            let length = data[pos + 1] as usize;
            let payload_start = pos + 2;
            let terminator = payload_start + length;

            if terminator >= end || data[terminator] != RECORD_END {
                pos += 1;
                skipped_bytes += 1;
                continue;
            }

            let payload = &data[payload_start..terminator];
            records += 1;
            *counts.entry(record_type).or_default() += 1;

            if !scrambled {
                match record_type {
                    TYPE_OSD if length >= OSD_LEN => {
                        current_time = osd.time.len() as f64 * OSD_INTERVAL_MS;
                        osd.push(current_time, payload);
                    }
                    TYPE_HOME if length >= HOME_LEN => home.push(current_time, payload),
                    TYPE_JPEG if !payload.is_empty() => files.push(EmbeddedFile {
                        name: format!("image_{}.jpg", files.len()),
                        mime: "image/jpeg".to_string(),
                        data: payload.to_vec(),
                    }),
                    _ => {}
                }
            }

            pos = terminator + 1;
            progress.update(pos, sink);
        }
        progress.finish(sink);

        log::info!(
            "Read {} flight records ({} bytes skipped, {} images)",
            records,
            skipped_bytes,
            files.len()
        );

        let mut messages = MessageMap::new();
        if !osd.time.is_empty() {
            messages.insert(record_name(TYPE_OSD), osd.into_message());
        }
        if !home.time.is_empty() {
            messages.insert(record_name(TYPE_HOME), home.into_message());
        }

        let mut metadata = Metadata::new();
        metadata.insert("format".into(), FormatKind::Proprietary.as_str().into());
        metadata.insert("bytes".into(), data.len().into());
        metadata.insert("version".into(), version.into());
        metadata.insert("detailsLength".into(), details_len.into());
        metadata.insert("records".into(), records.into());
        metadata.insert("skippedBytes".into(), skipped_bytes.into());
        metadata.insert("scrambled".into(), scrambled.into());
        metadata.insert("truncated".into(), truncated.into());

        self.available = counts.keys().map(|t| record_name(*t)).collect();
        self.messages = messages;
        self.files = files;
        self.metadata = metadata;

        sink.post(BackendMessage::AvailableMessages {
            available_messages: self.available.clone(),
        });
        sink.post(BackendMessage::Metadata {
            metadata: self.metadata.clone(),
        });
        if !self.files.is_empty() {
            sink.post(BackendMessage::Files {
                files: self.files.clone(),
            });
        }
        sink.post(BackendMessage::Bulk {
            messages: self.messages.clone(),
        });
        Ok(())
    }

    fn trim_file(&mut self, timestamp: f64) {
        let removed = trim_messages(&mut self.messages, timestamp);
        log::debug!("Trimmed {} rows before {} ms", removed, timestamp);
    }

    fn surface(&self) -> ResultSurface {
        ResultSurface {
            metadata: self.metadata.clone(),
            messages: Some(self.messages.clone()),
            messages_list: None,
            files: self.files.clone(),
            available_messages: self.available.clone(),
        }
    }
}
