//! MAVLink telemetry log (.tlog) backend
//!
//! A tlog is a plain concatenation of MAVLink packets as received by a
//! ground station, each prefixed by an 8-byte big-endian timestamp in
//! microseconds since the Unix epoch.
//!
//! ## Supported packets
//! - MAVLink v1 (`0xFE`) and v2 (`0xFD`, including signed packets)
//! - v2 payloads truncated of trailing zeros are zero-padded back
//! - CRCs are not validated
//!
//! Only a fixed set of common messages is decoded; every other message id is
//! counted and listed in `availableMessages` without being decoded. The whole
//! log is decoded eagerly and published in one bulk batch.

use super::{trim_messages, LogBackend, MessageSink, ProgressReporter};
use crate::config::MessageTypeFilter;
use crate::types::{
    BackendMessage, FieldData, FormatKind, Message, MessageMap, Metadata, Result, ResultSurface,
    TIME_FIELD,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const TIMESTAMP_LEN: usize = 8;
const MAGIC_V1: u8 = 0xFE;
const MAGIC_V2: u8 = 0xFD;
const HEADER_LEN_V1: usize = 6;
const HEADER_LEN_V2: usize = 10;
const CRC_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const INCOMPAT_FLAG_SIGNED: u8 = 0x01;

/// Wire type of one MAVLink field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wire {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    F32,
    Chars(usize),
}

impl Wire {
    fn size(self) -> usize {
        match self {
            Wire::U8 | Wire::I8 => 1,
            Wire::U16 | Wire::I16 => 2,
            Wire::U32 | Wire::I32 | Wire::F32 => 4,
            Wire::U64 => 8,
            Wire::Chars(n) => n,
        }
    }

    fn empty_column(self) -> FieldData {
        match self {
            Wire::U8 => FieldData::Uint8(Vec::new()),
            Wire::I8 => FieldData::Int8(Vec::new()),
            Wire::U16 => FieldData::Uint16(Vec::new()),
            Wire::I16 => FieldData::Int16(Vec::new()),
            Wire::U32 => FieldData::Uint32(Vec::new()),
            Wire::I32 => FieldData::Int32(Vec::new()),
            Wire::U64 => FieldData::Uint64(Vec::new()),
            Wire::F32 => FieldData::Float32(Vec::new()),
            Wire::Chars(_) => FieldData::Text(Vec::new()),
        }
    }
}

/// Field layout of one decodable message, in wire order
struct MessageDef {
    id: u32,
    name: &'static str,
    fields: &'static [(&'static str, Wire)],
}

impl MessageDef {
    fn payload_len(&self) -> usize {
        self.fields.iter().map(|(_, wire)| wire.size()).sum()
    }

    fn has_boot_time(&self) -> bool {
        self.fields.iter().any(|(name, _)| *name == TIME_FIELD)
    }
}

const MESSAGES: &[MessageDef] = &[
    MessageDef {
        id: 0,
        name: "HEARTBEAT",
        fields: &[
            ("custom_mode", Wire::U32),
            ("type", Wire::U8),
            ("autopilot", Wire::U8),
            ("base_mode", Wire::U8),
            ("system_status", Wire::U8),
            ("mavlink_version", Wire::U8),
        ],
    },
    MessageDef {
        id: 1,
        name: "SYS_STATUS",
        fields: &[
            ("onboard_control_sensors_present", Wire::U32),
            ("onboard_control_sensors_enabled", Wire::U32),
            ("onboard_control_sensors_health", Wire::U32),
            ("load", Wire::U16),
            ("voltage_battery", Wire::U16),
            ("current_battery", Wire::I16),
            ("drop_rate_comm", Wire::U16),
            ("errors_comm", Wire::U16),
            ("errors_count1", Wire::U16),
            ("errors_count2", Wire::U16),
            ("errors_count3", Wire::U16),
            ("errors_count4", Wire::U16),
            ("battery_remaining", Wire::I8),
        ],
    },
    MessageDef {
        id: 24,
        name: "GPS_RAW_INT",
        fields: &[
            ("time_usec", Wire::U64),
            ("lat", Wire::I32),
            ("lon", Wire::I32),
            ("alt", Wire::I32),
            ("eph", Wire::U16),
            ("epv", Wire::U16),
            ("vel", Wire::U16),
            ("cog", Wire::U16),
            ("fix_type", Wire::U8),
            ("satellites_visible", Wire::U8),
        ],
    },
    MessageDef {
        id: 30,
        name: "ATTITUDE",
        fields: &[
            ("time_boot_ms", Wire::U32),
            ("roll", Wire::F32),
            ("pitch", Wire::F32),
            ("yaw", Wire::F32),
            ("rollspeed", Wire::F32),
            ("pitchspeed", Wire::F32),
            ("yawspeed", Wire::F32),
        ],
    },
    MessageDef {
        id: 33,
        name: "GLOBAL_POSITION_INT",
        fields: &[
            ("time_boot_ms", Wire::U32),
            ("lat", Wire::I32),
            ("lon", Wire::I32),
            ("alt", Wire::I32),
            ("relative_alt", Wire::I32),
            ("vx", Wire::I16),
            ("vy", Wire::I16),
            ("vz", Wire::I16),
            ("hdg", Wire::U16),
        ],
    },
    MessageDef {
        id: 74,
        name: "VFR_HUD",
        fields: &[
            ("airspeed", Wire::F32),
            ("groundspeed", Wire::F32),
            ("alt", Wire::F32),
            ("climb", Wire::F32),
            ("heading", Wire::I16),
            ("throttle", Wire::U16),
        ],
    },
    MessageDef {
        id: 253,
        name: "STATUSTEXT",
        fields: &[("severity", Wire::U8), ("text", Wire::Chars(50))],
    },
];

fn lookup(id: u32) -> Option<&'static MessageDef> {
    MESSAGES.iter().find(|def| def.id == id)
}

/// Append one wire value to its column
fn push_value(column: &mut FieldData, raw: &[u8]) {
    match column {
        FieldData::Uint8(v) => v.push(raw[0]),
        FieldData::Int8(v) => v.push(raw[0] as i8),
        FieldData::Uint16(v) => v.push(LittleEndian::read_u16(raw)),
        FieldData::Int16(v) => v.push(LittleEndian::read_i16(raw)),
        FieldData::Uint32(v) => v.push(LittleEndian::read_u32(raw)),
        FieldData::Int32(v) => v.push(LittleEndian::read_i32(raw)),
        FieldData::Uint64(v) => v.push(LittleEndian::read_u64(raw)),
        FieldData::Float32(v) => v.push(LittleEndian::read_f32(raw)),
        FieldData::Text(v) => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            v.push(String::from_utf8_lossy(&raw[..end]).to_string());
        }
        _ => {}
    }
}

/// Columns accumulated for one message type while scanning
struct ColumnSet {
    def: &'static MessageDef,
    columns: Vec<FieldData>,
    /// Filled only for messages that carry no boot time of their own
    boot_time: Vec<f64>,
}

impl ColumnSet {
    fn new(def: &'static MessageDef) -> Self {
        Self {
            def,
            columns: def.fields.iter().map(|(_, wire)| wire.empty_column()).collect(),
            boot_time: Vec::new(),
        }
    }

    fn push(&mut self, payload: &[u8]) {
        let mut offset = 0;
        for ((_, wire), column) in self.def.fields.iter().zip(self.columns.iter_mut()) {
            let size = wire.size();
            push_value(column, &payload[offset..offset + size]);
            offset += size;
        }
    }

    fn into_message(self) -> Message {
        let mut message = Message::new();
        for ((name, _), column) in self.def.fields.iter().zip(self.columns) {
            message.insert(*name, column);
        }
        if !self.def.has_boot_time() {
            message.insert(TIME_FIELD, FieldData::Float64(self.boot_time));
        }
        message
    }
}

/// Render a tlog timestamp as RFC 3339
fn format_timestamp(timestamp_us: u64) -> Option<String> {
    let secs = (timestamp_us / 1_000_000) as i64;
    let nsecs = ((timestamp_us % 1_000_000) * 1000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nsecs).map(|t| t.to_rfc3339())
}

/// Backend for MAVLink telemetry logs
pub struct TlogBackend {
    data: Vec<u8>,
    messages_list: MessageMap,
    metadata: Metadata,
    available: Vec<String>,
}

impl TlogBackend {
    /// Create a backend over `data`; nothing is parsed until `process_data`
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            messages_list: MessageMap::new(),
            metadata: Metadata::new(),
            available: Vec::new(),
        }
    }
}

impl LogBackend for TlogBackend {
    fn kind(&self) -> FormatKind {
        FormatKind::Tlog
    }

    fn process_data(
        &mut self,
        filter: Option<&MessageTypeFilter>,
        sink: &mut dyn MessageSink,
    ) -> Result<()> {
        log::info!("Parsing tlog ({} bytes)", self.data.len());
        if filter.is_some_and(|f| !f.is_empty()) {
            log::debug!("tlog backend decodes every message, ignoring type filter");
        }

        let data = &self.data;
        let mut progress = ProgressReporter::new(data.len());
        let mut sets: BTreeMap<&'static str, ColumnSet> = BTreeMap::new();
        let mut unknown: BTreeMap<u32, usize> = BTreeMap::new();
        let mut last_boot_ms: HashMap<u8, f64> = HashMap::new();
        let mut systems: BTreeSet<u8> = BTreeSet::new();
        let mut first_timestamp: Option<u64> = None;
        let mut last_timestamp: Option<u64> = None;
        let mut packets = 0usize;
        let mut skipped_bytes = 0usize;
        let mut truncated = false;
        let mut pos = 0;

        while pos + TIMESTAMP_LEN < data.len() {
            let frame = pos + TIMESTAMP_LEN;
            let (header_len, signed) = match data[frame] {
                MAGIC_V1 => (HEADER_LEN_V1, false),
                MAGIC_V2 if frame + 2 < data.len() => {
                    (HEADER_LEN_V2, data[frame + 2] & INCOMPAT_FLAG_SIGNED != 0)
                }
                MAGIC_V2 => {
                    truncated = true;
                    break;
                }
                _ => {
                    pos += 1;
                    skipped_bytes += 1;
                    continue;
                }
            };

            if frame + header_len > data.len() {
                truncated = true;
                break;
            }
            let payload_len = data[frame + 1] as usize;
            let total = header_len
                + payload_len
                + CRC_LEN
                + if signed { SIGNATURE_LEN } else { 0 };
            if frame + total > data.len() {
                log::warn!("Truncated MAVLink packet at offset {}", pos);
                truncated = true;
                break;
            }

            let (system_id, message_id) = if header_len == HEADER_LEN_V1 {
                (data[frame + 3], data[frame + 5] as u32)
            } else {
                (data[frame + 5], LittleEndian::read_u24(&data[frame + 7..frame + 10]))
            };
            let timestamp_us = BigEndian::read_u64(&data[pos..frame]);
            let payload = &data[frame + header_len..frame + header_len + payload_len];

            first_timestamp.get_or_insert(timestamp_us);
            last_timestamp = Some(timestamp_us);
            systems.insert(system_id);
            packets += 1;

            match lookup(message_id) {
                Some(def) => {
                    // v2 strips trailing zero bytes from the payload
                    let mut full = payload.to_vec();
                    full.resize(full.len().max(def.payload_len()), 0);

                    let set = sets.entry(def.name).or_insert_with(|| ColumnSet::new(def));
                    set.push(&full);

                    if def.has_boot_time() {
                        let boot_ms = LittleEndian::read_u32(&full[0..4]) as f64;
                        last_boot_ms.insert(system_id, boot_ms);
                    } else {
                        let boot_ms = last_boot_ms.get(&system_id).copied().unwrap_or(0.0);
                        set.boot_time.push(boot_ms);
                    }
                }
                None => *unknown.entry(message_id).or_default() += 1,
            }

            pos = frame + total;
            progress.update(pos, sink);
        }
        progress.finish(sink);

        log::info!(
            "Read {} MAVLink packets ({} undecoded, {} bytes skipped)",
            packets,
            unknown.values().sum::<usize>(),
            skipped_bytes
        );

        let mut available: Vec<String> = sets.keys().map(|name| name.to_string()).collect();
        available.extend(unknown.keys().map(|id| format!("MAVLINK_MSG_ID_{}", id)));

        let mut metadata = Metadata::new();
        metadata.insert("format".into(), FormatKind::Tlog.as_str().into());
        metadata.insert("bytes".into(), data.len().into());
        metadata.insert("packets".into(), packets.into());
        metadata.insert("unknownPackets".into(), unknown.values().sum::<usize>().into());
        metadata.insert("skippedBytes".into(), skipped_bytes.into());
        metadata.insert("truncated".into(), truncated.into());
        metadata.insert("systems".into(), systems.iter().copied().collect::<Vec<u8>>().into());
        if let Some(start) = first_timestamp.and_then(format_timestamp) {
            metadata.insert("startTime".into(), start.into());
        }
        if let Some(end) = last_timestamp.and_then(format_timestamp) {
            metadata.insert("endTime".into(), end.into());
        }

        self.messages_list = sets
            .into_values()
            .map(|set| (set.def.name.to_string(), set.into_message()))
            .collect();
        self.metadata = metadata;
        self.available = available;

        sink.post(BackendMessage::AvailableMessages {
            available_messages: self.available.clone(),
        });
        sink.post(BackendMessage::Metadata {
            metadata: self.metadata.clone(),
        });
        sink.post(BackendMessage::Bulk {
            messages: self.messages_list.clone(),
        });
        Ok(())
    }

    fn trim_file(&mut self, timestamp: f64) {
        let removed = trim_messages(&mut self.messages_list, timestamp);
        log::debug!("Trimmed {} rows before {} ms", removed, timestamp);
    }

    fn surface(&self) -> ResultSurface {
        ResultSurface {
            metadata: self.metadata.clone(),
            messages: None,
            messages_list: Some(self.messages_list.clone()),
            files: Vec::new(),
            available_messages: self.available.clone(),
        }
    }
}
