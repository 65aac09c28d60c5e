//! DataFlash (.bin) flight-controller log backend
//!
//! DataFlash logs are self-describing. Every record starts with the sync bytes
//! `0xA3 0x95` followed by a type id, and `FMT` records (type 128) declare the
//! length, name, field format string and column names of every other type.
//! `FMTU` records additionally mark an instance column with the `#` unit,
//! which splits one type into `NAME[0]`, `NAME[1]`, ...
//!
//! ## Decoding strategy
//! - `process_data` scans the whole buffer once, indexing record offsets per
//!   type, then decodes only the types named by the filter
//! - `load_type` decodes a skipped type later from the same index
//! - bytes that do not start a known record are skipped until the next sync
//!
//! ## Format characters
//! `b B h H i I f d q Q` are stored with their native width, `c C e E` are
//! scaled by 1/100, `L` (lat/lng) by 1e-7, `M` (flight mode) is a byte,
//! `n N Z` are strings and `a` is an array of 32 int16.

use super::{trim_messages, LogBackend, MessageSink, ProgressReporter};
use crate::config::MessageTypeFilter;
use crate::types::{
    BackendMessage, FieldData, FlightLogError, FormatKind, Message, MessageMap, Metadata, Result,
    ResultSurface, TIME_FIELD,
};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Record sync bytes
const SYNC: [u8; 2] = [0xA3, 0x95];
/// Sync bytes + type id
const HEADER_LEN: usize = 3;
const FMT_TYPE: u8 = 0x80;
const FMT_LEN: usize = 89;
const UNITS_NAME: &str = "FMTU";
const INSTANCE_UNIT: u8 = b'#';

/// Size in bytes of one field with the given format character
fn field_size(format_char: u8) -> Option<usize> {
    match format_char {
        b'b' | b'B' | b'M' => Some(1),
        b'h' | b'H' | b'c' | b'C' => Some(2),
        b'i' | b'I' | b'f' | b'e' | b'E' | b'L' | b'n' => Some(4),
        b'd' | b'q' | b'Q' => Some(8),
        b'N' => Some(16),
        b'Z' | b'a' => Some(64),
        _ => None,
    }
}

/// NUL-terminated ASCII field
fn read_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

/// Layout of one message type, as declared by its FMT record
#[derive(Debug, Clone)]
struct MessageFormat {
    type_id: u8,
    /// Total record length including the header
    length: usize,
    name: String,
    format: Vec<u8>,
    columns: Vec<String>,
    /// Byte offset of each field within the record body
    offsets: Vec<usize>,
    /// Column holding the sensor instance, from FMTU
    instance_column: Option<usize>,
}

impl MessageFormat {
    fn new(type_id: u8, length: usize, name: &str, format: &str, columns: &str) -> Option<Self> {
        let format = format.as_bytes().to_vec();
        let columns: Vec<String> = columns
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();

        if columns.len() != format.len() {
            log::warn!(
                "Format for {} declares {} fields but {} columns, skipping type",
                name,
                format.len(),
                columns.len()
            );
            return None;
        }

        let mut offsets = Vec::with_capacity(format.len());
        let mut body_len = 0;
        for &c in &format {
            let Some(size) = field_size(c) else {
                log::warn!("Unknown format character {:?} in {}, skipping type", c as char, name);
                return None;
            };
            offsets.push(body_len);
            body_len += size;
        }

        if body_len + HEADER_LEN != length {
            log::warn!(
                "Format for {} declares length {} but fields need {}, skipping type",
                name,
                length,
                body_len + HEADER_LEN
            );
            return None;
        }

        Some(Self {
            type_id,
            length,
            name: name.to_string(),
            format,
            columns,
            offsets,
            instance_column: None,
        })
    }

    /// The FMT record's own layout, known before any FMT is read
    fn bootstrap() -> Self {
        Self {
            type_id: FMT_TYPE,
            length: FMT_LEN,
            name: "FMT".to_string(),
            format: b"BBnNZ".to_vec(),
            columns: ["Type", "Length", "Name", "Format", "Columns"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            offsets: vec![0, 1, 2, 6, 22],
            instance_column: None,
        }
    }

    /// Parse the body of a FMT record
    fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < FMT_LEN - HEADER_LEN {
            return None;
        }
        Self::new(
            body[0],
            body[1] as usize,
            &read_text(&body[2..6]),
            &read_text(&body[6..22]),
            &read_text(&body[22..86]),
        )
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Raw bytes of column `index` inside a record body
    fn field<'a>(&self, body: &'a [u8], index: usize) -> &'a [u8] {
        let start = self.offsets[index];
        let size = field_size(self.format[index]).unwrap_or(0);
        &body[start..start + size]
    }
}

/// Empty column able to hold values of the given format character
fn empty_column(format_char: u8, capacity: usize) -> FieldData {
    match format_char {
        b'b' => FieldData::Int8(Vec::with_capacity(capacity)),
        b'B' | b'M' => FieldData::Uint8(Vec::with_capacity(capacity)),
        b'h' => FieldData::Int16(Vec::with_capacity(capacity)),
        b'H' => FieldData::Uint16(Vec::with_capacity(capacity)),
        b'i' => FieldData::Int32(Vec::with_capacity(capacity)),
        b'I' => FieldData::Uint32(Vec::with_capacity(capacity)),
        b'f' => FieldData::Float32(Vec::with_capacity(capacity)),
        b'q' => FieldData::Int64(Vec::with_capacity(capacity)),
        b'Q' => FieldData::Uint64(Vec::with_capacity(capacity)),
        b'n' | b'N' | b'Z' => FieldData::Text(Vec::with_capacity(capacity)),
        b'a' => FieldData::Value(serde_json::Value::Array(Vec::with_capacity(capacity))),
        // d, and the scaled c C e E L
        _ => FieldData::Float64(Vec::with_capacity(capacity)),
    }
}

/// Append one raw field to its column
fn push_field(column: &mut FieldData, format_char: u8, raw: &[u8]) {
    match (column, format_char) {
        (FieldData::Int8(v), _) => v.push(raw[0] as i8),
        (FieldData::Uint8(v), _) => v.push(raw[0]),
        (FieldData::Int16(v), _) => v.push(LittleEndian::read_i16(raw)),
        (FieldData::Uint16(v), _) => v.push(LittleEndian::read_u16(raw)),
        (FieldData::Int32(v), _) => v.push(LittleEndian::read_i32(raw)),
        (FieldData::Uint32(v), _) => v.push(LittleEndian::read_u32(raw)),
        (FieldData::Float32(v), _) => v.push(LittleEndian::read_f32(raw)),
        (FieldData::Int64(v), _) => v.push(LittleEndian::read_i64(raw)),
        (FieldData::Uint64(v), _) => v.push(LittleEndian::read_u64(raw)),
        (FieldData::Float64(v), b'c') => v.push(LittleEndian::read_i16(raw) as f64 / 100.0),
        (FieldData::Float64(v), b'C') => v.push(LittleEndian::read_u16(raw) as f64 / 100.0),
        (FieldData::Float64(v), b'e') => v.push(LittleEndian::read_i32(raw) as f64 / 100.0),
        (FieldData::Float64(v), b'E') => v.push(LittleEndian::read_u32(raw) as f64 / 100.0),
        (FieldData::Float64(v), b'L') => v.push(LittleEndian::read_i32(raw) as f64 * 1e-7),
        (FieldData::Float64(v), _) => v.push(LittleEndian::read_f64(raw)),
        (FieldData::Text(v), _) => v.push(read_text(raw)),
        (FieldData::Value(serde_json::Value::Array(rows)), _) => {
            let values: Vec<i16> = raw.chunks_exact(2).map(|c| LittleEndian::read_i16(c)).collect();
            rows.push(serde_json::json!(values));
        }
        (FieldData::Value(_), _) => {}
    }
}

/// Result of the indexing pass over the raw buffer
#[derive(Debug, Default)]
struct LogIndex {
    formats: HashMap<u8, MessageFormat>,
    /// Record body offsets per type id
    offsets: HashMap<u8, Vec<usize>>,
    /// Type name → type id, for types that have records
    names: BTreeMap<String, u8>,
    records: usize,
    skipped_bytes: usize,
    truncated: bool,
}

/// Backend for DataFlash logs with deferred per-type decoding
pub struct DataflashBackend {
    data: Vec<u8>,
    index: Option<LogIndex>,
    messages: MessageMap,
    /// Base type names decoded so far
    loaded: BTreeSet<String>,
    metadata: Metadata,
    trim_cursor: Option<f64>,
}

impl DataflashBackend {
    /// Create a backend over `data`; nothing is parsed until `process_data`
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            index: None,
            messages: MessageMap::new(),
            loaded: BTreeSet::new(),
            metadata: Metadata::new(),
            trim_cursor: None,
        }
    }

    /// Walk the buffer once, registering formats and record offsets
    fn scan(&self, sink: &mut dyn MessageSink) -> Result<LogIndex> {
        let data = &self.data;
        let mut index = LogIndex::default();
        index.formats.insert(FMT_TYPE, MessageFormat::bootstrap());
        let mut units: Vec<(u8, String)> = Vec::new();
        let mut progress = ProgressReporter::new(data.len());
        let mut pos = 0;

        while pos + HEADER_LEN <= data.len() {
            if data[pos] != SYNC[0] || data[pos + 1] != SYNC[1] {
                pos += 1;
                index.skipped_bytes += 1;
                continue;
            }

            let type_id = data[pos + 2];
            let Some(format) = index.formats.get(&type_id) else {
                log::trace!("Unknown record type {} at offset {}", type_id, pos);
                pos += 1;
                index.skipped_bytes += 1;
                continue;
            };

            let length = format.length;
            if pos + length > data.len() {
                log::warn!("Truncated {} record at offset {}", format.name, pos);
                index.truncated = true;
                break;
            }

            let body = &data[pos + HEADER_LEN..pos + length];
            if format.name == UNITS_NAME {
                if let Some(entry) = read_units(format, body) {
                    units.push(entry);
                }
            }
            if type_id == FMT_TYPE {
                if let Some(declared) = MessageFormat::parse(body) {
                    log::trace!("FMT {} -> {}", declared.type_id, declared.name);
                    let has_records = |id: u8| index.offsets.get(&id).is_some_and(|o| !o.is_empty());
                    match declared.type_id {
                        FMT_TYPE => {}
                        // Records already indexed keep the layout they were read with
                        id if has_records(id) => log::warn!(
                            "Ignoring FMT redeclaring type {} as {} after its records",
                            id,
                            declared.name
                        ),
                        id => {
                            index.formats.insert(id, declared);
                        }
                    }
                }
            }

            index.offsets.entry(type_id).or_default().push(pos + HEADER_LEN);
            index.records += 1;
            pos += length;
            progress.update(pos, sink);
        }
        progress.finish(sink);

        if index.formats.len() == 1 && !data.is_empty() {
            return Err(FlightLogError::DecodeFailure(
                "no FMT records found, not a DataFlash log".to_string(),
            ));
        }

        for (type_id, unit_ids) in units {
            if let Some(format) = index.formats.get_mut(&type_id) {
                format.instance_column = unit_ids
                    .bytes()
                    .position(|u| u == INSTANCE_UNIT)
                    .filter(|&i| i < format.format.len());
            }
        }

        for (type_id, offsets) in &index.offsets {
            if offsets.is_empty() {
                continue;
            }
            if let Some(format) = index.formats.get(type_id) {
                index.names.insert(format.name.clone(), *type_id);
            }
        }

        log::info!(
            "Indexed {} records of {} types ({} bytes skipped)",
            index.records,
            index.names.len(),
            index.skipped_bytes
        );
        Ok(index)
    }

    fn build_metadata(&self, index: &LogIndex) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("format".into(), FormatKind::Dataflash.as_str().into());
        metadata.insert("bytes".into(), self.data.len().into());
        metadata.insert("records".into(), index.records.into());
        metadata.insert("formats".into(), (index.formats.len() - 1).into());
        metadata.insert("skippedBytes".into(), index.skipped_bytes.into());
        metadata.insert("truncated".into(), index.truncated.into());
        metadata
    }

    /// Decode every record of one type, split by instance if it has one
    ///
    /// Returns `Ok(None)` when the log holds no records of that type.
    fn decode_type(&self, index: &LogIndex, name: &str) -> Result<Option<Vec<(String, Message)>>> {
        let Some(type_id) = index.names.get(name) else {
            return Ok(None);
        };
        let (Some(format), Some(offsets)) = (index.formats.get(type_id), index.offsets.get(type_id))
        else {
            return Ok(None);
        };

        let mut columns: Vec<FieldData> = format
            .format
            .iter()
            .map(|&c| empty_column(c, offsets.len()))
            .collect();

        for &start in offsets {
            let body = self
                .data
                .get(start..start + format.length - HEADER_LEN)
                .ok_or_else(|| {
                    FlightLogError::DecodeFailure(format!(
                        "{} record at offset {} runs past the end of the log",
                        format.name, start
                    ))
                })?;
            for (i, column) in columns.iter_mut().enumerate() {
                push_field(column, format.format[i], format.field(body, i));
            }
        }

        let mut message = Message::new();
        for (column_name, column) in format.columns.iter().zip(columns) {
            message.insert(column_name.clone(), column);
        }
        add_time_column(&mut message);

        let instance = format
            .instance_column
            .and_then(|i| message.field(&format.columns[i]))
            .filter(|column| column.is_numeric_array());

        let Some(instance) = instance else {
            return Ok(Some(vec![(format.name.clone(), message)]));
        };

        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for row in 0..instance.len().unwrap_or(0) {
            if let Some(value) = instance.value_at(row) {
                groups.entry(value as i64).or_default().push(row);
            }
        }

        Ok(Some(
            groups
                .into_iter()
                .map(|(id, rows)| (format!("{}[{}]", format.name, id), message.select_rows(&rows)))
                .collect(),
        ))
    }

    /// Decode a type, store it, and emit one batch per instance
    fn decode_and_emit(
        &mut self,
        index: &LogIndex,
        name: &str,
        sink: &mut dyn MessageSink,
    ) -> Result<bool> {
        let Some(parts) = self.decode_type(index, name)? else {
            log::debug!("No {} records in log", name);
            return Ok(false);
        };

        for (key, mut message) in parts {
            if let Some(cursor) = self.trim_cursor {
                message.trim_before(cursor);
            }
            log::debug!("Decoded {} ({} rows)", key, message.len());
            sink.post(BackendMessage::Batch {
                message_type: key.clone(),
                message_list: message.clone(),
            });
            self.messages.insert(key, message);
        }
        self.loaded.insert(name.to_string());
        Ok(true)
    }

    fn available_messages(&self) -> Vec<String> {
        self.index
            .as_ref()
            .map(|index| index.names.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Extract `(FmtType, UnitIds)` from an FMTU record
fn read_units(format: &MessageFormat, body: &[u8]) -> Option<(u8, String)> {
    let type_column = format.column_index("FmtType")?;
    let units_column = format.column_index("UnitIds")?;
    let type_id = *format.field(body, type_column).first()?;
    Some((type_id, read_text(format.field(body, units_column))))
}

/// Derive `time_boot_ms` from `TimeUS` (or the older `TimeMS`)
fn add_time_column(message: &mut Message) {
    let (source, divisor) = if message.field("TimeUS").is_some() {
        ("TimeUS", 1000.0)
    } else if message.field("TimeMS").is_some() {
        ("TimeMS", 1.0)
    } else {
        return;
    };

    let Some(column) = message.field(source) else {
        return;
    };
    let times: Vec<f64> = (0..column.len().unwrap_or(0))
        .filter_map(|i| column.value_at(i))
        .map(|t| t / divisor)
        .collect();
    message.insert(TIME_FIELD, FieldData::Float64(times));
}

impl LogBackend for DataflashBackend {
    fn kind(&self) -> FormatKind {
        FormatKind::Dataflash
    }

    fn process_data(
        &mut self,
        filter: Option<&MessageTypeFilter>,
        sink: &mut dyn MessageSink,
    ) -> Result<()> {
        log::info!("Parsing dataflash log ({} bytes)", self.data.len());

        let index = self.scan(sink)?;
        self.messages.clear();
        self.loaded.clear();
        self.metadata = self.build_metadata(&index);

        let available: Vec<String> = index.names.keys().cloned().collect();
        sink.post(BackendMessage::AvailableMessages {
            available_messages: available.clone(),
        });
        sink.post(BackendMessage::Metadata {
            metadata: self.metadata.clone(),
        });

        let wanted: Vec<String> = match filter {
            Some(filter) if !filter.is_empty() => {
                filter.names().into_iter().map(str::to_string).collect()
            }
            _ => available,
        };

        let mut decoded = 0;
        for name in &wanted {
            if self.decode_and_emit(&index, name, sink)? {
                decoded += 1;
            }
        }
        log::info!("Decoded {} of {} requested message types", decoded, wanted.len());

        self.index = Some(index);
        sink.post(BackendMessage::done_loading());
        Ok(())
    }

    fn load_type(&mut self, type_name: &str, sink: &mut dyn MessageSink) -> Result<bool> {
        let Some(index) = self.index.take() else {
            return Err(FlightLogError::DecodeFailure(
                "log has not been processed yet".to_string(),
            ));
        };

        let result = if self.loaded.contains(type_name) {
            log::debug!("{} already loaded", type_name);
            Ok(true)
        } else if !index.names.contains_key(type_name) {
            log::warn!("Message type {} not present in log", type_name);
            Ok(false)
        } else {
            self.decode_and_emit(&index, type_name, sink)
        };

        self.index = Some(index);
        result
    }

    fn trim_file(&mut self, timestamp: f64) {
        let cursor = self.trim_cursor.map_or(timestamp, |c| c.max(timestamp));
        self.trim_cursor = Some(cursor);
        let removed = trim_messages(&mut self.messages, cursor);
        log::debug!("Trimmed {} rows before {} ms", removed, cursor);
    }

    fn surface(&self) -> ResultSurface {
        ResultSurface {
            metadata: self.metadata.clone(),
            messages: Some(self.messages.clone()),
            messages_list: None,
            files: Vec::new(),
            available_messages: self.available_messages(),
        }
    }
}
