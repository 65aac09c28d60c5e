//! End-to-end parser session tests over synthetic logs

mod common;

use flight_log_decoder::{
    BackendMessage, ExportPayload, FieldData, FormatKind, LogFile, MessageTypeFilter,
    ParserSession, SessionState, TIME_FIELD,
};

fn batch_names(sink: &[BackendMessage]) -> Vec<String> {
    sink.iter()
        .filter_map(|m| match m {
            BackendMessage::Batch { message_type, .. } => Some(message_type.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_dataflash_session_with_builtin_filter() {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();

    session
        .parse(LogFile::new(common::dataflash_log(), FormatKind::Dataflash), &mut sink)
        .unwrap();
    assert_eq!(session.state(), SessionState::Ready);

    // IMU is not in the built-in filter
    let mut names = batch_names(&sink);
    names.sort();
    assert_eq!(names, vec!["ATT", "GPS[0]", "GPS[1]", "MODE"]);
    assert_eq!(sink.last(), Some(&BackendMessage::done_loading()));

    let surface = session.surface().unwrap();
    assert_eq!(
        surface.available_messages,
        vec!["ATT", "FMT", "FMTU", "GPS", "IMU", "MODE"]
    );
    let messages = surface.messages.unwrap();
    assert_eq!(
        messages["ATT"].field(TIME_FIELD),
        Some(&FieldData::Float64(vec![1000.0, 2000.0, 3000.0]))
    );
    assert_eq!(messages["GPS[1]"].len(), 3);
}

#[test]
fn test_dataflash_load_type_after_processing() {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();
    session
        .parse(LogFile::new(common::dataflash_log(), FormatKind::Dataflash), &mut sink)
        .unwrap();
    sink.clear();

    assert!(session.load_type("IMU", &mut sink).unwrap());
    assert_eq!(batch_names(&sink), vec!["IMU"]);
    assert!(session.loaded_types().contains("IMU"));
    assert_eq!(session.state(), SessionState::Ready);

    // Loading twice emits nothing new
    sink.clear();
    assert!(session.load_type("IMU", &mut sink).unwrap());
    assert!(sink.is_empty());

    // A type the log never declared is not recorded as loaded
    assert!(!session.load_type("BARO", &mut sink).unwrap());
    assert!(sink.is_empty());
    assert!(!session.loaded_types().contains("BARO"));
    assert_eq!(session.state(), SessionState::Ready);
}

#[test]
fn test_trim_is_monotonic_and_idempotent() {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();
    session
        .parse(LogFile::new(common::dataflash_log(), FormatKind::Dataflash), &mut sink)
        .unwrap();

    session.trim_file(1500.0).unwrap();
    let first = session.surface().unwrap();
    session.trim_file(1500.0).unwrap();
    session.trim_file(100.0).unwrap();
    assert_eq!(session.surface().unwrap(), first);

    let messages = first.messages.unwrap();
    assert_eq!(
        messages["ATT"].field(TIME_FIELD),
        Some(&FieldData::Float64(vec![2000.0, 3000.0]))
    );
    assert!(messages["MODE"].is_empty());

    // Types loaded after a trim come back already trimmed
    session.load_type("IMU", &mut sink).unwrap();
    let imu = &session.surface().unwrap().messages.unwrap()["IMU"];
    assert_eq!(imu.len(), 2);
}

#[test]
fn test_tlog_session_publishes_messages_list() {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();
    session
        .parse(LogFile::new(common::tlog_log(), FormatKind::Tlog), &mut sink)
        .unwrap();

    let surface = session.surface().unwrap();
    assert!(surface.messages.is_none());
    let list = surface.messages_list.clone().unwrap();
    assert_eq!(list["ATTITUDE"].len(), 3);

    // Export resolves the alternate name
    let payload = ExportPayload::from_surface(&surface);
    assert_eq!(
        payload.messages["ATTITUDE"]["time_boot_ms"],
        serde_json::json!([1000, 2000, 3000])
    );
    assert_eq!(
        payload.messages["HEARTBEAT"]["time_boot_ms"],
        serde_json::json!([1000.0, 2000.0, 3000.0])
    );
}

#[test]
fn test_reparse_discards_previous_result() {
    let mut session = ParserSession::new(MessageTypeFilter::builtin());
    let mut sink: Vec<BackendMessage> = Vec::new();
    session
        .parse(LogFile::new(common::dataflash_log(), FormatKind::Dataflash), &mut sink)
        .unwrap();
    session.load_type("IMU", &mut sink).unwrap();
    session.trim_file(1500.0).unwrap();

    session
        .parse(LogFile::new(common::tlog_log(), FormatKind::Tlog), &mut sink)
        .unwrap();
    assert_eq!(session.kind(), Some(FormatKind::Tlog));
    assert!(session.loaded_types().is_empty());
    assert_eq!(session.trim_cursor(), None);
}
