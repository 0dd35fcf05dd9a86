//! Tests for recipient list loading

use std::io::Cursor;
use std::sync::Arc;

use telelog::testing::MockConnector;
use telelog::{Config, Logger, RecipientSource, RecipientStore};

#[test]
fn test_scenario_invalid_line_is_skipped() {
    let mut store = RecipientStore::new();
    let added = store.load(RecipientSource::bytes("123\nabc\n456")).unwrap();
    assert_eq!(added, 2);
    assert_eq!(store.ids(), &[123, 456]);
}

#[test]
fn test_windows_line_endings_and_blank_lines() {
    let mut store = RecipientStore::new();
    store
        .load(RecipientSource::reader(Cursor::new(b"  1 \r\n\r\n\n-100200\r\n".to_vec())))
        .unwrap();
    assert_eq!(store.ids(), &[1, -100200]);
}

#[test]
fn test_positive_only_store_drops_group_ids() {
    let mut store = RecipientStore::positive_only();
    store.load(RecipientSource::bytes("5\n-5\n0\n6")).unwrap();
    assert_eq!(store.ids(), &[5, 6]);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let mut store = RecipientStore::new();
    let err = store
        .load(RecipientSource::path("/nonexistent/recipients.txt"))
        .unwrap_err();
    assert!(matches!(err, telelog::Error::Io(_)));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_logger_appends_sources_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.txt");
    std::fs::write(&first, "10\n20\n").unwrap();

    let mut logger = Logger::new(&Config::default(), Arc::new(MockConnector::new())).unwrap();
    let added = logger.load_recipients([
        RecipientSource::path(&first),
        RecipientSource::path(dir.path().join("missing.txt")),
        RecipientSource::bytes("30"),
    ]);

    assert_eq!(added, 3);
    assert_eq!(logger.recipients(), &[10, 20, 30]);
}

#[tokio::test]
async fn test_config_recipient_list_is_loaded_on_construction() {
    let dir = tempfile::tempdir().unwrap();
    let list = dir.path().join("recipients.txt");
    std::fs::write(&list, "7\nseven\n8\n").unwrap();

    let config = Config {
        recipient_list: Some(list),
        ..Config::default()
    };
    let logger = Logger::new(&config, Arc::new(MockConnector::new())).unwrap();
    assert_eq!(logger.recipients(), &[7, 8]);
}
