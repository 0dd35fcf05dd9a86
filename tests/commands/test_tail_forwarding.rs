//! Tests for forwarding followed file lines

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use telelog::testing::MockConnector;
use telelog::{Config, Logger, RecipientSource, Tail, TailOptions};

fn options() -> TailOptions {
    TailOptions {
        poll_interval: Duration::from_millis(20),
        ..TailOptions::default()
    }
}

#[tokio::test]
async fn test_followed_lines_become_messages() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("service.log");
    std::fs::write(&log, "started\n").unwrap();

    let config = Config {
        bot_token: "1:tok".into(),
        app_name: log.display().to_string(),
        ..Config::default()
    };
    let connector = Arc::new(MockConnector::new());
    let mut logger = Logger::connect(&config, connector.clone()).await.unwrap();
    logger.load_recipients([RecipientSource::bytes("11\n22")]);

    let mut tail = Tail::follow(&log, options()).await.unwrap();
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        writeln!(file, "connection refused").unwrap();
    }

    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(5), tail.next_line())
            .await
            .unwrap()
            .unwrap();
        logger.error(line);
    }
    logger.flush(Duration::from_secs(5)).await.unwrap();

    let sent = connector.transport().sent();
    assert_eq!(sent.len(), 4);
    let expected = format!(
        "🥴 [ERROR] {}\n\nMessage:\nconnection refused\n",
        log.display()
    );
    assert_eq!(sent.iter().filter(|(_, text)| *text == expected).count(), 2);
}

#[tokio::test]
async fn test_missing_file_cannot_be_followed() {
    let dir = tempfile::tempdir().unwrap();
    let result = Tail::follow(dir.path().join("absent.log"), options()).await;
    assert!(result.is_err());
}
