use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;
use tracklog_core::{
    LogMetadata, SessionError, SessionRegistry, SessionService, SessionStore,
    UPLOAD_KEY_HEX_LENGTH,
};

fn service_in(root: &Path) -> SessionService {
    SessionService::new(
        Arc::new(SessionRegistry::new()),
        SessionStore::new(root.join("uploads")),
    )
}

fn read_log(path: &Path) -> Result<(String, Vec<String>)> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines().map(str::to_string);
    let metadata = lines.next().unwrap_or_default();
    Ok((metadata, lines.collect()))
}

#[test]
fn batches_keep_contiguous_indices_and_immutable_metadata() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path());
    let issued = service.issue_key()?;
    let key = Some(issued.key.as_str());

    let first = service.upload(
        key,
        &b"{\"trackerKey\":\"headset\",\"timestamp\":1}\n{\"trackerKey\":\"left\",\"timestamp\":2}\n"[..],
        "test-agent",
    )?;
    assert_eq!(first.records, 2);
    assert_eq!(first.upload_name, issued.name);

    let (metadata_line, records) = read_log(&first.file_path)?;
    let metadata: LogMetadata = serde_json::from_str(&metadata_line)?;
    assert_eq!(metadata.upload_key, issued.key.as_str());
    assert_eq!(metadata.upload_name, issued.name);
    assert_eq!(metadata.user_agent, "test-agent");
    assert_eq!(records.len(), 2);

    let second = service.upload(
        key,
        &b"{\"trackerKey\":\"right\",\"timestamp\":3}"[..],
        "other-agent",
    )?;
    assert_eq!(second.file_path, first.file_path);

    let (metadata_after, records) = read_log(&first.file_path)?;
    assert_eq!(metadata_after, metadata_line);
    assert_eq!(
        records,
        vec![
            r#"1,{"trackerKey":"headset","timestamp":1}"#,
            r#"2,{"trackerKey":"left","timestamp":2}"#,
            r#"3,{"trackerKey":"right","timestamp":3}"#,
        ]
    );
    Ok(())
}

#[test]
fn rejected_batch_leaves_existing_log_untouched() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path());
    let issued = service.issue_key()?;
    let key = Some(issued.key.as_str());

    let receipt = service.upload(key, &b"{\"a\":1}"[..], "agent")?;
    let before = fs::read(&receipt.file_path)?;

    let err = service
        .upload(key, &b"{\"a\":2}\n{\"a\":\n{\"a\":3}"[..], "agent")
        .unwrap_err();
    match err {
        SessionError::InvalidRecord { line, .. } => assert_eq!(line, 2),
        other => panic!("expected invalid record, got {other:?}"),
    }

    assert_eq!(fs::read(&receipt.file_path)?, before);
    Ok(())
}

#[test]
fn follow_cursor_progression() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path());
    let issued = service.issue_key()?;
    let key = Some(issued.key.as_str());

    let empty = service.follow(key, None)?;
    assert!(!empty.has_new_data());
    assert_eq!(empty.position, 0);

    service.upload(key, &b"{\"a\":1}\n{\"a\":2}\n"[..], "agent")?;

    let all = service.follow(key, Some("0"))?;
    assert!(all.has_new_data());
    assert_eq!(all.position, 2);
    assert_eq!(all.body(), "1,{\"a\":1}\n2,{\"a\":2}");

    let caught_up = service.follow(key, Some("2"))?;
    assert!(!caught_up.has_new_data());
    assert_eq!(caught_up.position, 2);
    assert_eq!(service.follow(key, Some("2"))?, caught_up);

    service.upload(key, &b"{\"a\":3}"[..], "agent")?;

    let fresh = service.follow(key, Some("2"))?;
    assert_eq!(fresh.position, 3);
    assert_eq!(fresh.body(), "3,{\"a\":3}");
    Ok(())
}

#[test]
fn only_issued_keys_are_admitted() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path());
    let other_registry = SessionRegistry::new();
    let foreign = other_registry.issue()?;

    assert!(matches!(
        service.follow(Some(foreign.as_str()), None),
        Err(SessionError::UnknownKey)
    ));
    assert!(matches!(
        service.upload(None, &b"{}"[..], "agent"),
        Err(SessionError::MissingKey)
    ));
    assert!(matches!(
        service.upload(Some("abc"), &b"{}"[..], "agent"),
        Err(SessionError::InvalidKeyLength { .. })
    ));
    let not_hex = "g".repeat(UPLOAD_KEY_HEX_LENGTH);
    assert!(matches!(
        service.upload(Some(&not_hex), &b"{}"[..], "agent"),
        Err(SessionError::InvalidKeyFormat)
    ));
    assert!(!dir.path().join("uploads").exists());
    Ok(())
}

#[test]
fn uppercase_key_resolves_to_same_session() -> Result<()> {
    let dir = tempdir()?;
    let service = service_in(dir.path());
    let issued = service.issue_key()?;
    let shouted = issued.key.as_str().to_uppercase();

    service.upload(Some(&shouted), &b"{\"a\":1}"[..], "agent")?;
    let outcome = service.follow(Some(issued.key.as_str()), None)?;
    assert_eq!(outcome.position, 1);
    Ok(())
}
