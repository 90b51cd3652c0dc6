use super::*;
use std::fs;

use lookout_protocol::protocol::FunctionId;

fn setup(content: &str) -> (tempfile::TempDir, LogTailService, String) {
    let dir = tempfile::tempdir().unwrap();
    let id = FunctionId::new("acme", "prod", "ingest");
    let path = id.log_path(dir.path(), 0);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, content).unwrap();
    let service = LogTailService::new(dir.path()).unwrap();
    (dir, service, path.to_string_lossy().into_owned())
}

fn read_request(file: &str, direction: ReadDirection, fwd: i64, bwd: i64) -> ReadRequest {
    ReadRequest {
        file: file.to_string(),
        direction,
        bytes: 2400,
        forward_index: fwd,
        backward_index: bwd,
    }
}

#[test]
fn backward_read_from_defaults_returns_tail() {
    let (_dir, service, file) = setup("one\ntwo\nthree\n");
    let page = service
        .read(&read_request(&file, ReadDirection::Backward, 0, 0))
        .unwrap();
    assert_eq!(page.logs, "one\ntwo\nthree\n");
    assert_eq!(page.backward_index, 0);
    // The untouched forward cursor is reported so the caller can follow
    assert_eq!(page.forward_index, 14);
}

#[test]
fn forward_read_reports_both_positions() {
    let (_dir, service, file) = setup("one\ntwo\nthree\n");
    let page = service
        .read(&read_request(&file, ReadDirection::Forward, 4, 0))
        .unwrap();
    assert_eq!(page.logs, "two\nthree\n");
    assert_eq!(page.forward_index, 14);
    assert_eq!(page.backward_index, 14);
}

#[test]
fn forward_read_with_nothing_new_is_empty_page() {
    let (_dir, service, file) = setup("one\n");
    let page = service
        .read(&read_request(&file, ReadDirection::Forward, 4, 0))
        .unwrap();
    assert!(page.is_empty());
    assert_eq!(page.forward_index, 4);
}

#[test]
fn oversized_page_is_rejected_before_reading() {
    let (_dir, service, file) = setup("one\n");
    let mut request = read_request(&file, ReadDirection::Forward, 0, 0);
    request.bytes = MAX_PAGE_BYTES + 1;

    let err = service.read(&request).unwrap_err();
    assert!(matches!(err, ServiceError::PageTooLarge { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    request.bytes = MAX_PAGE_BYTES;
    assert!(service.read(&request).is_ok());
}

#[test]
fn missing_file_is_not_found() {
    let (dir, service, _file) = setup("x\n");
    let missing = dir.path().join("acme/prod/ingest/ingest-9.log");
    let err = service
        .read(&read_request(
            &missing.to_string_lossy(),
            ReadDirection::Backward,
            0,
            0,
        ))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound, "got {}", err);
}

#[test]
fn file_outside_root_is_rejected() {
    let (_dir, service, _file) = setup("x\n");
    let other = tempfile::tempdir().unwrap();
    let outside = other.path().join("secret.log");
    fs::write(&outside, "secret\n").unwrap();

    let err = service
        .read(&read_request(
            &outside.to_string_lossy(),
            ReadDirection::Backward,
            0,
            0,
        ))
        .unwrap_err();
    assert!(matches!(err, ServiceError::OutsideLogRoot(_)), "got {}", err);
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[test]
fn parent_dir_escape_is_rejected() {
    let (dir, service, _file) = setup("x\n");
    let escape = dir.path().join("acme/../../etc/passwd-does-not-exist");
    let err = service
        .read(&read_request(
            &escape.to_string_lossy(),
            ReadDirection::Backward,
            0,
            0,
        ))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest, "got {}", err);
}

#[test]
fn missing_log_root_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let err = LogTailService::new(dir.path().join("nope")).unwrap_err();
    assert!(matches!(err, ServiceError::LogRoot { .. }));
}

#[tokio::test]
async fn handle_read_log_returns_page() {
    let (_dir, service, file) = setup("a\nb\n");
    let response = service
        .handle(Request::ReadLog(read_request(
            &file,
            ReadDirection::Backward,
            0,
            0,
        )))
        .await;
    match response {
        Response::Ok {
            data: Some(ResponseData::Page(page)),
            ..
        } => assert_eq!(page.logs, "a\nb\n"),
        other => panic!("Expected page, got {:?}", other),
    }
}

#[tokio::test]
async fn handle_incomplete_line_is_io_error() {
    let (_dir, service, file) = setup("a\n");
    // Unterminated data after the forward cursor
    fs::write(&file, "a\nunterminated").unwrap();
    let response = service
        .handle(Request::ReadLog(read_request(
            &file,
            ReadDirection::Forward,
            2,
            0,
        )))
        .await;
    assert!(
        matches!(response, Response::Error { kind: ErrorKind::Io, .. }),
        "got {:?}",
        response
    );
}

#[tokio::test]
async fn handle_rejects_gateway_requests() {
    let (_dir, service, _file) = setup("a\n");
    let response = service
        .handle(Request::CountFunctions {
            tenant: "acme".into(),
        })
        .await;
    assert!(matches!(
        response,
        Response::Error {
            kind: ErrorKind::InvalidRequest,
            ..
        }
    ));
}

#[tokio::test]
async fn handle_ping() {
    let (_dir, service, _file) = setup("a\n");
    assert!(matches!(service.handle(Request::Ping).await, Response::Ok { .. }));
}
