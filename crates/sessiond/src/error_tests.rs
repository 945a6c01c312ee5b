// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn http_status_mapping() {
    assert_eq!(ErrorCode::NotFound.http_status(), 404);
    assert_eq!(ErrorCode::NotReady.http_status(), 503);
    assert_eq!(ErrorCode::Busy.http_status(), 409);
    assert_eq!(ErrorCode::BadRequest.http_status(), 400);
    assert_eq!(ErrorCode::StartFailed.http_status(), 502);
    assert_eq!(ErrorCode::Internal.http_status(), 500);
}

#[test]
fn display_matches_as_str() {
    assert_eq!(ErrorCode::Busy.to_string(), "BUSY");
    assert_eq!(format!("{}", ErrorCode::NotFound), ErrorCode::NotFound.as_str());
}

#[test]
fn agent_error_display_includes_code_and_message() {
    let err = AgentError::busy("turn in progress");
    assert_eq!(err.to_string(), "BUSY: turn in progress");
}

#[test]
fn storage_error_maps_to_internal() {
    let storage_err = sessiond_storage::StorageError::NotFound("session");
    let err: AgentError = storage_err.into();
    assert_eq!(err.code, ErrorCode::Internal);
}
