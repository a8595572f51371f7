use crate::{Config, ENCODING_ENV_VAR, LAUNCH_CONTEXT_ENV_VAR};

use std::path::Path;

use googletest::assert_that;
use googletest::prelude::{anything, eq, err, ok};

// =========================================================================
// Validation Tests - Service
// =========================================================================

#[test]
fn given_empty_mode_when_validate_then_error() {
    // Given
    let mut config = Config::default();
    config.service.mode = "  ".into();

    // When
    let result = config.validate();

    // Then
    assert_that!(result, err(anything()));
}

#[test]
fn given_empty_marker_when_validate_then_error() {
    // Given
    let mut config = Config::default();
    config.service.readiness_marker.clear();

    // When
    let result = config.validate();

    // Then
    assert_that!(result, err(anything()));
}

#[test]
fn given_relative_health_path_when_validate_then_error() {
    // Given
    let mut config = Config::default();
    config.service.health_path = "health".into();

    // When
    let result = config.validate();

    // Then
    assert_that!(result, err(anything()));
}

#[test]
fn given_env_key_with_equals_when_validate_then_error() {
    // Given
    let mut config = Config::default();
    config.service.env.insert("A=B".into(), "1".into());

    // When
    let result = config.validate();

    // Then
    assert_that!(result, err(anything()));
}

#[test]
fn given_defaults_when_launch_env_then_encoding_and_context_pinned() {
    // Given
    let config = Config::default();

    // When
    let env = config.service.launch_env();

    // Then
    assert_that!(
        env.get(ENCODING_ENV_VAR).map(String::as_str),
        eq(Some("utf-8"))
    );
    assert_that!(
        env.get(LAUNCH_CONTEXT_ENV_VAR).map(String::as_str),
        eq(Some("desktop"))
    );
}

#[test]
fn given_user_env_overriding_encoding_when_launch_env_then_user_value_wins() {
    // Given
    let mut config = Config::default();
    config
        .service
        .env
        .insert(ENCODING_ENV_VAR.into(), "utf-16".into());
    config.service.env.insert("EXTRA".into(), "x".into());

    // When
    let env = config.service.launch_env();

    // Then
    assert_that!(
        env.get(ENCODING_ENV_VAR).map(String::as_str),
        eq(Some("utf-16"))
    );
    assert_that!(env.get("EXTRA").map(String::as_str), eq(Some("x")));
    assert_that!(config.validate(), ok(anything()));
}

#[test]
fn given_no_process_name_when_process_name_for_then_file_stem_used() {
    // Given
    let config = Config::default();

    // When
    let name = config
        .service
        .process_name_for(Path::new("/opt/app/backend.exe"));

    // Then
    assert_that!(name.as_deref(), eq(Some("backend")));
}

#[test]
fn given_explicit_process_name_when_process_name_for_then_explicit_used() {
    // Given
    let mut config = Config::default();
    config.service.process_name = Some("api-server".into());

    // When
    let name = config.service.process_name_for(Path::new("/opt/app/backend"));

    // Then
    assert_that!(name.as_deref(), eq(Some("api-server")));
}
