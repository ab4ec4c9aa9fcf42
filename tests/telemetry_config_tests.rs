//! Tests for LogFormat.

use kafkaesque_client::telemetry::LogFormat;
use serial_test::serial;

#[test]
fn test_log_format_copy() {
    let format = LogFormat::Json;
    let copied = format;
    assert_eq!(format, copied);
}

#[test]
fn test_log_format_variants() {
    assert!(format!("{:?}", LogFormat::Json).contains("Json"));
    assert!(format!("{:?}", LogFormat::Pretty).contains("Pretty"));
}

#[test]
fn test_log_format_parse_is_lenient() {
    assert_eq!("Json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
}

#[test]
#[serial]
fn test_log_format_from_env() {
    // SAFETY: #[serial] keeps other environment readers out.
    unsafe { std::env::set_var("LOG_FORMAT", "json") };
    assert_eq!(LogFormat::from_env(), LogFormat::Json);

    unsafe { std::env::remove_var("LOG_FORMAT") };
    assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
}
