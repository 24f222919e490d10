use serial_test::serial;
use tracing::level_filters::LevelFilter;
use unikey_cache::config::{LogFormat, LoggingSettings};
use unikey_cache::telemetry::{self, TelemetryError};

#[test]
#[serial]
fn subscriber_installs_once() {
    let settings = LoggingSettings {
        level: LevelFilter::DEBUG,
        format: LogFormat::Json,
    };

    telemetry::init(&settings).expect("first install succeeds");
    tracing::info!(component = "telemetry-test", "subscriber installed");

    let err = telemetry::init(&settings).expect_err("second install fails");
    assert!(matches!(err, TelemetryError::Subscriber(_)));
}
