//! Station demo - serves the frame protocol on stdin/stdout.
//!
//! This example demonstrates:
//! - Building a station with the fluent builder
//! - Registering tagged, pattern and exec-order executors
//! - Executors that poll cancellation while they wait on "hardware"
//!
//! Logs go to stderr so stdout carries only frames. An optional first
//! argument names a JSON configuration file.
//!
//! # Running against a serial adapter
//!
//! ```text
//! stty -F /dev/ttyUSB0 115200 raw -echo
//! cargo run --example station < /dev/ttyUSB0 > /dev/ttyUSB0
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use teststand::{Station, StationConfig, TestContext};
use tracing_subscriber::EnvFilter;

/// Payload of the fan test.
#[derive(Deserialize, Debug)]
struct FanInput {
    #[serde(default = "default_rpm")]
    min_rpm: u32,
}

fn default_rpm() -> u32 {
    1000
}

fn fan_test(input: FanInput, ctx: &TestContext) -> teststand::Result<teststand::Response> {
    let mut rpm = 0;
    for _ in 0..20 {
        if !ctx.sleep(Duration::from_millis(100)) {
            // superseded; the dispatcher discards whatever we return
            return Ok(ctx.failed(Value::Null));
        }
        rpm += 100;
    }
    let passed = rpm >= input.min_rpm;
    Ok(ctx.report(json!({"rpm": rpm, "testResult": if passed { "OK" } else { "NG" }}), passed))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("teststand=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => StationConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => StationConfig::default(),
    };

    let station = Station::builder()
        .config(config)
        .test("fan", fan_test)
        .test_pattern("usb", |data: Value, ctx| {
            Ok(ctx.passed(json!({"type": data["type"], "testResult": "OK"})))
        })
        .combined_test("net", |_: Value, ctx| {
            let reachable = ctx.sleep(Duration::from_millis(300));
            Ok(ctx.report(json!({"testResult": "OK"}), reachable))
        })
        .exec_order(4, |_: Value, ctx| Ok(ctx.passed(json!({"gpio": "toggled"}))))
        .time_hook(|data| {
            tracing::info!("Host time: {}", data["time"]);
            Ok(())
        })
        .build()?;

    station
        .serve(tokio::io::stdin(), tokio::io::stdout())
        .await?;
    station.shutdown();

    Ok(())
}
