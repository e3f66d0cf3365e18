//! End-to-end tests against a simulated MEX beam expander.
//!
//! The simulator answers the `MEX>` protocol over a `tokio::io::duplex` pipe,
//! so the full store → codec → transport → reply path runs without hardware.

use optogama_mex::{DeviceState, ErrorKind, ParameterStore, ParameterTag, Transport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tracing_test::traced_test;

#[derive(Debug, Default)]
struct DeviceModel {
    values: HashMap<String, String>,
    status_code: u16,
    status_queries: usize,
    requests: Vec<String>,
    /// Reply to send instead of the protocol answer, consumed once
    override_reply: Option<String>,
    /// Hold back the next reply this long, consumed once
    reply_delay: Option<Duration>,
}

type SharedModel = Arc<Mutex<DeviceModel>>;

fn respond(model: &SharedModel, request: &str) -> Option<String> {
    let mut model = model.lock().unwrap();
    model.requests.push(request.to_string());

    if let Some(reply) = model.override_reply.take() {
        return Some(reply);
    }

    let body = request.strip_prefix("MEX>")?;
    if body == "STATUS?" {
        model.status_queries += 1;
        return Some(format!("DIS_COF_DIRECT_ERR_{}", model.status_code));
    }
    if let Some(tag) = body.strip_suffix('?') {
        let value = model.values.get(tag).cloned().unwrap_or_else(|| "0.0".into());
        return Some(format!("MEX>{}_{}", tag, value));
    }
    if let Some((tag, value)) = body.split_once("!_") {
        model.values.insert(tag.to_string(), value.to_string());
        return Some(format!("MEX>{}_{}", tag, value));
    }
    // unknown commands are ignored, the host times out
    None
}

async fn run_device(port: DuplexStream, model: SharedModel) {
    let mut port = BufReader::new(port);
    loop {
        let mut line = String::new();
        match port.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if let Some(reply) = respond(&model, line.trim_end()) {
            let delay = model.lock().unwrap().reply_delay.take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let reply = format!("{}\r\n", reply);
            if port.get_mut().write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }
}

fn simulated_expander() -> (ParameterStore, SharedModel) {
    let (host, device) = tokio::io::duplex(1024);
    let model = SharedModel::default();
    {
        let mut m = model.lock().unwrap();
        m.values.insert("CWL".into(), "1064.0".into());
        m.values.insert("MAG".into(), "2.0".into());
        m.values.insert("MOF".into(), "0.0".into());
        m.values.insert("DOF".into(), "0.0".into());
    }
    tokio::spawn(run_device(device, model.clone()));

    let transport = Transport::from_port("sim", Box::new(host), Duration::from_secs(1));
    (ParameterStore::new(transport), model)
}

#[tokio::test]
async fn test_set_then_get_every_parameter() {
    let (store, model) = simulated_expander();

    for (name, value) in [
        ("wavelength", 532.0),
        ("magnification", 3.5),
        ("mag_offset", -0.25),
        ("divergence", 0.125),
    ] {
        store.set(name, value).await.unwrap();
        assert_eq!(store.get(name).await.unwrap(), value, "parameter {}", name);
    }

    let requests = model.lock().unwrap().requests.clone();
    assert_eq!(requests[0], "MEX>CWL!_532.0");
    assert_eq!(requests[1], "MEX>CWL?");
    assert_eq!(requests[4], "MEX>MOF!_-0.25");
}

#[tokio::test]
async fn test_get_by_tag() {
    let (store, _model) = simulated_expander();

    assert_eq!(store.get_tag(ParameterTag::Cwl).await.unwrap(), 1064.0);
    assert_eq!(store.get_tag(ParameterTag::Mag).await.unwrap(), 2.0);
}

#[tokio::test]
async fn test_status_state_transitions() {
    let (store, model) = simulated_expander();
    let t0 = Instant::now();

    assert_eq!(store.state(), None);

    model.lock().unwrap().status_code = 1;
    store.refresh_status(t0).await.unwrap();
    assert_eq!(store.state(), Some(DeviceState::Moving));

    model.lock().unwrap().status_code = 0b0001_1001;
    store.refresh_status(t0 + Duration::from_millis(300)).await.unwrap();
    assert_eq!(store.state(), Some(DeviceState::Fault));

    model.lock().unwrap().status_code = 0b0100_0000;
    store.refresh_status(t0 + Duration::from_millis(600)).await.unwrap();
    assert_eq!(store.state(), Some(DeviceState::On));
    assert!(store.read_limit_low());
    assert!(!store.read_limit_high());

    assert_eq!(model.lock().unwrap().status_queries, 3);
}

#[tokio::test]
async fn test_status_debounce_skips_wire() {
    let (store, model) = simulated_expander();
    let t0 = Instant::now();

    model.lock().unwrap().status_code = 192;
    let first = store.refresh_status(t0).await.unwrap();

    // device changes, but the cached snapshot is still fresh
    model.lock().unwrap().status_code = 0;
    let second = store.refresh_status(t0 + Duration::from_millis(150)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(model.lock().unwrap().status_queries, 1);
    assert!(store.read_limit_high());

    let third = store.refresh_status(t0 + Duration::from_millis(250)).await.unwrap();
    assert_eq!(third.bits(), 0);
    assert_eq!(model.lock().unwrap().status_queries, 2);
    assert!(!store.read_limit_high());
}

#[tokio::test]
async fn test_limit_reads_do_not_query() {
    let (store, model) = simulated_expander();

    assert!(!store.read_limit_low());
    assert!(!store.read_limit_high());
    assert!(model.lock().unwrap().requests.is_empty());
}

#[tokio::test]
async fn test_out_of_range_status_code() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().status_code = 300;
    let err = store.refresh_status(Instant::now()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(store.snapshot(), None);
}

#[tokio::test]
async fn test_stale_reply_is_echo_mismatch() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().override_reply = Some("MEX>MAG_2.5".into());
    let err = store.get("mag_offset").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EchoMismatch);

    // the next cycle is unaffected
    assert_eq!(store.get("magnification").await.unwrap(), 2.0);
}

#[tokio::test]
async fn test_wrong_status_prefix() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().override_reply = Some("FOO_192".into());
    let err = store.refresh_status(Instant::now()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StatusPrefixMismatch);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_raw_query_returns_empty_reply() {
    let (store, model) = simulated_expander();

    let reply = store.query_raw("HELLO?").await.unwrap();
    assert_eq!(reply, "");
    assert_eq!(model.lock().unwrap().requests, vec!["HELLO?".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_does_not_shift_later_cycles() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().reply_delay = Some(Duration::from_millis(1200));
    let err = store.get("wavelength").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatMismatch);

    // the late wavelength reply lands while the host is idle
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(store.get("magnification").await.unwrap(), 2.0);
    store.set("wavelength", 800.0).await.unwrap();
    assert_eq!(store.get("wavelength").await.unwrap(), 800.0);
}

#[tokio::test]
async fn test_empty_reply_is_format_mismatch() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().override_reply = Some(String::new());
    let err = store.get("wavelength").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FormatMismatch);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_port() {
    let (store, model) = simulated_expander();
    let store = Arc::new(store);

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                store.get("wavelength").await.map(|_| ())
            } else {
                store.set("magnification", i as f64).await
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(model.lock().unwrap().requests.len(), 20);
}

#[tokio::test]
async fn test_close_releases_port() {
    let (store, _model) = simulated_expander();

    store.close().await.unwrap();
    store.close().await.unwrap();

    let err = store.get("wavelength").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
#[traced_test]
async fn test_state_change_is_logged() {
    let (store, model) = simulated_expander();

    model.lock().unwrap().status_code = 8;
    store.refresh_status(Instant::now()).await.unwrap();

    assert!(logs_contain("MEX device state changed"));
}
