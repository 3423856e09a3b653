//! End-to-end tests: a local TCP listener plays the hospital MLLP source and
//! the client under test connects to it, exactly as in production.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use labstream::hl7::Sex;
use labstream::listener::{run_with_reconnect, ClientError, RuntimeConfig};
use labstream::mllp::{encode_frame, FrameDecoder};
use labstream::pipeline::engine;
use labstream::pipeline::{
    AlertError, AlertSender, Counter, PipelineEngine, PipelineMetrics, PatientStore, RatioScorer,
    SessionContext, Statistic, StorePolicy,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;

const ADMISSION: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240115103000||ADT^A01|||2.5\r\
PID|1||12345||SMITH^ANNA||19900101|M\r";
const FIRST_RESULT: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240115120000||ORU^R01|||2.5\r\
PID|1||12345\r\
OBR|1||||||20240115120000\r\
OBX|1|SN|CREATININE||2.3\r";
const SECOND_RESULT: &str = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240115140000||ORU^R01|||2.5\r\
PID|1||12345\r\
OBR|1||||||20240115140000\r\
OBX|1|SN|CREATININE||4.9\r";

#[derive(Default)]
struct RecordingPager {
    pages: Mutex<Vec<(String, NaiveDateTime)>>,
}

#[async_trait]
impl AlertSender for RecordingPager {
    async fn send_alert(&self, mrn: &str, reference_time: NaiveDateTime) -> Result<(), AlertError> {
        self.pages
            .lock()
            .unwrap()
            .push((mrn.to_string(), reference_time));
        Ok(())
    }
}

fn runtime_config(address: String, retries: u32) -> RuntimeConfig {
    RuntimeConfig {
        mllp_address: address,
        pager_address: "localhost:8441".to_string(),
        rust_log: "info".to_string(),
        read_buffer_size: 16,
        max_frame_bytes: 64 * 1024,
        reconnect_initial: Duration::from_millis(10),
        reconnect_max: Duration::from_millis(50),
        reconnect_max_retries: retries,
    }
}

fn session_context(pager: Arc<RecordingPager>) -> SessionContext {
    let engine = PipelineEngine::new(
        PatientStore::new(StorePolicy::default()),
        Statistic::Mean,
        Some("CREATININE".to_string()),
    );
    SessionContext {
        engine: Arc::new(Mutex::new(engine)),
        scorer: Arc::new(RatioScorer::default()),
        alerts: pager,
        metrics: Arc::new(PipelineMetrics::new()),
        scorer_timeout: Duration::from_millis(500),
        alert_timeout: Duration::from_millis(500),
        stats_interval: Duration::from_secs(3600),
    }
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (socket, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client did not connect in time")
        .unwrap();
    socket
}

async fn read_acks(socket: &mut TcpStream, count: usize) -> Vec<String> {
    let mut decoder = FrameDecoder::new();
    let mut acks = Vec::new();
    let mut buf = [0u8; 64];
    while acks.len() < count {
        let n = timeout(Duration::from_secs(5), socket.read(&mut buf))
            .await
            .expect("ack not received in time")
            .unwrap();
        assert!(n > 0, "client closed before acknowledging");
        for payload in decoder.feed(&buf[..n]).unwrap() {
            acks.push(String::from_utf8(payload).unwrap());
        }
    }
    acks
}

fn at(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

#[tokio::test]
async fn test_admission_and_results_flow_into_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = runtime_config(listener.local_addr().unwrap().to_string(), 5);
    let pager = Arc::new(RecordingPager::default());
    let context = session_context(pager.clone());
    let shared_engine = context.engine.clone();
    let metrics = context.metrics.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = tokio::spawn(async move { run_with_reconnect(&config, context, shutdown_rx).await });

    let mut source = accept(&listener).await;
    for message in [ADMISSION, FIRST_RESULT, SECOND_RESULT] {
        source.write_all(&encode_frame(message.as_bytes())).await.unwrap();
    }

    let acks = read_acks(&mut source, 3).await;
    assert_eq!(acks.len(), 3);
    for ack in &acks {
        assert!(ack.starts_with("MSH|^~\\&|||||"));
        assert!(ack.contains("||ACK|||2.5\r"));
        assert!(ack.ends_with("MSA|AA\r"));
    }

    {
        let engine = engine::lock(&shared_engine);
        let record = engine.store().get("12345").unwrap();
        assert_eq!(record.age, Some(34));
        assert_eq!(record.sex, Some(Sex::Male));

        let slots: Vec<(NaiveDateTime, f64)> =
            record.observations().map(|s| (s.time, s.value)).collect();
        assert_eq!(slots, vec![(at(12), 2.3), (at(14), 4.9)]);

        let (features, reference) = labstream::pipeline::features::build(record);
        assert_eq!(features.age(), 34.0);
        assert_eq!(features.sex(), 0.0);
        assert_eq!(features.pair(0), (4.9, 0.0));
        assert_eq!(features.pair(1), (2.3, 7200.0));
        for i in 2..5 {
            let (value, dt) = features.pair(i);
            assert!(value.is_nan() && dt.is_nan());
        }
        assert_eq!(reference, Some(at(14)));
    }

    // 4.9 / 2.3 is above the default ratio threshold
    for _ in 0..100 {
        if metrics.get(Counter::PagesSent) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        *pager.pages.lock().unwrap(),
        vec![("12345".to_string(), at(14))]
    );
    assert_eq!(metrics.get(Counter::AcksSent), 3);

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_unparseable_message_is_still_acknowledged() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = runtime_config(listener.local_addr().unwrap().to_string(), 5);
    let context = session_context(Arc::new(RecordingPager::default()));
    let shared_engine = context.engine.clone();
    let metrics = context.metrics.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = tokio::spawn(async move { run_with_reconnect(&config, context, shutdown_rx).await });

    let mut source = accept(&listener).await;
    let unknown = "MSH|^~\\&|SIMULATION|SOUTH RIVERSIDE|||20240115103000||ADT^A08|||2.5\rPID|1||12345\r";
    source.write_all(&encode_frame(unknown.as_bytes())).await.unwrap();

    let acks = read_acks(&mut source, 1).await;
    assert!(acks[0].ends_with("MSA|AA\r"));
    assert_eq!(metrics.get(Counter::ParseFailures), 1);
    assert!(engine::lock(&shared_engine).store().is_empty());

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), client)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_reconnects_after_close_and_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = runtime_config(listener.local_addr().unwrap().to_string(), 5);
    let context = session_context(Arc::new(RecordingPager::default()));
    let metrics = context.metrics.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = tokio::spawn(async move { run_with_reconnect(&config, context, shutdown_rx).await });

    // peer close
    let first = accept(&listener).await;
    drop(first);

    // framing violation: end block without a start block
    let mut second = accept(&listener).await;
    second.write_all(&[0x1c, 0x0d]).await.unwrap();

    let mut third = accept(&listener).await;
    third
        .write_all(&encode_frame(FIRST_RESULT.as_bytes()))
        .await
        .unwrap();
    read_acks(&mut third, 1).await;

    assert_eq!(metrics.get(Counter::AcksSent), 1);

    shutdown_tx.send(true).unwrap();
    let result = timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_gives_up_when_source_is_unreachable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = runtime_config(address, 2);
    let context = session_context(Arc::new(RecordingPager::default()));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let result = timeout(
        Duration::from_secs(5),
        run_with_reconnect(&config, context, shutdown_rx),
    )
    .await
    .unwrap();

    match result {
        Err(ClientError::MaxRetries { attempts, .. }) => assert_eq!(attempts, 2),
        other => panic!("expected MaxRetries, got {:?}", other),
    }
}
