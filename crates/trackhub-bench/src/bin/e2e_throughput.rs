//! End-to-end throughput benchmark.
//!
//! Connects N customers to a running server over WebSocket, appends location
//! events straight to the server's file log as a driver post would, and
//! reports delivered updates per second and delivery latency.
//!
//! ```bash
//! trackhub-bench e2e_throughput [clients] [log path]
//! ```

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Barrier};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message},
};
use trackhub_core::LocationEvent;
use trackhub_log::{FileLog, FileLogConfig, LogPublisher};
use trackhub_protocol::LocationUpdate;

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const BUSES: usize = 32;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let log_path = args
        .get(2)
        .cloned()
        .unwrap_or_else(|| "trackhub.log".to_string());

    println!("trackhub end-to-end throughput");
    println!("  server:  {}", SERVER_URL);
    println!("  log:     {}", log_path);
    println!("  clients: {}", num_clients);
    println!("  warmup {}s, measurement {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let received = Arc::new(AtomicU64::new(0));
    let measuring = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(num_clients + 1));
    let (done_tx, done_rx) = watch::channel(false);

    let mut clients = Vec::with_capacity(num_clients);
    for client_id in 0..num_clients {
        let received = Arc::clone(&received);
        let measuring = Arc::clone(&measuring);
        let barrier = Arc::clone(&barrier);
        let done = done_rx.clone();

        clients.push(tokio::spawn(async move {
            match run_client(client_id, received, measuring, barrier, done).await {
                Ok(latencies) => latencies,
                Err(e) => {
                    eprintln!("client {} error: {}", client_id, e);
                    Vec::new()
                }
            }
        }));
    }

    barrier.wait().await;
    println!("all {} clients connected", num_clients);

    let log = Arc::new(
        FileLog::open(FileLogConfig {
            path: log_path.into(),
            ..FileLogConfig::default()
        })
        .await?,
    );
    let stop = Arc::new(AtomicBool::new(false));
    let driver = tokio::spawn(run_driver(Arc::clone(&log), Arc::clone(&stop)));

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    received.store(0, Ordering::SeqCst);
    measuring.store(true, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;
    measuring.store(false, Ordering::SeqCst);
    let elapsed = start.elapsed();
    let total = received.load(Ordering::SeqCst);

    stop.store(true, Ordering::SeqCst);
    let published = driver.await??;

    let _ = done_tx.send(true);
    let mut latencies = Vec::new();
    for client in clients {
        if let Ok(mut samples) = client.await {
            latencies.append(&mut samples);
        }
    }
    latencies.sort_unstable();

    let msgs_per_sec = total as f64 / elapsed.as_secs_f64();
    println!();
    println!("results");
    println!("  events appended:   {:>12}", published);
    println!("  updates received:  {:>12}", total);
    println!("  throughput:        {:>12.0} msg/s", msgs_per_sec);
    println!(
        "  per client:        {:>12.0} msg/s",
        msgs_per_sec / num_clients as f64
    );
    if let Some(median) = latencies.get(latencies.len() / 2) {
        println!("  median latency:    {:>12.3} ms", median.as_secs_f64() * 1e3);
    }
    if let Some(p99) = latencies.get(latencies.len() * 99 / 100) {
        println!("  p99 latency:       {:>12.3} ms", p99.as_secs_f64() * 1e3);
    }

    Ok(())
}

/// Append events round-robin over a fixed set of buses until stopped.
async fn run_driver(log: Arc<FileLog>, stop: Arc<AtomicBool>) -> Result<u64, BoxError> {
    let mut published = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let bus = format!("bus-{}", published as usize % BUSES);
        log.publish(&LocationEvent::now(bus, 106.82, -6.17)).await?;
        published += 1;
        tokio::task::yield_now().await;
    }
    Ok(published)
}

async fn run_client(
    client_id: usize,
    received: Arc<AtomicU64>,
    measuring: Arc<AtomicBool>,
    barrier: Arc<Barrier>,
    mut done: watch::Receiver<bool>,
) -> Result<Vec<Duration>, BoxError> {
    let mut request = SERVER_URL.into_client_request()?;
    request
        .headers_mut()
        .insert("Session-ID", format!("bench-{}", client_id).parse()?);
    let (ws, _) = connect_async(request).await?;
    let (_sender, mut receiver) = ws.split();

    barrier.wait().await;

    let mut latencies = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(WARMUP_SECS + BENCH_SECS + 5));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            _ = done.wait_for(|done| *done) => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Message::Text(text) = msg else { continue };
                if !measuring.load(Ordering::Relaxed) {
                    continue;
                }

                received.fetch_add(1, Ordering::Relaxed);
                let update: LocationUpdate = serde_json::from_str(&text)?;
                if let Ok(sent) = update.timestamp.parse::<DateTime<Utc>>() {
                    if let Ok(latency) = (Utc::now() - sent).to_std() {
                        latencies.push(latency);
                    }
                }
            }
        }
    }

    Ok(latencies)
}
