//! End-to-end throughput benchmark for pointhub.
//!
//! Starts an in-process server on an ephemeral port, connects WebSocket
//! subscribers over real network I/O and measures how many point updates
//! they receive while a simulated driver reports as fast as it can.

use futures_util::{SinkExt, StreamExt};
use pointhub_core::LoopbackDriver;
use pointhub_protocol::api::ValueReport;
use pointhub_server::{build_router, AppState, Config};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
const POINTS: u64 = 1_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║        pointhub End-to-End Update Throughput Benchmark       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let state = Arc::new(AppState::new(Config::default())?);
    state
        .hub
        .register_driver(Arc::new(LoopbackDriver::new("bench")))?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("ws://{}/ws", listener.local_addr()?);
    let app = build_router(Arc::clone(&state));
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Server error: {e}");
        }
    });

    run_benchmark(&state, &url, num_clients).await;
    Ok(())
}

async fn run_benchmark(state: &Arc<AppState>, url: &str, num_clients: usize) {
    println!("📊 Update fan-out: {} subscribers on prefix \"bench.\"", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();
    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);
        let url = url.to_string();

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(&url, msg_count, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("✓ All {} clients subscribed", num_clients);

    // Simulated driver
    let driver_state = Arc::clone(state);
    let reports_sent = Arc::new(AtomicU64::new(0));
    let sent = Arc::clone(&reports_sent);
    let driver = tokio::spawn(async move {
        let mut seq = 0u64;
        loop {
            seq += 1;
            let batch: Vec<ValueReport> = (0..100)
                .map(|i| {
                    let id = format!("bench.dev{}.value", (seq * 100 + i) % POINTS);
                    ValueReport::new(id, seq as i64).at(seq)
                })
                .collect();
            if driver_state.hub.report("bench", batch).is_err() {
                break;
            }
            sent.fetch_add(100, Ordering::Relaxed);
            tokio::task::yield_now().await;
        }
    });

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    reports_sent.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);
    let total_reports = reports_sent.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let reports_per_sec = total_reports as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Clients:              {:>10}                           ║", num_clients);
    println!("║  Duration:             {:>10.2}s                          ║", elapsed.as_secs_f64());
    println!("║  Reports:              {:>10.0} /s                       ║", reports_per_sec);
    println!("║  Updates received:     {:>10.0} /s                       ║", msgs_per_sec);
    println!(
        "║  Per-Client:           {:>10.0} /s                       ║",
        msgs_per_sec / num_clients as f64
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    driver.abort();
    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    // The PONG confirms the subscription is in place.
    sender.send(Message::Text("SUBSCRIBE bench.".to_string())).await?;
    sender.send(Message::Text("PING".to_string())).await?;
    while let Some(msg) = receiver.next().await {
        if matches!(msg?, Message::Text(ref text) if text == "PONG") {
            break;
        }
    }

    barrier.wait().await;

    while let Some(result) = receiver.next().await {
        if let Ok(Message::Text(_)) = result {
            message_count.fetch_add(1, Ordering::Relaxed);
        }
    }
    Ok(())
}
