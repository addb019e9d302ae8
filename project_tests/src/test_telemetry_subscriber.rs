use chrono::{Duration, Local};
use clap::Parser;
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the telemetry server
    #[clap(short, long, default_value = "ws://127.0.0.1:3002/ws")]
    url: String,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct Broadcast {
    #[serde(rename = "HomeID")]
    home_id: u64,
    #[serde(rename = "CurrentWaterLevel")]
    water_level: serde_json::Number,
    #[serde(rename = "PumpRunningStatus")]
    pump_running: bool,
    timestamp: String,
}

#[derive(Default)]
struct Stats {
    global_timestamps: VecDeque<chrono::DateTime<Local>>,
    home_timestamps: BTreeMap<u64, VecDeque<chrono::DateTime<Local>>>,
    rejected: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    let stats_reporter = Arc::clone(&stats);
    let report_interval_seconds = args.report_interval_seconds.max(1);
    tokio::spawn(async move {
        loop {
            sleep(std::time::Duration::from_secs(report_interval_seconds)).await;
            let one_minute_ago = Local::now() - Duration::minutes(1);

            let mut data = stats_reporter.lock().unwrap();

            while data.global_timestamps.front().is_some_and(|&t| t < one_minute_ago) {
                data.global_timestamps.pop_front();
            }
            let global_rate = data.global_timestamps.len();

            let mut rates = Vec::new();
            for (home, dq) in data.home_timestamps.iter_mut() {
                while dq.front().is_some_and(|&t| t < one_minute_ago) {
                    dq.pop_front();
                }
                if !dq.is_empty() {
                    rates.push(format!("home {}: {} msg/min", home, dq.len()));
                }
            }

            println!("\n----- 1-Minute Summary -----");
            println!("Global rate: {} msg/min", global_rate);
            println!("Homes: {}", if rates.is_empty() { "No data".to_string() } else { rates.join(", ") });
            println!("Unparseable messages so far: {}", data.rejected);
            println!("----------------------------\n");
        }
    });

    println!("Connecting to {}...", args.url);
    let (ws_stream, _) = connect_async(args.url.as_str()).await.expect("Failed to connect");
    let (_write, mut read) = ws_stream.split();
    println!("Connected. Press Ctrl+C to stop.");

    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<Broadcast>(&text) {
                Ok(reading) => {
                    println!(
                        "[{}] home {} water {} pump {}",
                        reading.timestamp,
                        reading.home_id,
                        reading.water_level,
                        if reading.pump_running { "on" } else { "off" }
                    );
                    let now = Local::now();
                    let mut data = stats.lock().unwrap();
                    data.global_timestamps.push_back(now);
                    data.home_timestamps.entry(reading.home_id).or_default().push_back(now);
                }
                Err(e) => {
                    eprintln!("Unexpected message {}: {}", text.as_str(), e);
                    stats.lock().unwrap().rejected += 1;
                }
            },
            Message::Close(_) => {
                println!("Server closed the connection.");
                break;
            }
            _ => {}
        }
    }
}
