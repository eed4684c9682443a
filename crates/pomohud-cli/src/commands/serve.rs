//! Line-oriented JSON daemon.
//!
//! Each stdin line is one request envelope. Stdout carries one JSON object
//! per line, either `{"response": ...}` echoing the request `id`, or
//! `{"event": ...}` for every broadcast transition. Wake-ups are armed on
//! tokio timers for as long as the process runs.

use std::sync::Arc;
use std::time::Duration;

use pomohud_core::{
    Clock, Config, Envelope, Event, Reply, SessionService, SqliteSessionStore, TokioScheduler,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Outbound {
    Response(Reply),
    Event(Event),
}

pub fn run(config: &Config, clock: Arc<dyn Clock>) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config, clock));
    // A pending stdin read would otherwise hold the runtime open.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn serve(config: &Config, clock: Arc<dyn Clock>) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteSessionStore::open()?;
    let (scheduler, mut fired) = TokioScheduler::new(clock.clone());
    let service = Arc::new(SessionService::from_config(
        config,
        Arc::new(store),
        Arc::new(scheduler),
        clock,
    ));
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();

    let writer = tokio::spawn(write_lines(out_rx));

    let forwarder = {
        let mut events = service.subscribe();
        let out = out_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if out.send(Outbound::Event(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    let wakeups = {
        let service = service.clone();
        tokio::spawn(async move {
            while let Some(alarm) = fired.recv().await {
                debug!(alarm = %alarm, "wake-up fired");
                service.on_wakeup(&alarm).await;
            }
        })
    };

    let armed = service.restore().await;
    info!(armed, "serving requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Envelope::decode(line) {
                    Ok(envelope) => {
                        let service = service.clone();
                        let out = out_tx.clone();
                        inflight.spawn(async move {
                            let reply = service.handle_envelope(envelope).await;
                            let _ = out.send(Outbound::Response(reply));
                        });
                    }
                    Err(e) => warn!(error = %e, "dropping request"),
                }
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "request task failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "request task failed");
        }
    }
    wakeups.abort();
    let _ = wakeups.await;

    // Dropping the last service handle closes the broadcast channel.
    drop(service);
    let _ = forwarder.await;
    drop(out_tx);
    let _ = writer.await;
    info!("stdin closed, shutting down");
    Ok(())
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode outbound message");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!(error = %e, "stdout closed");
            break;
        }
        if let Err(e) = stdout.flush().await {
            error!(error = %e, "stdout flush failed");
            break;
        }
    }
}
