//! Worker plugins: auxiliary measurements that run beside a load test.
//!
//! A plugin is scheduled independently of the scenarios. It starts before the
//! first iteration, is told to stop once the last scenario completes, and sends
//! its summary back on a dedicated channel; the summary ends up in
//! [`crate::RunResult::plugins`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Instant,
};
use typed_builder::TypedBuilder;

/// Summary a plugin attaches to the run result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginStats {
    pub plugin_name: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait WorkerPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Measure until `stop` turns `true`, then return the summary.
    async fn run(&self, stop: watch::Receiver<bool>) -> PluginStats;
}

/// Owns the running plugin tasks of one run.
pub(crate) struct PluginHost {
    stop_tx: watch::Sender<bool>,
    results: mpsc::Receiver<PluginStats>,
    handles: Vec<JoinHandle<()>>,
}

impl PluginHost {
    pub(crate) fn start(plugins: &[Arc<dyn WorkerPlugin>]) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (tx, results) = mpsc::channel(plugins.len().max(1));

        let handles = plugins
            .iter()
            .map(|plugin| {
                let plugin = Arc::clone(plugin);
                let stop = stop_rx.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    tracing::debug!("Plugin {} started.", plugin.name());
                    let stats = plugin.run(stop).await;
                    if tx.send(stats).await.is_err() {
                        tracing::warn!("Plugin {} finished after the run closed.", plugin.name());
                    }
                })
            })
            .collect();

        Self {
            stop_tx,
            results,
            handles,
        }
    }

    /// Signal every plugin to stop and collect their summaries, ordered by name.
    pub(crate) async fn stop(mut self) -> Vec<PluginStats> {
        // Receivers only go away once their plugin returned.
        let _ = self.stop_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Plugin task panicked: {e}");
            }
        }
        self.results.close();

        let mut out = Vec::new();
        while let Some(stats) = self.results.recv().await {
            out.push(stats);
        }
        out.sort_by(|a, b| a.plugin_name.cmp(&b.plugin_name));
        out
    }
}

#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct PingPluginConfig {
    /// URLs (`https://host`) or `host:port` pairs.
    #[builder(setter(into))]
    pub targets: Vec<String>,
    #[builder(default = Duration::from_secs(1))]
    pub interval: Duration,
    #[builder(default = Duration::from_secs(1))]
    pub timeout: Duration,
}

impl PingPluginConfig {
    pub fn create_default<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder()
            .targets(targets.into_iter().map(Into::into).collect::<Vec<_>>())
            .build()
    }
}

/// Network reachability check.
///
/// Every `interval` it opens a TCP connection to each target and records
/// whether it succeeded and how long the handshake took. TCP connect is used
/// instead of ICMP echo because it needs no raw-socket privileges.
pub struct PingPlugin {
    config: PingPluginConfig,
}

impl PingPlugin {
    pub const NAME: &'static str = "ping";

    pub fn new(config: PingPluginConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Default)]
struct PingTarget {
    target: String,
    address: Option<String>,
    sent: u64,
    received: u64,
    min: Option<Duration>,
    max: Duration,
    total: Duration,
}

impl PingTarget {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            address: socket_address(target),
            ..Default::default()
        }
    }

    async fn ping(&mut self, timeout: Duration) {
        self.sent += 1;
        let Some(address) = self.address.as_deref() else {
            return;
        };
        let start = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
            Ok(Ok(_)) => {
                let rtt = start.elapsed();
                self.received += 1;
                self.total += rtt;
                self.max = self.max.max(rtt);
                self.min = Some(self.min.map_or(rtt, |m| m.min(rtt)));
            }
            Ok(Err(e)) => tracing::debug!("Ping to {} failed: {e}", self.target),
            Err(_) => tracing::debug!("Ping to {} timed out.", self.target),
        }
    }

    fn summary(&self) -> serde_json::Value {
        let ms = |d: Duration| d.as_secs_f64() * 1_000.0;
        let avg = if self.received > 0 {
            ms(self.total) / self.received as f64
        } else {
            0.0
        };
        let loss = if self.sent > 0 {
            (self.sent - self.received) as f64 * 100.0 / self.sent as f64
        } else {
            0.0
        };
        json!({
            "host": self.target,
            "sent": self.sent,
            "received": self.received,
            "loss_percent": loss,
            "min_ms": self.min.map(ms).unwrap_or(0.0),
            "avg_ms": avg,
            "max_ms": ms(self.max),
        })
    }
}

/// `host:port` for a URL or an already host:port target.
fn socket_address(target: &str) -> Option<String> {
    if !target.contains("://") {
        return Some(target.to_owned());
    }
    let url = reqwest::Url::parse(target).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{host}:{port}"))
}

#[async_trait]
impl WorkerPlugin for PingPlugin {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, mut stop: watch::Receiver<bool>) -> PluginStats {
        let mut hosts: Vec<PingTarget> =
            self.config.targets.iter().map(|t| PingTarget::new(t)).collect();
        for host in hosts.iter().filter(|h| h.address.is_none()) {
            tracing::warn!("Ping target {} is not a valid address.", host.target);
        }

        let timeout = self.config.timeout;
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                // The watch guard must not live across the pings.
                _ = async { let _ = stop.wait_for(|s| *s).await; } => break,
                _ = ticker.tick() => {
                    join_all(hosts.iter_mut().map(|host| host.ping(timeout))).await;
                }
            }
        }

        PluginStats {
            plugin_name: Self::NAME.to_owned(),
            data: json!({ "hosts": hosts.iter().map(PingTarget::summary).collect::<Vec<_>>() }),
        }
    }
}
