//! Mimic client runtime
//!
//! Wires the transport manager, the rotation scheduler, and the
//! shaper loop together: one long-lived multiplexed session whose
//! physical socket and behavioral profile rotate across the
//! configured domains.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::StreamExt;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::obfuscation::{run_shaper, TrafficGenerator};
use crate::presets::PresetRegistry;
use crate::transport::Manager;

/// Mimic client: owns the session manager and the mimicry state
pub struct MimicClient {
    config: ClientConfig,
    registry: Arc<PresetRegistry>,
    generator: Arc<TrafficGenerator>,
    manager: Arc<Manager>,
}

impl MimicClient {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        let initial_domain = config
            .domains
            .first()
            .context("at least one domain is required")?;

        let registry = Arc::new(PresetRegistry::new());
        let initial_preset = registry.detect(initial_domain);
        info!(
            "mimicking {initial_domain} (profile {})",
            initial_preset.name
        );

        let generator = Arc::new(TrafficGenerator::new(initial_preset));
        let manager = Arc::new(Manager::new(config.server.clone(), config.uuid.clone()));

        Ok(Self {
            config,
            registry,
            generator,
            manager,
        })
    }

    /// Connect, then run the shaper and the rotation scheduler until
    /// shutdown is signalled. A failed initial connection is a
    /// startup error; later data-plane failures are logged and the
    /// process keeps waiting for the shutdown signal.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> anyhow::Result<()> {
        let initial_domain = self.config.domains[0].clone();
        let mut session = self
            .manager
            .start_session(&initial_domain)
            .await
            .context("failed to start session")?;

        let stream = session
            .open_stream()
            .map_err(|e| anyhow!("failed to open substream: {e}"))?;

        let mut tasks = JoinSet::new();

        // drive the multiplexer session
        let mut mux_shutdown = shutdown.subscribe();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = mux_shutdown.recv() => break,
                    inbound = session.next() => match inbound {
                        Some(Ok(_)) => debug!("ignoring server-initiated substream"),
                        Some(Err(err)) => {
                            warn!("multiplexer session error: {err}");
                            break;
                        }
                        None => {
                            info!("multiplexer session closed");
                            break;
                        }
                    }
                }
            }
        });

        // cover traffic on the substream
        let generator = Arc::clone(&self.generator);
        let shaper_shutdown = shutdown.subscribe();
        tasks.spawn(async move {
            if let Err(err) = run_shaper(stream, generator, shaper_shutdown).await {
                warn!("shaper loop ended: {err}");
            }
        });

        // domain switching
        tasks.spawn(run_scheduler(
            self.config.domains.clone(),
            self.config.switch_range(),
            Arc::clone(&self.registry),
            Arc::clone(&self.generator),
            Arc::clone(&self.manager),
            shutdown.subscribe(),
        ));

        // wait for the shutdown signal; individual task failures are
        // logged but do not bring the process down
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                joined = tasks.join_next() => match joined {
                    Some(Ok(())) => {}
                    Some(Err(err)) => warn!("task join error: {err}"),
                    None => break,
                }
            }
        }

        self.manager.close().await;
        tasks.shutdown().await;
        info!("mimic client stopped");
        Ok(())
    }
}

/// Rotation scheduler: round-robin over the configured domains on a
/// randomized interval. Each tick swaps the mimicry profile and
/// dispatches a transport rotation without awaiting it, so a failed
/// rotation never stalls the next tick.
async fn run_scheduler(
    domains: Vec<String>,
    (switch_min, switch_max): (Duration, Duration),
    registry: Arc<PresetRegistry>,
    generator: Arc<TrafficGenerator>,
    manager: Arc<Manager>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut index = 0usize;

    loop {
        let interval = sample_interval(switch_min, switch_max);
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("rotation scheduler stopping");
                return;
            }
            _ = sleep(interval) => {}
        }

        index = (index + 1) % domains.len();
        let domain = domains[index].clone();

        let preset = registry.detect(&domain);
        info!("switching profile to {domain} (preset {})", preset.name);
        generator.set_preset(preset);

        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if let Err(err) = manager.rotate_transport(&domain).await {
                warn!("transport rotation failed: {err:#}");
            }
        });
    }
}

fn sample_interval(min: Duration, max: Duration) -> Duration {
    if min >= max {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(millis as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_interval_within_bounds() {
        let min = Duration::from_secs(60);
        let max = Duration::from_secs(300);
        for _ in 0..1000 {
            let interval = sample_interval(min, max);
            assert!(interval >= min && interval <= max);
        }
    }

    #[test]
    fn test_sample_interval_degenerate_range() {
        let d = Duration::from_secs(10);
        assert_eq!(sample_interval(d, d), d);
    }

    #[test]
    fn test_client_requires_domains() {
        let config = ClientConfig {
            domains: Vec::new(),
            ..ClientConfig::default()
        };
        assert!(MimicClient::new(config).is_err());
    }
}
