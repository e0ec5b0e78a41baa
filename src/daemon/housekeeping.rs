//! Periodic work driven by the actor's one-second tick

use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use super::{Daemon, SELF_SENDER, STALE_SWEEP_INTERVAL, STATS_INTERVAL};
use crate::channels::format;
use crate::checkpoint;
use crate::color::Color;
use crate::registry::SUMMARY_HOST;
use crate::store::RecordKey;

/// Ping-column colors that mark a host as unreachable
const UNREACHABLE_PING_COLORS: [Color; 4] = [Color::Red, Color::Yellow, Color::Blue, Color::Clear];

/// A snapshot ready to be written off the actor task
#[derive(Debug, Clone)]
pub struct CheckpointJob {
    pub path: PathBuf,
    pub contents: String,
    pub now: i64,
}

impl CheckpointJob {
    pub fn write(&self) -> anyhow::Result<()> {
        checkpoint::write_atomic(&self.path, &self.contents, self.now)
    }
}

impl Daemon {
    /// One housekeeping pass; returns a checkpoint to write when one is due
    pub async fn tick(&mut self, now: i64) -> Option<CheckpointJob> {
        self.run_due_tasks(now).await;

        if self.config.purple_checks && now >= self.timers.next_stale_sweep {
            self.check_stale(now).await;
            self.timers.next_stale_sweep = now + STALE_SWEEP_INTERVAL;
        }

        if now >= self.timers.next_stats {
            self.post_statistics(now).await;
            self.timers.next_stats = now + STATS_INTERVAL;
        }

        if now >= self.timers.next_checkpoint {
            self.timers.next_checkpoint = now + self.config.checkpoint_interval_secs as i64;
            let job = self.checkpoint_job(now);
            self.reload().await;
            return job;
        }
        None
    }

    /// Snapshot text of the store and the scheduler
    pub fn snapshot(&self, now: i64) -> String {
        checkpoint::render(&self.store, &self.scheduler, now)
    }

    /// Checkpoint to write, if a checkpoint file is configured
    pub fn checkpoint_job(&self, now: i64) -> Option<CheckpointJob> {
        let path = self.config.checkpoint_file.clone()?;
        Some(CheckpointJob {
            path,
            contents: self.snapshot(now),
            now,
        })
    }

    fn is_unreachable(&self, key: &RecordKey) -> bool {
        if self
            .registry
            .resolve(&key.host)
            .is_some_and(|info| info.dialup)
        {
            return true;
        }
        self.store
            .records_for_test(&key.host, &self.config.ping_column)
            .iter()
            .filter_map(|ping| self.store.record(ping))
            .any(|ping| UNREACHABLE_PING_COLORS.contains(&ping.color))
    }

    /// Turn records past their validity purple, or clear when unreachable
    ///
    /// Summary records are deleted instead.
    pub async fn check_stale(&mut self, now: i64) {
        let expired: Vec<(RecordKey, bool)> = self
            .store
            .hosts()
            .flat_map(|host| {
                host.records
                    .iter()
                    .filter(move |r| r.valid_until < now)
                    .map(move |r| {
                        let key = RecordKey {
                            host: host.name.clone(),
                            test: r.test,
                            origin: r.origin,
                        };
                        (key, host.is_summary())
                    })
            })
            .collect();

        for (key, summary) in expired {
            if summary {
                self.store.clear_cookie(&key);
                if let Some(host) = self.store.host_mut(&key.host) {
                    host.records
                        .retain(|r| !(r.test == key.test && r.origin == key.origin));
                }
                debug!("removed stale summary {}", self.store.test_name(key.test));
                continue;
            }

            let color = if self.is_unreachable(&key) {
                Color::UNREACHABLE
            } else {
                Color::STALE
            };
            debug!("{}.{} went stale, now {color}", key.host, self.store.test_name(key.test));
            self.reapply(&key, color, SELF_SENDER, now).await;
        }
    }

    /// Feed the self-status report back into the store
    pub async fn post_statistics(&mut self, now: i64) {
        let machine = self.config.machine.clone();
        if self.registry.resolve(&machine).is_none() {
            error!("{machine} is not a known host, self-status not posted");
            return;
        }
        let channels = self.channels.stats();
        let report = self
            .stats
            .report(&machine, now, &channels, self.store.ghosts.recent(now));
        if let Err(e) = self.apply_own_status(&report, now).await {
            warn!("self-status rejected: {e}");
        }
    }

    /// Re-read the host registry and client configuration, pruning vanished hosts
    pub async fn reload(&mut self) {
        if let Err(e) = self.registry.reload() {
            warn!("host registry reload failed, keeping previous hosts: {e:#}");
            self.stats.record_error(format!("host registry reload failed: {e:#}"));
        }
        self.load_client_config();

        let vanished: Vec<String> = self
            .store
            .host_names()
            .into_iter()
            .filter(|name| name != SUMMARY_HOST && self.registry.resolve(name).is_none())
            .collect();
        for name in vanished {
            info!("dropping state of removed host {name}");
            self.post_marker("dropstate", SELF_SENDER, format::control(&[&name]))
                .await;
            if let Err(e) = self.store.drop_host(&name) {
                debug!("drop {name}: {e}");
            }
        }
    }

    pub async fn rotate_logs(&self) {
        info!("log rotation requested");
        self.post_marker("logrotate", SELF_SENDER, String::new()).await;
    }

    /// Tell workers to stop and close every channel; returns the final checkpoint
    pub async fn shutdown(&mut self, now: i64) -> Option<CheckpointJob> {
        info!("shutting down");
        self.post_marker("shutdown", SELF_SENDER, String::new()).await;
        self.channels.close();
        self.checkpoint_job(now)
    }
}
