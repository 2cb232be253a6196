//! The watch loop: scan every enabled source on an interval, filter and rank
//! the results, alert on options not seen before, and persist the seen set.
//! A failing source backs off exponentially instead of stalling the others.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::filters::apply_filters;
use crate::notify::Notifier;
use crate::options::{rank, NormalizedOption};
use crate::sources::Source;
use crate::store::SeenStore;

const BACKOFF_BASE: Duration = Duration::from_secs(30);
const BACKOFF_MAX: Duration = Duration::from_secs(600);

/// How many runners-up an alert lists below the top match.
const MAX_ALTERNATIVES: usize = 5;

#[derive(Debug, Default)]
struct SourceHealth {
    consecutive_failures: u32,
    backoff_until: Option<Instant>,
}

/// Doubles per consecutive failure, capped: 30s, 60s, 120s, ... 600s.
fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let shift = (failures - 1).min(16);
    base.saturating_mul(1u32 << shift).min(max)
}

/// Split ranked options into unseen and already-seen, preserving rank order.
fn partition_new(
    ranked: Vec<NormalizedOption>,
    seen: &HashSet<String>,
) -> (Vec<NormalizedOption>, usize) {
    let total = ranked.len();
    let fresh: Vec<NormalizedOption> = ranked
        .into_iter()
        .filter(|o| !seen.contains(&o.dedup_key()))
        .collect();
    let already = total - fresh.len();
    (fresh, already)
}

/// One alert message: the top match in full, then up to a handful of
/// alternatives as single lines.
fn build_alert(fresh: &[NormalizedOption]) -> String {
    let mut out = vec![format!("NEW OPTION FOUND ({} total)", fresh.len())];
    out.push(String::new());
    out.extend(fresh[0].alert_lines());

    let alternatives = &fresh[1..fresh.len().min(1 + MAX_ALTERNATIVES)];
    if !alternatives.is_empty() {
        out.push(String::new());
        out.push("Also new:".to_string());
        for option in alternatives {
            out.push(format!(
                "- {} / {} at {}",
                option.entity_id,
                option.room_type,
                option.price_display()
            ));
        }
    }
    out.join("\n")
}

pub struct WatchService {
    cfg: Config,
    sources: Vec<Source>,
    notifier: Notifier,
    store: SeenStore,
    health: HashMap<String, SourceHealth>,
    seen: HashSet<String>,
}

impl WatchService {
    pub fn new(cfg: Config, sources: Vec<Source>, notifier: Notifier, store: SeenStore) -> Self {
        let seen = store.load();
        info!(seen = seen.len(), sources = sources.len(), "watch service ready");
        WatchService {
            cfg,
            sources,
            notifier,
            store,
            health: HashMap::new(),
            seen,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        if let Some(reason) = self.notifier.validate() {
            warn!(reason, "notifier misconfigured; alerts will be dropped");
        }
        loop {
            if let Err(err) = self.run_cycle().await {
                warn!(error = %err, "cycle failed");
            }
            let jitter = if self.cfg.jitter_secs > 0 {
                rand::thread_rng().gen_range(0..self.cfg.jitter_secs)
            } else {
                0
            };
            let pause = Duration::from_secs(self.cfg.interval_secs + jitter);
            info!(secs = pause.as_secs(), "sleeping until next cycle");
            tokio::select! {
                _ = sleep(pause) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// One full pass over every source. Runs to completion so the seen set is
    /// always persisted before the loop sleeps again.
    pub async fn run_cycle(&mut self) -> anyhow::Result<()> {
        let policy = self.cfg.window_policy();
        let year = self.cfg.academic_year();

        let mut collected = Vec::new();
        for source in &self.sources {
            let health = self.health.entry(source.name().to_string()).or_default();
            if backed_off(health) {
                info!(source = source.name(), "skipping, in backoff");
                continue;
            }
            match source.scan(&policy, &year).await {
                Ok(options) => {
                    info!(source = source.name(), count = options.len(), "scan complete");
                    health.consecutive_failures = 0;
                    health.backoff_until = None;
                    collected.extend(options);
                }
                Err(err) => {
                    health.consecutive_failures += 1;
                    let delay =
                        backoff_delay(health.consecutive_failures, BACKOFF_BASE, BACKOFF_MAX);
                    health.backoff_until = Some(Instant::now() + delay);
                    warn!(
                        source = source.name(),
                        error = %err,
                        failures = health.consecutive_failures,
                        backoff_secs = delay.as_secs(),
                        "scan failed, backing off"
                    );
                }
            }
        }

        self.finish_cycle(collected).await
    }

    /// Filter, rank, and alert on what a cycle collected. Fresh keys are
    /// recorded and persisted whether or not delivery succeeded: an option
    /// alerts at most once.
    async fn finish_cycle(&mut self, collected: Vec<NormalizedOption>) -> anyhow::Result<()> {
        let mut matches = apply_filters(collected, &self.cfg.filters);
        rank(&mut matches);
        let (fresh, already_seen) = partition_new(matches, &self.seen);
        info!(fresh = fresh.len(), already_seen, "cycle results");

        if fresh.is_empty() {
            return Ok(());
        }

        if !self.notifier.send(&build_alert(&fresh), &fresh).await {
            warn!(count = fresh.len(), "alert not delivered");
        }
        self.seen.extend(fresh.iter().map(|o| o.dedup_key()));
        self.store.save(&self.seen)?;
        Ok(())
    }
}

/// A source is skipped while its backoff deadline lies in the future. The
/// clock is read per check, not per cycle, so a deadline that expires while
/// earlier sources scan does not cost an extra cycle.
fn backed_off(health: &SourceHealth) -> bool {
    health
        .backoff_until
        .is_some_and(|until| Instant::now() < until)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::sample_option;

    #[test]
    fn backoff_doubles_to_cap() {
        let base = Duration::from_secs(30);
        let max = Duration::from_secs(600);
        assert_eq!(backoff_delay(0, base, max), Duration::ZERO);
        assert_eq!(backoff_delay(1, base, max), Duration::from_secs(30));
        assert_eq!(backoff_delay(2, base, max), Duration::from_secs(60));
        assert_eq!(backoff_delay(3, base, max), Duration::from_secs(120));
        assert_eq!(backoff_delay(5, base, max), Duration::from_secs(480));
        assert_eq!(backoff_delay(6, base, max), max);
        assert_eq!(backoff_delay(40, base, max), max);
    }

    #[test]
    fn backoff_is_monotone_nondecreasing() {
        let base = Duration::from_secs(30);
        let max = Duration::from_secs(600);
        let mut prev = Duration::ZERO;
        for n in 0..50 {
            let d = backoff_delay(n, base, max);
            assert!(d >= prev, "backoff shrank at {n}");
            prev = d;
        }
    }

    #[test]
    fn partition_respects_seen_keys() {
        let a = sample_option();
        let mut b = sample_option();
        b.room_type = "Bronze Ensuite".to_string();
        let seen: HashSet<String> = [a.dedup_key()].into_iter().collect();

        let (fresh, already) = partition_new(vec![a, b.clone()], &seen);
        assert_eq!(already, 1);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].dedup_key(), b.dedup_key());
    }

    #[test]
    fn second_pass_finds_nothing_new() {
        let options = vec![sample_option()];
        let mut seen = HashSet::new();

        let (fresh, _) = partition_new(options.clone(), &seen);
        assert_eq!(fresh.len(), 1);
        seen.extend(fresh.iter().map(|o| o.dedup_key()));

        let (fresh, already) = partition_new(options, &seen);
        assert!(fresh.is_empty());
        assert_eq!(already, 1);
    }

    #[test]
    fn alert_lists_top_match_and_capped_alternatives() {
        let mut fresh = Vec::new();
        for i in 0..8 {
            let mut o = sample_option();
            o.room_type = format!("Room {i}");
            o.price_weekly = Some(200.0 + i as f64);
            fresh.push(o);
        }
        let alert = build_alert(&fresh);
        assert!(alert.starts_with("NEW OPTION FOUND (8 total)"));
        assert!(alert.contains("Room: Room 0"));
        assert!(alert.contains("Also new:"));
        // Top match plus five alternatives; the rest are only in the count.
        let bullets = alert.lines().filter(|l| l.starts_with("- ")).count();
        assert_eq!(bullets, 5);
        assert!(!alert.contains("Room 7"));
    }

    #[test]
    fn cycle_pipeline_alerts_once_for_a_new_option() {
        use crate::filters::FilterSet;

        // Two rooms for the same semester-1 term, one over the price cap.
        let gold = sample_option();
        let mut platinum = sample_option();
        platinum.room_type = "Platinum Ensuite".to_string();
        platinum.price_weekly = Some(405.0);

        let filters = FilterSet { max_weekly_price: Some(350.0), ..Default::default() };
        let mut matches = apply_filters(vec![platinum, gold], &filters);
        rank(&mut matches);
        assert_eq!(matches.len(), 1);

        let mut seen = HashSet::new();
        let (fresh, _) = partition_new(matches.clone(), &seen);
        let alert = build_alert(&fresh);
        assert!(alert.contains("binary-hub"));
        assert!(alert.contains("Binary Hub - 26/27 - Semester 1"));
        seen.extend(fresh.iter().map(|o| o.dedup_key()));

        // The identical next cycle stays silent.
        let (fresh, already) = partition_new(matches, &seen);
        assert!(fresh.is_empty());
        assert_eq!(already, 1);
    }

    #[test]
    fn single_match_alert_has_no_alternatives() {
        let alert = build_alert(&[sample_option()]);
        assert!(!alert.contains("Also new:"));
        assert!(alert.contains("binary-hub"));
    }

    fn broken_notifier_service(dir: &tempfile::TempDir) -> WatchService {
        let path = dir.path().join("seen.json");
        WatchService::new(
            Config::for_tests(path.clone()),
            Vec::new(),
            Notifier::Disabled("broken".to_string()),
            SeenStore::new(path),
        )
    }

    #[tokio::test]
    async fn failed_delivery_still_records_and_persists_seen_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = broken_notifier_service(&dir);
        let key = sample_option().dedup_key();

        svc.finish_cycle(vec![sample_option()]).await.unwrap();
        assert!(svc.seen.contains(&key));
        // A restart sees the key too.
        assert!(SeenStore::new(dir.path().join("seen.json")).load().contains(&key));
    }

    #[tokio::test]
    async fn repeated_cycle_with_broken_notifier_stays_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut svc = broken_notifier_service(&dir);

        svc.finish_cycle(vec![sample_option()]).await.unwrap();
        let after_first = svc.seen.clone();
        svc.finish_cycle(vec![sample_option()]).await.unwrap();
        assert_eq!(svc.seen, after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_backoff_deadline_is_not_skipped() {
        let health = SourceHealth {
            consecutive_failures: 1,
            backoff_until: Some(Instant::now() + Duration::from_secs(30)),
        };
        assert!(backed_off(&health));
        // The deadline passes while earlier sources are still scanning.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!backed_off(&health));
    }
}
