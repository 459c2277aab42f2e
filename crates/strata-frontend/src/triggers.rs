//! Conditions that ask the control plane for a planning pass ahead of the
//! schedule.
//!
//! A [`ReplanTriggers`] set is fed one [`Epoch`] of observations at a time.
//! When a trigger fires, a `Replan` request goes into the control mailbox and
//! every trigger starts over from that point.

use std::collections::VecDeque;
use std::fmt;

use strata_core::blueprint::Blueprint;
use strata_core::config::{
    LatencyCeilingConfig, RecentChangeConfig, TriggerConfig, VariableCostsConfig,
};
use strata_scoring::MetricsSnapshot;

use crate::control::{ControlMailbox, ControlRequest};

/// Hourly scan costs at or below this are treated as zero.
const NEGLIGIBLE_SCAN_USD: f64 = 1e-5;

/// What was observed over one epoch.
#[derive(Debug, Clone, Default)]
pub struct Epoch {
    /// End of the epoch, milliseconds since the Unix epoch.
    pub at_ms: u64,
    pub metrics: MetricsSnapshot,
    /// Scan cost of the epoch's analytical queries, scaled to one hour.
    pub scan_usd_per_hour: Option<f64>,
}

pub trait Trigger: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn should_replan(&mut self, epoch: &Epoch) -> bool;

    /// Called on every trigger after any replan, including requested ones.
    fn on_replan(&mut self) {}

    /// A new blueprint is serving. `expected_scan_usd` is the hourly scan
    /// cost its plan predicted, when known.
    fn update_blueprint(
        &mut self,
        _prev: Option<&Blueprint>,
        _next: &Blueprint,
        _expected_scan_usd: Option<f64>,
        _at_ms: u64,
    ) {
    }
}

/// Last `epochs` values, all above `ceiling`.
#[derive(Debug)]
struct Sustained {
    ceiling: f64,
    epochs: usize,
    recent: VecDeque<f64>,
}

impl Sustained {
    fn new(cfg: LatencyCeilingConfig) -> Self {
        let epochs = cfg.sustained_epochs.max(1) as usize;
        Self {
            ceiling: cfg.ceiling_s,
            epochs,
            recent: VecDeque::with_capacity(epochs),
        }
    }

    fn push(&mut self, value: f64) -> bool {
        if self.recent.len() == self.epochs {
            self.recent.pop_front();
        }
        self.recent.push_back(value);
        self.recent.len() == self.epochs && self.recent.iter().all(|v| *v > self.ceiling)
    }

    fn clear(&mut self) {
        self.recent.clear();
    }
}

/// Fires when the slowest analytical query stays above a ceiling.
#[derive(Debug)]
pub struct QueryLatencyCeiling(Sustained);

impl QueryLatencyCeiling {
    pub fn new(cfg: LatencyCeilingConfig) -> Self {
        Self(Sustained::new(cfg))
    }
}

impl Trigger for QueryLatencyCeiling {
    fn name(&self) -> &'static str {
        "query_latency_ceiling"
    }

    fn should_replan(&mut self, epoch: &Epoch) -> bool {
        let max_s = epoch.metrics.query_lat_s_max;
        let fire = self.0.push(max_s);
        if fire {
            tracing::info!(max_s, ceiling_s = self.0.ceiling, "query latency above ceiling");
        }
        fire
    }

    fn on_replan(&mut self) {
        self.0.clear();
    }

    fn update_blueprint(&mut self, _: Option<&Blueprint>, _: &Blueprint, _: Option<f64>, _: u64) {
        self.0.clear();
    }
}

/// Fires when p90 transaction latency stays above a ceiling.
#[derive(Debug)]
pub struct TxnLatencyCeiling(Sustained);

impl TxnLatencyCeiling {
    pub fn new(cfg: LatencyCeilingConfig) -> Self {
        Self(Sustained::new(cfg))
    }
}

impl Trigger for TxnLatencyCeiling {
    fn name(&self) -> &'static str {
        "txn_latency_ceiling"
    }

    fn should_replan(&mut self, epoch: &Epoch) -> bool {
        let p90_s = epoch.metrics.txn_lat_s_p90;
        let fire = self.0.push(p90_s);
        if fire {
            tracing::info!(p90_s, ceiling_s = self.0.ceiling, "transaction p90 above ceiling");
        }
        fire
    }

    fn on_replan(&mut self) {
        self.0.clear();
    }

    fn update_blueprint(&mut self, _: Option<&Blueprint>, _: &Blueprint, _: Option<f64>, _: u64) {
        self.0.clear();
    }
}

/// Fires once, a delay after a blueprint changed either engine's
/// provisioning, so the plan is revisited with metrics from the new
/// hardware.
#[derive(Debug)]
pub struct RecentChange {
    delay_ms: u64,
    changed_at_ms: Option<u64>,
}

impl RecentChange {
    pub fn new(cfg: RecentChangeConfig, epoch_length_ms: u64) -> Self {
        Self {
            delay_ms: u64::from(cfg.delay_epochs) * epoch_length_ms,
            changed_at_ms: None,
        }
    }
}

fn provisioning_changed(prev: &Blueprint, next: &Blueprint) -> bool {
    prev.aurora() != next.aurora() || prev.redshift() != next.redshift()
}

impl Trigger for RecentChange {
    fn name(&self) -> &'static str {
        "recent_change"
    }

    fn should_replan(&mut self, epoch: &Epoch) -> bool {
        let Some(changed) = self.changed_at_ms else {
            return false;
        };
        if epoch.at_ms <= changed.saturating_add(self.delay_ms) {
            return false;
        }
        self.changed_at_ms = None;
        tracing::info!(changed_at_ms = changed, "revisiting a recent provisioning change");
        true
    }

    fn on_replan(&mut self) {
        self.changed_at_ms = None;
    }

    fn update_blueprint(
        &mut self,
        prev: Option<&Blueprint>,
        next: &Blueprint,
        _: Option<f64>,
        at_ms: u64,
    ) {
        self.changed_at_ms = match prev {
            Some(prev) if provisioning_changed(prev, next) => Some(at_ms),
            _ => None,
        };
    }
}

/// Fires when the observed hourly scan cost moves more than a fraction away
/// from what the serving plan predicted, in either direction.
#[derive(Debug)]
pub struct VariableCosts {
    change_ratio: f64,
    expected_usd: Option<f64>,
}

impl VariableCosts {
    pub fn new(cfg: VariableCostsConfig) -> Self {
        Self {
            change_ratio: 1.0 + cfg.threshold,
            expected_usd: None,
        }
    }
}

impl Trigger for VariableCosts {
    fn name(&self) -> &'static str {
        "variable_costs"
    }

    fn should_replan(&mut self, epoch: &Epoch) -> bool {
        let (Some(expected), Some(current)) = (self.expected_usd, epoch.scan_usd_per_hour) else {
            return false;
        };
        if current <= NEGLIGIBLE_SCAN_USD {
            return false;
        }
        let ratio = if expected <= NEGLIGIBLE_SCAN_USD {
            f64::INFINITY
        } else {
            (current / expected).max(expected / current)
        };
        if ratio > self.change_ratio {
            tracing::info!(
                expected_usd = expected,
                current_usd = current,
                ratio,
                "scan cost drifted from the plan"
            );
            return true;
        }
        false
    }

    fn update_blueprint(
        &mut self,
        _: Option<&Blueprint>,
        _: &Blueprint,
        expected_scan_usd: Option<f64>,
        _: u64,
    ) {
        self.expected_usd = expected_scan_usd;
    }
}

/// The configured triggers, checked together once per epoch.
#[derive(Debug, Default)]
pub struct ReplanTriggers {
    triggers: Vec<Box<dyn Trigger>>,
    current: Option<Blueprint>,
    observe_delay_ms: u64,
    /// Epochs ending before this are not checked.
    quiet_until_ms: u64,
}

impl ReplanTriggers {
    /// Every trigger `cfg` enables; none when triggers are disabled.
    pub fn from_config(cfg: &TriggerConfig) -> Self {
        let epoch_ms = cfg.epoch_length_s.saturating_mul(1_000);
        let mut set = Self {
            observe_delay_ms: u64::from(cfg.observe_delay_epochs) * epoch_ms,
            ..Self::default()
        };
        if !cfg.enabled {
            return set;
        }
        if let Some(c) = cfg.query_latency_ceiling {
            set = set.with(QueryLatencyCeiling::new(c));
        }
        if let Some(c) = cfg.txn_latency_ceiling {
            set = set.with(TxnLatencyCeiling::new(c));
        }
        if let Some(c) = cfg.recent_change {
            set = set.with(RecentChange::new(c, epoch_ms));
        }
        if let Some(c) = cfg.variable_costs {
            set = set.with(VariableCosts::new(c));
        }
        set
    }

    pub fn with(mut self, trigger: impl Trigger + 'static) -> Self {
        self.triggers.push(Box::new(trigger));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.triggers.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Starts observing `next`, which began serving at `at_ms`.
    pub fn update_blueprint(&mut self, next: &Blueprint, expected_scan_usd: Option<f64>, at_ms: u64) {
        for t in &mut self.triggers {
            t.update_blueprint(self.current.as_ref(), next, expected_scan_usd, at_ms);
        }
        self.current = Some(next.clone());
        self.quiet_until_ms = at_ms.saturating_add(self.observe_delay_ms);
    }

    /// Feeds `epoch` to every trigger and returns the first that fired. All
    /// triggers see every epoch so their windows stay current.
    pub fn check(&mut self, epoch: &Epoch) -> Option<&'static str> {
        if epoch.at_ms < self.quiet_until_ms {
            tracing::debug!(at_ms = epoch.at_ms, "skipping trigger checks while observing");
            return None;
        }
        let mut fired = None;
        for t in &mut self.triggers {
            if t.should_replan(epoch) && fired.is_none() {
                fired = Some(t.name());
            }
        }
        if fired.is_some() {
            self.on_replan(epoch.at_ms);
        }
        fired
    }

    /// Checks `epoch` and, when a trigger fires, asks the control plane for a
    /// replan. Returns the trigger that fired.
    pub fn check_and_notify(
        &mut self,
        epoch: &Epoch,
        mailbox: &ControlMailbox,
    ) -> Option<&'static str> {
        let name = self.check(epoch)?;
        let queued = mailbox.try_send(ControlRequest::Replan);
        tracing::info!(trigger = name, queued, "requesting replan");
        Some(name)
    }

    /// Resets every trigger after a replan that happened at `at_ms`.
    pub fn on_replan(&mut self, at_ms: u64) {
        for t in &mut self.triggers {
            t.on_replan();
        }
        self.quiet_until_ms = at_ms.saturating_add(self.observe_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::blueprint::{RoutingPolicy, RoutingSpec, TableDef};
    use strata_core::engine::{Engine, EngineBitmap};
    use strata_core::placement::TablePlacement;
    use strata_core::provisioning::Provisioning;

    fn blueprint(aurora: &str, redshift_nodes: u32) -> Blueprint {
        let mut placement = TablePlacement::new();
        placement.set("t", EngineBitmap::of(Engine::Aurora));
        Blueprint::new(
            "s",
            vec![TableDef::new("t")],
            placement,
            Provisioning::new(aurora, 1),
            Provisioning::new("dc2.large", redshift_nodes),
            RoutingSpec::definite(RoutingPolicy::RuleBased),
        )
    }

    fn epoch(at_ms: u64, query_max_s: f64, txn_p90_s: f64) -> Epoch {
        Epoch {
            at_ms,
            metrics: MetricsSnapshot {
                query_lat_s_max: query_max_s,
                txn_lat_s_p90: txn_p90_s,
                ..MetricsSnapshot::default()
            },
            scan_usd_per_hour: None,
        }
    }

    fn ceiling(ceiling_s: f64, sustained_epochs: u32) -> LatencyCeilingConfig {
        LatencyCeilingConfig {
            ceiling_s,
            sustained_epochs,
        }
    }

    #[test]
    fn query_ceiling_needs_every_epoch_above() {
        let mut t = QueryLatencyCeiling::new(ceiling(10.0, 2));
        assert!(!t.should_replan(&epoch(1, 11.0, 0.0)));
        assert!(!t.should_replan(&epoch(2, 10.0, 0.0)), "at the ceiling is not above it");
        assert!(!t.should_replan(&epoch(3, 12.0, 0.0)));
        assert!(t.should_replan(&epoch(4, 12.0, 0.0)));
        t.on_replan();
        assert!(!t.should_replan(&epoch(5, 12.0, 0.0)));
    }

    #[test]
    fn txn_ceiling_fires_above_and_not_below() {
        let mut below = TxnLatencyCeiling::new(ceiling(0.030, 1));
        assert!(!below.should_replan(&epoch(1, 0.0, 0.029)));
        let mut above = TxnLatencyCeiling::new(ceiling(0.030, 1));
        assert!(above.should_replan(&epoch(1, 0.0, 0.031)));
        assert!(!above.should_replan(&epoch(2, 0.0, f64::NAN)));
    }

    #[test]
    fn recent_change_waits_out_its_delay_once() {
        let mut t = RecentChange::new(RecentChangeConfig { delay_epochs: 2 }, 100);
        let first = blueprint("db.r6g.large", 0);
        t.update_blueprint(None, &first, None, 0);
        assert!(!t.should_replan(&epoch(1_000, 0.0, 0.0)), "first blueprint is not a change");

        let bigger = blueprint("db.r6g.xlarge", 0);
        t.update_blueprint(Some(&first), &bigger, None, 1_000);
        assert!(!t.should_replan(&epoch(1_200, 0.0, 0.0)));
        assert!(t.should_replan(&epoch(1_201, 0.0, 0.0)));
        assert!(!t.should_replan(&epoch(1_300, 0.0, 0.0)));

        // Placement-only changes do not count.
        let same = blueprint("db.r6g.xlarge", 0);
        t.update_blueprint(Some(&bigger), &same, None, 2_000);
        assert!(!t.should_replan(&epoch(9_000, 0.0, 0.0)));
    }

    #[test]
    fn variable_costs_fire_on_drift_either_way() {
        let bp = blueprint("db.r6g.large", 0);
        let mut t = VariableCosts::new(VariableCostsConfig { threshold: 0.2 });
        let with_scan = |usd: f64| Epoch {
            scan_usd_per_hour: Some(usd),
            ..Epoch::default()
        };
        assert!(!t.should_replan(&with_scan(5.0)), "no reference yet");

        t.update_blueprint(None, &bp, Some(1.0), 0);
        assert!(!t.should_replan(&with_scan(1.19)));
        assert!(t.should_replan(&with_scan(1.21)));
        assert!(!t.should_replan(&with_scan(0.85)));
        assert!(t.should_replan(&with_scan(0.8)));
        assert!(!t.should_replan(&with_scan(0.0)), "zero cost is ignored");
        assert!(!t.should_replan(&Epoch::default()));
    }

    #[test]
    fn set_skips_epochs_while_observing_a_new_blueprint() {
        let cfg = TriggerConfig {
            epoch_length_s: 1,
            observe_delay_epochs: 2,
            query_latency_ceiling: Some(ceiling(1.0, 1)),
            txn_latency_ceiling: None,
            recent_change: None,
            variable_costs: None,
            ..TriggerConfig::default()
        };
        let mut set = ReplanTriggers::from_config(&cfg);
        assert_eq!(set.names(), vec!["query_latency_ceiling"]);
        set.update_blueprint(&blueprint("db.r6g.large", 0), None, 10_000);
        assert_eq!(set.check(&epoch(11_999, 5.0, 0.0)), None);
        assert_eq!(set.check(&epoch(12_000, 5.0, 0.0)), Some("query_latency_ceiling"));
        // Firing starts a new observation window.
        assert_eq!(set.check(&epoch(13_000, 5.0, 0.0)), None);
        assert_eq!(set.check(&epoch(14_000, 5.0, 0.0)), Some("query_latency_ceiling"));
    }

    #[test]
    fn disabled_config_has_no_triggers() {
        let cfg = TriggerConfig {
            enabled: false,
            ..TriggerConfig::default()
        };
        assert!(ReplanTriggers::from_config(&cfg).is_empty());
        assert_eq!(ReplanTriggers::from_config(&TriggerConfig::default()).names().len(), 4);
    }

    #[tokio::test]
    async fn firing_sends_one_replan_request() {
        let (mailbox, mut rx) = ControlMailbox::new();
        let mut set = ReplanTriggers::default()
            .with(TxnLatencyCeiling::new(ceiling(0.030, 1)))
            .with(QueryLatencyCeiling::new(ceiling(10.0, 1)));

        assert_eq!(set.check_and_notify(&epoch(1, 1.0, 0.010), &mailbox), None);
        assert_eq!(
            set.check_and_notify(&epoch(2, 20.0, 0.050), &mailbox),
            Some("txn_latency_ceiling")
        );
        assert_eq!(rx.recv().await, Some(ControlRequest::Replan));
        assert!(rx.try_recv().is_err());
    }
}
