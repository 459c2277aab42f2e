//! Pricing: provisioning, storage, scans, and table movement.
//!
//! All costs are in USD over the workload period unless stated otherwise.

use serde::{Deserialize, Serialize};

use strata_core::config::PlannerConfig;
use strata_core::engine::{Engine, EngineBitmap};
use strata_core::provisioning::Provisioning;

pub const MB: f64 = 1_000_000.0;
const HOURS_PER_MONTH: f64 = 30.0 * 24.0;

/// One-time cost of copying a table onto new engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementCost {
    pub time_s: f64,
    pub usd: f64,
}

impl MovementCost {
    pub fn combine(a: Self, b: Self) -> Self {
        Self {
            time_s: a.time_s + b.time_s,
            usd: a.usd + b.usd,
        }
    }
}

pub fn provisioning_cost(aurora: &Provisioning, redshift: &Provisioning, period_hours: f64) -> f64 {
    (aurora.hourly_cost() + redshift.hourly_cost()) * period_hours
}

/// Bytes Athena bills for one execution; small scans are rounded up.
pub fn athena_billed_bytes(bytes: u64, cfg: &PlannerConfig) -> f64 {
    (bytes as f64).max(cfg.athena_min_mb_per_query * MB)
}

pub fn athena_scan_cost(billed_bytes: f64, cfg: &PlannerConfig) -> f64 {
    billed_bytes / MB * cfg.athena_usd_per_mb_scanned
}

/// Only buffer-pool misses are billed as I/O.
pub fn aurora_scan_cost(pages: f64, hit_rate: f64, cfg: &PlannerConfig) -> f64 {
    pages * (1.0 - hit_rate) * cfg.aurora_usd_per_million_ios / 1_000_000.0
}

/// Storage for one copy of a table on `engine`. Redshift storage is part of
/// its provisioning price.
pub fn table_storage_cost(engine: Engine, mb: f64, period_hours: f64, cfg: &PlannerConfig) -> f64 {
    let per_month = match engine {
        Engine::Athena => cfg.s3_usd_per_mb_per_month,
        Engine::Aurora => cfg.aurora_storage_usd_per_mb_per_month,
        Engine::Redshift => 0.0,
    };
    mb * per_month * period_hours / HOURS_PER_MONTH
}

/// Extract once from the cheapest source, then load into every added engine.
pub fn table_movement(
    mb: f64,
    cur: EngineBitmap,
    next: EngineBitmap,
    cfg: &PlannerConfig,
) -> MovementCost {
    let added = next.difference(cur);
    if added.is_empty() || mb <= 0.0 {
        return MovementCost::default();
    }

    let source = if cur.contains(Engine::Aurora) {
        Engine::Aurora
    } else if cur.contains(Engine::Athena) {
        Engine::Athena
    } else {
        Engine::Redshift
    };

    let mut out = MovementCost {
        time_s: mb / cfg.extract_rate_mb_per_s[source],
        usd: 0.0,
    };
    if source == Engine::Athena {
        out.usd += mb * cfg.athena_usd_per_mb_scanned;
    }
    for engine in added.engines() {
        out.time_s += mb / cfg.load_rate_mb_per_s[engine];
        if engine == Engine::Athena {
            out.usd += mb * cfg.athena_usd_per_mb_scanned;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_prefers_aurora_as_source() {
        let cfg = PlannerConfig::default();
        let cur = EngineBitmap::from_engines([Engine::Aurora, Engine::Athena]);
        let next = cur | EngineBitmap::of(Engine::Redshift);
        let m = table_movement(100.0, cur, next, &cfg);
        assert_eq!(m.time_s, 100.0 / 10.0 + 100.0 / 10.0);
        assert_eq!(m.usd, 0.0);
    }

    #[test]
    fn athena_extract_and_load_are_billed() {
        let cfg = PlannerConfig::default();
        let m = table_movement(
            10.0,
            EngineBitmap::of(Engine::Athena),
            EngineBitmap::from_engines([Engine::Athena, Engine::Redshift]),
            &cfg,
        );
        assert!((m.usd - 10.0 * cfg.athena_usd_per_mb_scanned).abs() < 1e-15);

        let m = table_movement(
            10.0,
            EngineBitmap::of(Engine::Redshift),
            EngineBitmap::from_engines([Engine::Athena, Engine::Redshift]),
            &cfg,
        );
        assert!((m.usd - 10.0 * cfg.athena_usd_per_mb_scanned).abs() < 1e-15);
    }

    #[test]
    fn nothing_added_moves_nothing() {
        let cfg = PlannerConfig::default();
        let bm = EngineBitmap::of(Engine::Aurora);
        assert_eq!(table_movement(5.0, bm, bm, &cfg), MovementCost::default());
    }

    #[test]
    fn small_athena_scans_round_up() {
        let cfg = PlannerConfig::default();
        assert_eq!(athena_billed_bytes(1, &cfg), 10.0 * MB);
        assert_eq!(athena_billed_bytes(50_000_000, &cfg), 50.0 * MB);
    }

    #[test]
    fn storage_scales_with_period() {
        let cfg = PlannerConfig::default();
        let month = table_storage_cost(Engine::Athena, 1000.0, HOURS_PER_MONTH, &cfg);
        assert!((month - 1000.0 * cfg.s3_usd_per_mb_per_month).abs() < 1e-12);
        assert_eq!(table_storage_cost(Engine::Redshift, 1000.0, 1.0, &cfg), 0.0);
    }
}
