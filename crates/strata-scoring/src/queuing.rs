//! Queueing delay under load.

/// Waiting-time quantile of an M/M/1 queue.
///
/// `t_q = ln(rho / (1 - q)) * s / (1 - rho)`. Zero when the queue is lightly
/// loaded enough that the `q`-th arrival does not wait at all (`rho <= 1 - q`),
/// or when service is instantaneous. Utilization is clipped to `[0, 1]`; at
/// saturation the denominator is floored so the result stays finite.
pub fn mm1_wait_time(mean_service_time_s: f64, utilization: f64, quantile: f64) -> f64 {
    let rho = utilization.clamp(0.0, 1.0);
    if mean_service_time_s == 0.0 || rho <= 1.0 - quantile {
        return 0.0;
    }
    let num = (rho / (1.0 - quantile)).ln() * mean_service_time_s;
    num / (1.0 - rho).max(1e-6)
}
