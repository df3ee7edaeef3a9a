//! Water retention model trait.

/// Capillary pressure / saturation / relative permeability closure.
///
/// Implementations must be thread-safe (Send + Sync) so cell loops can run in
/// parallel. For every valid parameterization:
///
/// - `saturation` is non-increasing in `pc` and equals 1 for `pc <= 0`,
/// - `k_relative` lies in `[0, 1]` with `k_relative(0) == 1`,
/// - `capillary_pressure` inverts `saturation` on `(residual_saturation, 1]`.
pub trait Wrm: Send + Sync {
    /// Short model name for diagnostics.
    fn name(&self) -> &'static str;

    fn saturation(&self, pc: f64) -> f64;

    fn k_relative(&self, pc: f64) -> f64;

    /// dS/dPc; non-positive.
    fn d_saturation(&self, pc: f64) -> f64;

    fn capillary_pressure(&self, s: f64) -> f64;

    fn residual_saturation(&self) -> f64;

    /// dKr/dPc. Models without an analytic derivative report zero.
    fn d_k_relative(&self, _pc: f64) -> f64 {
        0.0
    }
}
