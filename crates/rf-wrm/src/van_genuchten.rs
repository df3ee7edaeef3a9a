//! van Genuchten retention curve with Mualem relative permeability.

use crate::model::Wrm;
use crate::{WrmError, WrmResult};

/// Mualem pore-connectivity exponent.
const MUALEM_L: f64 = 0.5;

/// van Genuchten (1980) model, `m = 1 - 1/n`.
///
/// ```text
/// Se(pc) = (1 + (alpha pc)^n)^(-m)           pc > 0
/// S      = Sr + (1 - Sr) Se
/// Kr     = Se^l (1 - (1 - Se^(1/m))^m)^2
/// ```
#[derive(Clone, Debug)]
pub struct VanGenuchten {
    alpha: f64,
    n: f64,
    m: f64,
    sr: f64,
}

impl VanGenuchten {
    /// `alpha` in 1/Pa, `n > 1`, residual saturation `0 <= sr < 1`.
    pub fn new(alpha: f64, n: f64, sr: f64) -> WrmResult<Self> {
        let bad = |name, value, reason| WrmError::InvalidParameter {
            model: "van Genuchten",
            name,
            value,
            reason,
        };
        if !(alpha > 0.0 && alpha.is_finite()) {
            return Err(bad("alpha", alpha, "must be positive"));
        }
        if !(n > 1.0 && n.is_finite()) {
            return Err(bad("n", n, "must exceed 1"));
        }
        if !(0.0..1.0).contains(&sr) {
            return Err(bad("sr", sr, "must lie in [0, 1)"));
        }
        Ok(Self {
            alpha,
            n,
            m: 1.0 - 1.0 / n,
            sr,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn n(&self) -> f64 {
        self.n
    }

    fn effective_saturation(&self, pc: f64) -> f64 {
        if pc <= 0.0 {
            return 1.0;
        }
        (1.0 + (self.alpha * pc).powf(self.n)).powf(-self.m)
    }

    fn d_effective_saturation(&self, pc: f64) -> f64 {
        if pc <= 0.0 {
            return 0.0;
        }
        let apc = self.alpha * pc;
        let base = 1.0 + apc.powf(self.n);
        -self.m * self.n * self.alpha * apc.powf(self.n - 1.0) * base.powf(-self.m - 1.0)
    }
}

impl Wrm for VanGenuchten {
    fn name(&self) -> &'static str {
        "van Genuchten"
    }

    fn saturation(&self, pc: f64) -> f64 {
        self.sr + (1.0 - self.sr) * self.effective_saturation(pc)
    }

    fn k_relative(&self, pc: f64) -> f64 {
        if pc <= 0.0 {
            return 1.0;
        }
        let se = self.effective_saturation(pc);
        let g = 1.0 - (1.0 - se.powf(1.0 / self.m)).max(0.0).powf(self.m);
        (se.powf(MUALEM_L) * g * g).clamp(0.0, 1.0)
    }

    fn d_saturation(&self, pc: f64) -> f64 {
        (1.0 - self.sr) * self.d_effective_saturation(pc)
    }

    fn capillary_pressure(&self, s: f64) -> f64 {
        let se = ((s - self.sr) / (1.0 - self.sr)).clamp(f64::EPSILON, 1.0);
        if se >= 1.0 {
            return 0.0;
        }
        (se.powf(-1.0 / self.m) - 1.0).powf(1.0 / self.n) / self.alpha
    }

    fn residual_saturation(&self) -> f64 {
        self.sr
    }

    fn d_k_relative(&self, pc: f64) -> f64 {
        if pc <= 0.0 {
            return 0.0;
        }
        let se = self.effective_saturation(pc);
        let b = 1.0 - se.powf(1.0 / self.m);
        if b <= 0.0 {
            return 0.0;
        }
        let g = 1.0 - b.powf(self.m);
        let dg_dse = b.powf(self.m - 1.0) * se.powf(1.0 / self.m - 1.0);
        let dkr_dse = MUALEM_L * se.powf(MUALEM_L - 1.0) * g * g
            + se.powf(MUALEM_L) * 2.0 * g * dg_dse;
        dkr_dse * self.d_effective_saturation(pc)
    }
}
