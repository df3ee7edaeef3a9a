//! Brooks–Corey retention curve with Burdine relative permeability.

use crate::model::Wrm;
use crate::{WrmError, WrmResult};

/// Brooks–Corey (1964) model.
///
/// `Se = (pc / pc_b)^(-lambda)` above the air-entry pressure `pc_b`,
/// `Kr = Se^((2 + 3 lambda) / lambda)`.
#[derive(Clone, Debug)]
pub struct BrooksCorey {
    air_entry: f64,
    lambda: f64,
    sr: f64,
}

impl BrooksCorey {
    pub fn new(air_entry: f64, lambda: f64, sr: f64) -> WrmResult<Self> {
        let bad = |name, value, reason| WrmError::InvalidParameter {
            model: "Brooks-Corey",
            name,
            value,
            reason,
        };
        if !(air_entry > 0.0 && air_entry.is_finite()) {
            return Err(bad("air_entry", air_entry, "must be positive"));
        }
        if !(lambda > 0.0 && lambda.is_finite()) {
            return Err(bad("lambda", lambda, "must be positive"));
        }
        if !(0.0..1.0).contains(&sr) {
            return Err(bad("sr", sr, "must lie in [0, 1)"));
        }
        Ok(Self {
            air_entry,
            lambda,
            sr,
        })
    }

    fn kr_exponent(&self) -> f64 {
        (2.0 + 3.0 * self.lambda) / self.lambda
    }

    fn effective_saturation(&self, pc: f64) -> f64 {
        if pc <= self.air_entry {
            1.0
        } else {
            (pc / self.air_entry).powf(-self.lambda)
        }
    }
}

impl Wrm for BrooksCorey {
    fn name(&self) -> &'static str {
        "Brooks-Corey"
    }

    fn saturation(&self, pc: f64) -> f64 {
        self.sr + (1.0 - self.sr) * self.effective_saturation(pc)
    }

    fn k_relative(&self, pc: f64) -> f64 {
        self.effective_saturation(pc).powf(self.kr_exponent())
    }

    fn d_saturation(&self, pc: f64) -> f64 {
        if pc <= self.air_entry {
            return 0.0;
        }
        -(1.0 - self.sr) * self.lambda / pc * self.effective_saturation(pc)
    }

    fn capillary_pressure(&self, s: f64) -> f64 {
        let se = ((s - self.sr) / (1.0 - self.sr)).clamp(f64::EPSILON, 1.0);
        self.air_entry * se.powf(-1.0 / self.lambda)
    }

    fn residual_saturation(&self) -> f64 {
        self.sr
    }

    fn d_k_relative(&self, pc: f64) -> f64 {
        if pc <= self.air_entry {
            return 0.0;
        }
        -self.kr_exponent() * self.lambda / pc * self.k_relative(pc)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn monotone_and_bounded(
            pcb in 1e2_f64..1e4,
            lambda in 0.1_f64..3.0,
            pc in 0.0_f64..1e6,
            dpc in 0.0_f64..1e5,
        ) {
            let w = BrooksCorey::new(pcb, lambda, 0.1).unwrap();
            prop_assert!(w.saturation(pc + dpc) <= w.saturation(pc) + 1e-12);
            let kr = w.k_relative(pc);
            prop_assert!((0.0..=1.0).contains(&kr));
        }
    }
}
