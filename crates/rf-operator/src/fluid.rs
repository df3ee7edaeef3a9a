//! Liquid phase properties.

use rf_core::units::{Accel, Density, DynVisc, Pressure, constants, kgpm3, pa_s};

/// Constant liquid properties plus gravity and the atmospheric reference.
#[derive(Clone, Copy, Debug)]
pub struct FluidProperties {
    pub density: Density,
    pub viscosity: DynVisc,
    /// Gravity magnitude; gravity acts along the negative last axis.
    pub gravity: Accel,
    pub p_atm: Pressure,
}

impl FluidProperties {
    /// Water at 20 °C under standard gravity.
    pub fn water() -> Self {
        Self {
            density: kgpm3(998.2),
            viscosity: pa_s(1.002e-3),
            gravity: constants::g0(),
            p_atm: constants::p_atm(),
        }
    }

    pub fn without_gravity(mut self) -> Self {
        self.gravity = rf_core::units::mps2(0.0);
        self
    }

    #[inline]
    pub fn rho(&self) -> f64 {
        self.density.value
    }

    #[inline]
    pub fn mu(&self) -> f64 {
        self.viscosity.value
    }

    #[inline]
    pub fn g(&self) -> f64 {
        self.gravity.value
    }

    #[inline]
    pub fn p_atm_pa(&self) -> f64 {
        self.p_atm.value
    }

    /// Mass mobility prefactor `rho / mu`.
    #[inline]
    pub fn mobility(&self) -> f64 {
        self.rho() / self.mu()
    }

    /// Hydraulic potential `p + rho g z`.
    #[inline]
    pub fn potential(&self, p: f64, z: f64) -> f64 {
        p + self.rho() * self.g() * z
    }

    /// Capillary pressure for a liquid pressure.
    #[inline]
    pub fn capillary(&self, p: f64) -> f64 {
        self.p_atm_pa() - p
    }
}

impl Default for FluidProperties {
    fn default() -> Self {
        Self::water()
    }
}
