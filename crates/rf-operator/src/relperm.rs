//! Relative permeability evaluation policies.
//!
//! A policy decides where the relative permeability lives. Cell-centered
//! keeps `k_rel` on cells and sets face values to one; the upwind and mean
//! policies keep cell values at one and compute face values. The
//! experimental policy keeps both. Every face coefficient has the form
//!
//! ```text
//! C_f = face_value * H(cell_1 * T_1, cell_2 * T_2)
//! ```
//!
//! with `H` the harmonic average of the half transmissibilities.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelPermMethod {
    /// Upwind by the sign of the gravity potential difference alone.
    #[default]
    UpwindGravity,
    /// Upwind by the sign of the total Darcy flux.
    UpwindDarcyFlux,
    ArithmeticMean,
    /// Flux-upwinded face values times the harmonic cell combination; a
    /// zero potential drop takes the mean of the two cell values.
    Experimental,
    /// Harmonic average of cell values.
    CellCentered,
}

impl RelPermMethod {
    pub fn uses_cell_values(self) -> bool {
        matches!(
            self,
            RelPermMethod::CellCentered | RelPermMethod::Experimental
        )
    }

    pub fn uses_face_values(self) -> bool {
        !matches!(self, RelPermMethod::CellCentered)
    }

    /// Face value and its partial derivatives with respect to the first and
    /// second side values.
    ///
    /// `dphi` is the total potential drop from the first side to the second,
    /// `dphi_gravity` its gravity part. Zero normal flux counts as flow from
    /// the first side into the second.
    pub fn face_value(self, kr1: f64, kr2: f64, dphi: f64, dphi_gravity: f64) -> (f64, [f64; 2]) {
        let upwind = |drop: f64| {
            if drop >= 0.0 {
                (kr1, [1.0, 0.0])
            } else {
                (kr2, [0.0, 1.0])
            }
        };
        let mean = (0.5 * (kr1 + kr2), [0.5, 0.5]);
        match self {
            RelPermMethod::CellCentered => (1.0, [0.0, 0.0]),
            RelPermMethod::ArithmeticMean => mean,
            RelPermMethod::UpwindGravity => upwind(dphi_gravity),
            RelPermMethod::UpwindDarcyFlux => upwind(dphi),
            RelPermMethod::Experimental if dphi == 0.0 => mean,
            RelPermMethod::Experimental => upwind(dphi),
        }
    }
}

/// Harmonic average `ab / (a + b)` and its partial derivatives.
pub fn harmonic(a: f64, b: f64) -> (f64, f64, f64) {
    let s = a + b;
    if s <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    (a * b / s, (b * b) / (s * s), (a * a) / (s * s))
}

/// Relative permeability fields at one iterate.
///
/// Derivative fields (with respect to liquid pressure) are only filled when
/// the operator was built for an analytic Jacobian.
#[derive(Clone, Debug, Default)]
pub struct RelPermField {
    pub cells: Vec<f64>,
    pub faces: Vec<f64>,
    pub d_cells: Vec<f64>,
    /// Derivative of each face value with respect to its first and second
    /// cell pressures.
    pub d_faces: Vec<[f64; 2]>,
}
