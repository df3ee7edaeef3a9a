//! Jacobian reuse countdown.

/// Counts down the number of Jacobian callbacks that may reuse the previous
/// numeric values. The first callback of every solve always assembles.
#[derive(Clone, Copy, Debug)]
pub struct JacobianReuse {
    max: usize,
    remaining: usize,
}

impl JacobianReuse {
    pub fn new(max: usize) -> Self {
        Self { max, remaining: 0 }
    }

    /// Forces an assembly at the next callback.
    pub fn reset_for_solve(&mut self) {
        self.remaining = 0;
    }

    /// Returns true when the previous Jacobian may be reused. Otherwise the
    /// caller assembles and the countdown restarts at the configured maximum.
    pub fn should_reuse(&mut self) -> bool {
        if self.remaining > 0 {
            self.remaining -= 1;
            true
        } else {
            self.remaining = self.max;
            false
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
