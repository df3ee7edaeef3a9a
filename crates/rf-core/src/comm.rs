//! SPMD communicator abstraction.
//!
//! Every reduction here is collective: all ranks must call it in the same
//! order. The solver never branches around a reduction on rank-local data,
//! which keeps ranks from deadlocking when one of them fails locally.

use nalgebra::DVector;

use crate::numeric::{Real, owned_sum_squares};
use crate::{RfError, RfResult};

/// Collective operations required by the nonlinear solver stack.
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn max_all(&self, local: Real) -> Real;

    fn min_all(&self, local: Real) -> Real;

    fn sum_all(&self, local: Real) -> Real;

    /// Personalized all-to-all exchange. `send[r]` goes to rank `r`; the
    /// result holds what every rank sent to this one, indexed by source rank.
    fn all_to_all(&self, send: Vec<Vec<usize>>) -> RfResult<Vec<Vec<usize>>>;

    /// Only the IO rank emits rank-local diagnostics.
    fn is_io_rank(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-process communicator: reductions are identities.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn max_all(&self, local: Real) -> Real {
        local
    }

    fn min_all(&self, local: Real) -> Real {
        local
    }

    fn sum_all(&self, local: Real) -> Real {
        local
    }

    fn all_to_all(&self, mut send: Vec<Vec<usize>>) -> RfResult<Vec<Vec<usize>>> {
        if send.len() != 1 {
            return Err(RfError::Collective {
                what: format!("all_to_all expects 1 send buffer, got {}", send.len()),
            });
        }
        Ok(vec![send.swap_remove(0)])
    }
}

/// Global 2-norm over the owned prefix of a distributed vector.
pub fn global_norm2(comm: &dyn Communicator, v: &DVector<Real>, n_owned: usize) -> Real {
    comm.sum_all(owned_sum_squares(v, n_owned)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_reductions_are_identity() {
        let comm = SerialComm;
        assert_eq!(comm.max_all(2.5), 2.5);
        assert_eq!(comm.min_all(-1.0), -1.0);
        assert_eq!(comm.sum_all(4.0), 4.0);
        assert!(comm.is_io_rank());
    }

    #[test]
    fn serial_all_to_all_loops_back() {
        let comm = SerialComm;
        let recv = comm.all_to_all(vec![vec![3, 1, 4]]).unwrap();
        assert_eq!(recv, vec![vec![3, 1, 4]]);
        assert!(comm.all_to_all(vec![vec![], vec![]]).is_err());
    }

    #[test]
    fn norm_skips_ghosts() {
        let v = DVector::from_vec(vec![3.0, 4.0, 100.0]);
        assert!((global_norm2(&SerialComm, &v, 2) - 5.0).abs() < 1e-14);
    }
}
