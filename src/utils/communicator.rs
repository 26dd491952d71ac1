use crate::math::Real;

/// Collective reductions over the parallel partitions of a distributed mesh.
///
/// Every call is a synchronous barrier: all partitions contribute their local value and
/// receive the reduced result.
pub trait Communicator: Sync {
    /// Global sum of a scalar.
    fn sum(&self, local: Real) -> Real;
    /// Global sum of a count.
    fn sum_count(&self, local: usize) -> usize;
    /// Global maximum of a scalar.
    fn max(&self, local: Real) -> Real;
    /// Global maximum of an unsigned code.
    fn max_code(&self, local: u32) -> u32;
}

/// The communicator of a run with a single partition: every reduction is the identity.
#[derive(Copy, Clone, Debug, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn sum(&self, local: Real) -> Real {
        local
    }

    fn sum_count(&self, local: usize) -> usize {
        local
    }

    fn max(&self, local: Real) -> Real {
        local
    }

    fn max_code(&self, local: u32) -> u32 {
        local
    }
}
