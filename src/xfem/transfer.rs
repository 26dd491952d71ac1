use crate::mesh::{ElemId, NodeId};

#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
/// The solution vectors copied from parent to child entities when a mesh is cut.
pub struct SolutionStates(u8);

bitflags::bitflags! {
    impl SolutionStates: u8 {
        /// The current solution.
        const CURRENT = 1;
        /// The solution of the previous step.
        const OLD = 1 << 1;
        /// The solution two steps back.
        const OLDER = 1 << 2;
        /// The states of a transient problem.
        const TRANSIENT = Self::CURRENT.bits() | Self::OLD.bits() | Self::OLDER.bits();
    }
}

/// Copies solution data from the entities of a cut mesh to their duplicates.
///
/// The orchestrator calls this once per new node and once per new element, after the
/// entity was added to the mesh and before its parent is deleted.
pub trait SolutionTransfer {
    /// The solution vectors to copy.
    fn states(&self) -> SolutionStates;

    /// Copies the nodal data of `parent` to the new node `child`.
    fn copy_node_data(&mut self, parent: NodeId, child: NodeId, states: SolutionStates);

    /// Copies the elemental and material-point data of `parent` to the new element `child`.
    fn copy_elem_data(&mut self, parent: ElemId, child: ElemId, states: SolutionStates);
}

/// A transfer that copies nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoTransfer;

impl SolutionTransfer for NoTransfer {
    fn states(&self) -> SolutionStates {
        SolutionStates::empty()
    }

    fn copy_node_data(&mut self, _: NodeId, _: NodeId, _: SolutionStates) {}

    fn copy_elem_data(&mut self, _: ElemId, _: ElemId, _: SolutionStates) {}
}
