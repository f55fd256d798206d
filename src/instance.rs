use crate::types::InstrId;
use core::fmt::Debug;
use std::sync::Arc;

/// A live execution unit active in the current pass.
///
/// Instances are never owned by a graph. A pass borrows the chain for its
/// duration and the graph maps its nodes onto the chain position by
/// position, so cached graphs can be reused with entirely different
/// instance objects as long as the sequence of types repeats.
pub trait Instance: Debug + Send + Sync {
    /// Type the instance belongs to. Access sets and weights are looked
    /// up by this id.
    fn instr_id(&self) -> InstrId;
}

impl<T: Instance + ?Sized> Instance for &T {
    fn instr_id(&self) -> InstrId {
        (**self).instr_id()
    }
}

impl<T: Instance + ?Sized> Instance for Box<T> {
    fn instr_id(&self) -> InstrId {
        (**self).instr_id()
    }
}

impl<T: Instance + ?Sized> Instance for Arc<T> {
    fn instr_id(&self) -> InstrId {
        (**self).instr_id()
    }
}
