//! Various unsorted geometrical and logical operators.

pub use self::communicator::{Communicator, SerialCommunicator};
pub use self::fuzzy::*;
pub use self::geometry::*;
pub use self::sorted_pair::SortedPair;

mod communicator;
mod fuzzy;
mod geometry;
pub mod hashmap;
mod sorted_pair;
