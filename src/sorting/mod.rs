// Sorting subsystem
//
// Provides:
// - Per-color drop-off slot allocation with derived occupancy
// - The sorting state machine driving the arm through move/grab/release cycles

pub mod coordinator;
pub mod slots;

pub use coordinator::{CommandPort, RobotState, SortingCoordinator};
pub use slots::SlotMap;
