// Camera-guided cylinder sorting runtime
//
// A vision subsystem locates cylinders on a worktable, a sorting
// coordinator decides which object to move where, and a motion controller
// drives two linked joints plus a grabber to execute each move.

pub mod config;
pub mod controller;
pub mod kinematics;
pub mod link;
pub mod messages;
pub mod runtime;
pub mod sorting;
pub mod vision;
