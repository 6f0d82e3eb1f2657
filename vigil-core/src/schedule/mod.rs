//! Main-pass lane scheduling and second-pass recovery.

mod lanes;
mod recovery;
mod state;

pub use lanes::{EventCallback, LaneScheduler, SchedulerEvent};
pub use recovery::{RecoveryCallback, RecoveryScheduler, RecoveryStats};
pub use state::{Lane, LaneItem, LaneLimits, RampChange, RampDirection, SchedulerState};
