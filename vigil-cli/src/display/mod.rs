mod events;
mod progress;

pub use events::{EventLog, LogMode};
pub use progress::{ProgressWriterFactory, RunProgress};
