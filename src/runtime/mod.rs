pub mod clock;
pub mod context;
pub mod error;
pub mod history;
pub mod host;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::OrchestrationContext;
pub use error::OrchestrationError;
pub use history::{HistoryEvent, InstanceRecord, InstanceStatus};
pub use host::{Host, RunOutcome};
