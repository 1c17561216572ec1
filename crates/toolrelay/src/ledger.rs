pub mod invocation;
pub mod query;
pub mod reader;
pub mod retention;
pub mod session;
pub mod store;

pub use invocation::{AttemptRecord, Invocation, InvocationId, InvocationStatus};
pub use query::{parameters_contain, InvocationQuery};
pub use reader::LedgerReader;
pub use retention::{spawn_retention_sweeper, RetentionPolicy, SweepReport};
pub use session::{Session, SessionSummary};
pub use store::ExecutionLedger;
