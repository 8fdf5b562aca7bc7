pub mod error;
pub mod events;
pub mod id;
pub mod observability;
pub mod outcome;
pub mod search_index;
pub mod time;

pub use error::{CoreError, Result};
pub use id::{generate_id, validate_id};
pub use outcome::{IssueSeverity, OperationOutcome, OutcomeIssue};
pub use time::{Clock, ManualClock, SharedClock, SystemClock, now_utc};
