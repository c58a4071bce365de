//! Workflow model: the declarative step graph and the runtime state of a
//! distributed transaction walking it.

pub mod builder;
pub mod definition;
pub mod error;
pub mod events;
pub mod payload;
pub mod policy;
pub mod state;
pub mod step;
pub mod transaction;

pub use builder::{ROOT_STEP_ID, WorkflowBuilder, WorkflowGraph};
pub use common::{TransactionId, WorkflowId};
pub use definition::StepDefinition;
pub use error::{Result, WorkflowError};
pub use events::TransactionEvent;
pub use payload::{HandlerPayload, PayloadContext, PayloadEntry, StepInput};
pub use policy::Backoff;
pub use state::FlowState;
pub use step::{HandlerType, StepErrorRecord, StepState, TransactionStep};
pub use transaction::{DistributedTransaction, StepFailure};
pub use transaction_store::Version;
