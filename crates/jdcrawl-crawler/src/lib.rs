pub mod error;
pub mod id_store;
pub mod locks;
pub mod orchestrator;
pub mod sink;
pub mod stop;

pub use error::{IdStoreError, OrchestratorError, SinkError};
pub use id_store::FileIdStore;
pub use locks::{PairGuard, PairLocks};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, PairOutcome, PairReport, RunSummary,
};
pub use sink::{JsonlRecordSink, RecordSink};
pub use stop::StopSignal;
