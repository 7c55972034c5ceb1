// Process module - worker slots, their processes and the orchestrator

pub mod orchestrator;
pub mod restart;
pub mod runtime;
pub mod spawner;
pub mod types;

pub use orchestrator::{Orchestrator, SlotSummary};
pub use restart::{CrashLoopPolicy, RestartDecision, RestartWindow};
pub use runtime::{ProcessRuntime, WorkerRuntime};
pub use spawner::{spawn_worker, SpawnedWorker};
pub use types::{ExitReason, WorkerEvent, WorkerExit, WorkerId, WorkerState};
