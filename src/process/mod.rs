// Process module - worker roles, their registry and per-process bookkeeping

mod handle;
mod registry;
pub mod restart;
mod role;
pub mod signal;
pub mod spawner;

pub use handle::{ExitReason, ProcessHandle, ProcessState, ProcessStatus};
pub use registry::ProcessRegistry;
pub use restart::{BackoffStrategy, RestartDecision, RestartPolicy, RestartTracker};
pub use role::{EntryPoint, WorkerKind, WorkerRole};
pub use spawner::{Launcher, SpawnedProcess, WORKER_SUBCOMMAND};
