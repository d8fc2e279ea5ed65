pub mod protocol;
pub mod supervisor;

pub use protocol::{WorkerCommand, WorkerResponse, WorkerStatus};
pub use supervisor::{SupervisorConfig, WorkerPhase, WorkerSupervisor};
