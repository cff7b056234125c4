// Port Layer - Interfaces for external dependencies

pub mod id_provider; // seedable for deterministic tests
pub mod job_store;
pub mod process;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdGenerator, RandomIdGenerator};
pub use job_store::{read_chunks, ByteChunkStream, JobStore};
pub use process::{
    ChildProcess, ExecutionError, OutputReader, ProcessExit, ProcessSpawner, SpawnedProcess,
};
pub use time_provider::TimeProvider;
