pub mod audit;
pub mod config;
pub mod idempotency;
pub mod interlocutor;
pub mod memory;
pub mod session;
pub mod vector;

pub use audit::{AuditRepository, InMemoryAuditRepository};
pub use config::{ConfigRepository, InMemoryConfigRepository};
pub use idempotency::{CacheOutcome, IdempotencyCache, IdempotencyLayer, InMemoryIdempotencyCache};
pub use interlocutor::{InMemoryInterlocutorRepository, InterlocutorRepository};
pub use memory::{InMemoryMemoryRepository, MemoryRepository};
pub use session::{InMemorySessionRepository, SessionRepository};
pub use vector::{InMemoryVectorRepository, VectorRecord, VectorRepository, VectorSearchFilter};
