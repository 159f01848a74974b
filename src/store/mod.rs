pub mod definition_cache;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use definition_cache::{DefinitionCache, ResolvedDefinition};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::DefinitionStore;
