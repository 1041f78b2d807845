//! Durable store (L3): repository contract and its backends.

mod memory;
mod mongo;
mod pastes;
mod sqlite;
mod store;

pub use memory::MemoryPasteRepository;
pub use mongo::Database;
pub use pastes::MongoPasteRepository;
pub use sqlite::SqlitePasteRepository;
pub use store::{PastePatch, PasteRepository};
