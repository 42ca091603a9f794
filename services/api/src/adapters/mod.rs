pub mod db;
pub mod generator_llm;
pub mod marking_llm;
pub mod memory;

pub use db::DbAdapter;
pub use generator_llm::OpenAiContentGenerator;
pub use marking_llm::OpenAiMarkingAdapter;
pub use memory::MemoryDb;
