pub mod blob_store;
pub mod database;
pub mod debounce;
pub mod error;
pub mod file_index;
pub mod fragment;
pub mod graph;
pub mod ignore;
pub mod metadata_store;
pub mod persist;
pub mod registry;
pub mod search;

pub use blob_store::BlobStore;
pub use database::{AudioDatabase, LibraryStats, DEFAULT_DATABASE_KEY};
pub use debounce::Debouncer;
pub use error::LibraryError;
pub use fragment::AudioFileFragment;
pub use graph::FlatDb;
pub use ignore::IgnoreKind;
pub use metadata_store::MetadataStore;
pub use persist::{DirPersist, MemoryPersist, Persist};
pub use registry::FragmentRegistry;
pub use search::SearchResults;
