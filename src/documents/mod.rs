// src/documents/mod.rs
pub mod models;
pub mod source;
pub mod text_layer;

pub use models::{AttemptMethod, DocumentEnvelope, DocumentFormat, PhysicalProperties, RecordType};
pub use source::{DocumentSource, FsDocumentSource, MemoryDocumentSource};
