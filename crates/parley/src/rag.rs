//! Building blocks of document question answering: extracting text from stored
//! files, chunking it, embedding the chunks and searching them.

pub mod cache;
pub mod embeddings;
pub mod extractor;
pub mod index;
pub mod splitter;
