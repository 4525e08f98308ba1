pub mod config;
pub mod embedding;
pub mod generation;
pub mod indexer;
pub mod models;
pub mod rag;
pub mod registry;
pub mod server;
pub mod vector_store;

#[cfg(test)]
mod test_support;

pub use config::AppConfig;
pub use server::run_server;
