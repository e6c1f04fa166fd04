//! Skybridge: a multi-tenant LLM and object-storage gateway.
//!
//! One HTTP service fronts AWS Bedrock, OpenAI, Azure OpenAI, Anthropic,
//! Vertex, IBM watsonx, and Oracle GenAI, plus S3-family, Azure Blob,
//! GCS, and generic HTTPS storage. Clients speak the OpenAI dialect (or
//! hit transparent passthrough paths); the gateway resolves the backend,
//! translates schemas, and attaches credentials minted by an ordered
//! strategy engine.

mod error;

pub mod gateway;
pub mod openai;

pub use error::{Result, SkybridgeError};
