//! Embedder implementations: remote OpenAI-compatible embeddings and local
//! fastembed ONNX models.

pub mod fastembed;
pub mod openai;
