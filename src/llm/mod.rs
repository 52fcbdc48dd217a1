pub mod gemini;
pub mod generation;
pub mod media;

pub use gemini::GeminiClient;
pub use generation::{GenerationClient, GenerationFailure, GenerationRequest};
