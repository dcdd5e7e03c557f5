mod error;
pub mod openai;
pub mod registry;
mod sse;
pub mod stub;
mod types;

pub use error::ProviderError;
pub use registry::{ProviderSettings, Registry};
pub use types::*;
