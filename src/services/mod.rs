pub mod extraction_service;
pub mod gemini_client;
pub mod harvester;
pub mod lead_parser;
pub mod openai_client;
pub mod prompt;
pub mod run_gate;
#[cfg(test)]
pub mod test_support;

pub use extraction_service::*;
pub use gemini_client::*;
pub use harvester::*;
pub use lead_parser::*;
pub use openai_client::*;
pub use prompt::*;
pub use run_gate::*;
