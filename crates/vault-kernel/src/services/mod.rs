//! Narrow collaborator contracts the orchestrator depends on but does not
//! own the implementation of: the LLM provider and the credential store.

pub mod keyring;
pub mod llm;
