//! Echo orchestrator: routes inbound messages to calendar, email-draft and
//! timeline actions.

pub mod agent;
pub mod connectors;
pub mod error;
pub mod google_api;
pub mod processor;
pub mod server;
pub mod state;
pub mod types;
