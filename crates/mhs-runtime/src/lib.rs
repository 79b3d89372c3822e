//! # MHS Runtime
//!
//! Wiring for the Message Handling Service process.
//!
//! ## Modular Structure
//!
//! - `config` - Process configuration from the environment
//! - `runtime` - Engine, queues and listener lifecycle
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging
//! 2. Load configuration and the interaction registry
//! 3. Wire the engine to the state store, HTTP transport and queues
//! 4. Start the acknowledgement listener
//! 5. Run until Ctrl+C, then stop the listener and log final counters

pub mod config;
pub mod runtime;

pub use config::RuntimeConfig;
pub use runtime::MhsRuntime;
