//! TLS material for the broker: SANs, key/trust stores and the tools that build them

pub mod manager;
pub mod sans;
pub mod toolchain;

pub use manager::{TlsManager, TlsPhase};
pub use sans::{SanInputs, SanSet, build_sans, parse_current_sans};
pub use toolchain::{ProcessToolRunner, ToolCommand, ToolOutcome, ToolOutput, ToolRunner, classify};
