//! Claude Transport - subprocess transport for the Claude Code CLI.
//!
//! Drives a long-lived CLI process over its standard streams using a
//! newline-delimited JSON protocol, in either a single-shot ("string
//! prompt") mode or a bidirectional streaming mode with in-band control
//! requests such as interrupt.

pub mod error;
pub mod message;
pub mod transport;
