//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the wire format spoken with
//! the ToF sensor board over SPI and the operator telecommands.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Operator telecommands
pub mod tc;

/// Wire definitions for equipment (like the ToF sensor board)
pub mod eqpt;
