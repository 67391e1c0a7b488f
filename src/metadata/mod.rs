//! Metadata identities and the external services the verifier consumes.
//!
//! The verifier is deliberately cut off from assembly files: it sees metadata
//! only through two traits. The [`TypeOracle`] answers reflective questions
//! about types, methods, and fields; the [`BytecodeProvider`] hands over raw
//! method bodies and their headers. Both speak in opaque [`Token`] identities.
//!
//! # Key Components
//!
//! - [`Token`] - opaque 32-bit metadata identity
//! - [`TypeOracle`] - reflective type system queries (kinds, base chains,
//!   interfaces, assignability, member signatures)
//! - [`BytecodeProvider`] - IL bytes, locals, body header facts, exception
//!   handling clauses
//! - [`ExceptionRegion`] / [`RegionKind`] - the ECMA-335 II.25.4.6 clause model

mod oracle;
mod provider;
mod token;

pub use oracle::{MemberKind, MemberVisibility, TypeKind, TypeOracle, WellKnown};
pub use provider::{BytecodeProvider, ExceptionRegion, RegionKind};
pub use token::{Token, TokenKind};
