// Copyright 2025-2026 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # cilverify
//!
//! A runtime verifier for CIL (Common Intermediate Language) bytecode as
//! specified by ECMA-335. Given a method identity, `cilverify` proves that no
//! sequence of well-typed execution of that method body can corrupt memory,
//! break type safety, or violate the structural constraints of the bytecode.
//! A method that verifies is safe to execute under the host runtime's normal
//! trust model; a method that does not must not be executed.
//!
//! # Architecture
//!
//! The core is an abstract interpreter over a typed operand stack, run as a
//! worklist dataflow analysis across the basic blocks of the method body:
//!
//! - **IL Layer** ([`crate::il`]): bounds-checked byte stream reading,
//!   table-driven opcode decoding, branch target resolution
//! - **Metadata Layer** ([`crate::metadata`]): opaque token identities and
//!   the two services the verifier consumes - a reflective type system
//!   oracle and a bytecode provider
//! - **Verification Layer** ([`crate::verifier`]): the stack slot model, the
//!   ECMA-335 I.8.7 type lattice (normal forms, merge, assignability),
//!   basic-block discovery, exception region rules, and the per-opcode
//!   abstract interpreter
//!
//! The verifier performs no I/O and holds no global state: everything it
//! knows about types and method bodies arrives through the
//! [`crate::metadata::TypeOracle`] and [`crate::metadata::BytecodeProvider`]
//! traits, which hosts implement over their own metadata backends. This
//! keeps offline (disk-based) and online (runtime) integrations equally
//! possible.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cilverify::{Verifier, ReportPolicy};
//!
//! // `oracle` and `provider` are host-side implementations of the two
//! // service traits.
//! let verifier = Verifier::new(&oracle, &provider);
//!
//! // Runtime integration: fail fast on the first error.
//! match verifier.verify(method_token, declaring_type_token) {
//!     Ok(()) => { /* mark the method runnable */ }
//!     Err(error) => { /* surface a bad-image failure */ }
//! }
//!
//! // Diagnostic tooling: collect every failure in the method.
//! let failures = verifier.verify_collect(method_token, declaring_type_token)?;
//! for failure in &failures {
//!     eprintln!("{failure}");
//! }
//! # Ok::<(), cilverify::Error>(())
//! ```
//!
//! # Concurrency
//!
//! A verification call is single-threaded, non-blocking, and a pure function
//! of its inputs. Concurrent first-touch invocations for the same method are
//! harmless - both compute the same outcome, and the verifier caches
//! nothing.
//!
//! # Errors
//!
//! Verification failures carry an element of the closed
//! [`crate::verifier::VerifierErrorKind`] enumeration, the IL offset that
//! detected the failure, and an ordered argument list for host-side
//! rendering. See [`crate::Error`] for the crate-level error surface.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust,ignore
/// use cilverify::prelude::*;
///
/// let verifier = Verifier::new(&oracle, &provider);
/// verifier.verify(method, declaring_type)?;
/// ```
pub mod prelude;

/// CIL instruction stream decoding based on ECMA-335 Partition III.
///
/// Provides the byte stream [`crate::il::Parser`], the opcode constant set
/// and dispatch tables, and [`crate::il::decode_instruction`]. Public because
/// hosts embedding the verifier often need to walk IL for their own
/// purposes (disassembly listings, guard insertion).
pub mod il;

/// Metadata identities and the external services the verifier consumes.
///
/// The verifier speaks to its host exclusively through
/// [`crate::metadata::TypeOracle`] (reflective type system queries) and
/// [`crate::metadata::BytecodeProvider`] (method bodies and headers), both
/// keyed by opaque [`crate::metadata::Token`] identities.
pub mod metadata;

/// The per-method verification engine.
///
/// [`crate::verifier::Verifier`] is the entry point; the module also exposes
/// the stack slot model and the ECMA-335 I.8.7 type lattice operations for
/// hosts that want to reuse them in their own analyses.
pub mod verifier;

pub use error::Error;
pub use verifier::{ReportPolicy, Verifier, VerifierArg, VerifierErrorKind, VerifierFailure};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
