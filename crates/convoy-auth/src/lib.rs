//! Convoy Auth - bearer credential verification and permission matching.
//!
//! A credential is three dot-separated base64url segments (HS256). The
//! verifier checks the signature and the time claims, resolves the
//! principal id, and expands role names into permission lists through a
//! configured role→permissions mapping. Downstream, a
//! [`ResourceGuard`] selects `<resource>.read` for idempotent verbs and
//! `<resource>.write` for mutating ones, and admits the request if any
//! granted permission matches (`*`, `<resource>.*`, or exact).

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod permission;
mod verifier;

pub use permission::{AccessMode, ResourceGuard, any_grants, permission_grants};
pub use verifier::{AuthError, AuthResult, Claims, Verified, Verifier, mint};
