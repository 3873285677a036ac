//! Authentication and authorization for Laurel
//!
//! Provides:
//! - JWT token validation and actor context derivation
//! - The scope resolver: every authorization decision routes through here
//! - The role enumeration and data-scope model

pub mod context;
pub mod scope;
pub mod token;

pub use context::{ActorContext, DataScope, Role};
pub use token::{actor_from_claims, extract_token_from_header, Claims, TokenVerifier};
