//! ActivityPub federation module
//!
//! Handles:
//! - Actor identity and signing keys
//! - Wire object decoding
//! - Remote object resolution
//! - Local entity ↔ ActivityPub transforms
//! - Content markup conversion

mod error;
mod keys;
mod markup;
mod objects;
mod resolver;
mod transform;


pub use error::FederationError;
pub use keys::{ActorKeyStore, RemoteActor};
pub use markup::{html_to_markdown, markdown_to_html};
pub use objects::*;
pub use resolver::{HttpObjectResolver, ObjectResolver, resolve_reference};
pub use transform::{Federation, MAX_REPLY_DEPTH};

#[cfg(test)]
pub use resolver::MockObjectResolver;
