//! OAuth2 helpers for resource servers.
//!
//! [`IntrospectionCache`] answers "is this bearer token active?" by asking
//! an RFC 7662 introspection endpoint and remembering the verdict for a TTL.

mod introspection;

pub use introspection::{
    IntrospectionCache, IntrospectionConfig, IntrospectionError, IntrospectionResponse,
};
