//! # service-common
//!
//! Shared infrastructure for backend services: the pieces every service ends
//! up writing and nobody wants to write twice.
//!
//! ## Overview
//!
//! - **[`query`]** - JSON filter expressions (`$and`, `$or`, `$not`, `$match`,
//!   `$gt`, `$gte`, `$lt`, `$lte`, `$like`, `$exists`, `$in`) parsed from
//!   untrusted input and compiled to parameterised SQL `WHERE` fragments
//! - **[`queue`]** - Bounded worker pool that consumes a message channel,
//!   acks/nacks every message and drains in-flight work on cancellation
//! - **[`oauth2`]** - TTL cache in front of an RFC 7662 token introspection
//!   endpoint
//! - **[`metadata`]** - Ordered string map carried with queue messages
//! - **[`logging`]** - `tracing` subscriber setup (JSON or pretty)
//!
//! ## Filter to SQL
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Parser as query::parse
//!     participant Compiler as query::Compiler
//!     participant Ctx as MappingContext
//!     participant DB as SQL driver
//!
//!     Client->>Parser: {"$and": [...]}
//!     Parser->>Parser: Scan numbers as BigInt / finite f64
//!     Parser-->>Compiler: Expression
//!     loop every leaf, depth-first
//!         Compiler->>Ctx: translate(key, op, value)
//!         Ctx-->>Compiler: Fragment("a = ?", [value])
//!     end
//!     Compiler-->>DB: "(a = ?) and (b > ?)", [args]
//! ```
//!
//! ## Queue listener lifecycle
//!
//! ```text
//! Created ──listen()──▶ Listening ──cancel / channel closed──▶ Draining ──workers returned──▶ Done
//! ```
//!
//! `done()` in `Created` resolves at once without leaving `Created`.
//!
//! ## Configuration
//!
//! Every component reads its defaults from `SERVICE_*` environment variables
//! through a `from_env()` constructor; see [`logging::LogConfig`],
//! [`queue::ListenerConfig`] and [`oauth2::IntrospectionConfig`].

pub mod logging;
pub mod metadata;
pub mod oauth2;
pub mod query;
pub mod queue;

pub use metadata::Metadata;
