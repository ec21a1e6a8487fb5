//! # LLM Gateway Core
//!
//! Request-path engine of the gateway.
//!
//! ## Architecture
//!
//! ```text
//! llmgate-core/src/
//! ├── kv/             # KV store contract, memory + redis backends, circuit breaker
//! ├── registry/       # (tenant, model) → deployment records over the KV store
//! ├── loadbalancing   # round-robin / random instance selection
//! ├── provider/       # Azure OpenAI and OpenAI request rewriting
//! ├── auth/           # Argon2id key hashing, key store, authenticators
//! └── proxy/
//!     ├── middleware/ # transport chain: recover → auth → rate limit → policies → metrics
//!     ├── handler     # body cap, model extraction, adapter routing
//!     ├── upstream    # shared reqwest client, base transport
//!     ├── streaming   # chunked response pump with write deadline
//!     ├── server      # axum router, health, /metrics, serve
//!     └── prometheus  # metrics recorder install and rendering
//! ```
//!
//! Control flow: client → router → handler → transport chain → adapter
//! rewrite → upstream. Response bytes stream back without buffering.

#![allow(
    clippy::significant_drop_tightening,
    reason = "Mutex guards in selectors and limiters are held for a single map update"
)]
#![allow(
    clippy::wildcard_enum_match_arm,
    reason = "Error enums are non_exhaustive; wildcards keep matches forward compatible"
)]
#![allow(clippy::map_err_ignore, reason = "Error context is provided in the replacement message")]
#![allow(clippy::implicit_clone, reason = "Explicit .clone() vs .to_string() is stylistic")]
#![allow(
    clippy::derive_partial_eq_without_eq,
    reason = "Some types intentionally don't implement Eq"
)]
// Test-only lints: allow panic!, println!, etc. in test code
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::float_cmp,
        clippy::needless_collect,
        clippy::assertions_on_result_states
    )
)]

pub mod auth;
pub mod error;
pub mod kv;
pub mod loadbalancing;
pub mod provider;
pub mod proxy;
pub mod registry;

// Re-export commonly used types
pub use error::{AppError, AppResult};
pub use kv::{build_store, KvStore};
pub use proxy::{build_router, serve, ServerDependencies};
pub use registry::ModelRegistry;
