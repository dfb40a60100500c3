//! Full-page response cache.
//!
//! Rendered pages are stored per normalised url and variant key. Request and
//! response policies decide what may be stored, and instruction markers in
//! the html are expanded either once at render time or on every delivery:
//!
//! ```html
//! <!--instruction:generated-->  <!-- baked into the stored page -->
//! <!--instruction:servedat-->   <!-- expanded on each delivery -->
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_secs = 3600
//! policies = ["method", "bypass_paths", "logged_in", "response_status"]
//! instructions = ["generated", "servedat"]
//! ```

mod admin;
pub mod backend;
mod config;
mod entry;
pub mod instruction;
mod keys;
mod lock;
mod lookup;
mod middleware;
pub mod policy;
mod processor;
mod request;
mod response;
mod store;
mod visitor;

pub use admin::{AdminError, CacheAdmin, EntryInfo};
pub use backend::{BackendError, MemoryBackend, RedisBackend, StorageBackend};
pub use config::{CacheConfig, StaticInstructionConfig};
pub use entry::{EntryError, ResponseEntry};
pub use instruction::{Instruction, InstructionContext, InstructionKind, Pipeline, PipelineError};
pub use lookup::{CacheRequest, StoreError};
pub use middleware::{CacheState, page_cache_layer};
pub use policy::{Admission, CachePolicy, PolicyEngine, PolicyError};
pub use processor::{
    BuildError, CacheOutcome, OUTCOME_HEADER, Processor, RenderError, Reply, Served, Upstream,
};
pub use request::{InboundRequest, RequestDescriptor, UrlError, normalize_url};
pub use response::{Headers, RenderedResponse};
pub use store::CacheStore;
pub use visitor::{DeviceClass, Visitor};
