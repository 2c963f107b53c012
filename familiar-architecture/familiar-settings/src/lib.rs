//! # Familiar Settings
//!
//! Dynamic settings runtime for the Familiar platform: a process-wide
//! reconciliation engine that merges a structured file, a `.env` file, and
//! the process environment into one validated settings tree, kept live
//! through a control plane carried inside the settings themselves.
//!
//! ## Architecture
//!
//! - `store` - the layered last-writer-wins value store the three sources
//!   write into.
//! - `source` - the three snapshot readers (`file`, `dotenv`, `env`) plus the
//!   shared `FreshnessToken` type.
//! - `projection` - reprojects stored entries into the control view and the
//!   effective (business) view.
//! - `control` - the `ControlModel` read from the reserved control root.
//! - `registry` / `schema` - owner-scoped section declaration and the
//!   dynamic schema tree assembled from it.
//! - `query` - resolves a string path or a declared section's type against
//!   the validated settings root.
//! - `source_sync` / `convergence` - when sources re-read, and how the
//!   control plane converges to a fixed point.
//! - `manager` - `SettingsManager`, the single entry point that wires all of
//!   the above together.
//! - `settings_ref` - `SettingsRef<T>`, a lazy typed handle for application
//!   code to hold as a constant.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use familiar_settings::{SettingsManager, SettingsRef};
//!
//! SettingsManager::global().init(None, None)?;
//!
//! static APP: SettingsRef<AppSection> = SettingsRef::path("app");
//! let app = APP.get()?;
//! ```

pub mod control;
pub mod convergence;
pub mod env_key;
pub mod error;
pub mod manager;
pub mod path;
pub mod projection;
pub mod query;
pub mod registry;
pub mod scalar;
pub mod schema;
pub mod settings_ref;
pub mod source;
pub mod source_sync;
pub mod store;

pub use control::{ControlModel, ReloadMode};
pub use error::SettingsError;
pub use manager::{SettingsManager, SettingsSource, StaticSection};
pub use path::Path;
pub use query::{ResolveApi, ResolveTarget};
pub use registry::{OwnerDiscovery, RegisteredSection, SchemaRegistry, SectionKind, SectionModel};
pub use schema::{BuiltSchema, SchemaNode};
pub use settings_ref::SettingsRef;
pub use source_sync::SyncMode;
pub use store::SourceName;
