//! # Pagekit Modules
//!
//! Built-in modules shipped with the Pagekit rendering pipeline.
//!
//! - [`BlockModule`]: `[BLOCK id="..."]` renders a stored HTML block
//! - [`AssetLinksModule`]: writes script and stylesheet tags into pages
//! - [`AnalyticsModule`]: adds the Google Analytics tag when configured
//!
//! ## Example
//!
//! ```ignore
//! use pagekit_modules::{AnalyticsModule, AssetLinksModule, BlockModule};
//!
//! let runtime = Runtime::builder()
//!     .data_service(data)
//!     .module(BlockModule)
//!     .module(AssetLinksModule::new().with_stylesheet("/css/site.css"))
//!     .module(AnalyticsModule)
//!     .build()
//!     .await?;
//! ```

pub mod analytics;
pub mod assets;
pub mod block;

pub use analytics::AnalyticsModule;
pub use assets::AssetLinksModule;
pub use block::BlockModule;
