//! Dockside Tools
//!
//! The tool layer the domain managers call into:
//! - `analytics` - tenant-scoped analytics query client with bounded retries
//! - `catalog` - `Domain` enum, one `AnalyticsTool` per pipe, per-domain registries
//! - `executor` - uniform `ToolResult` and non-failing tool invocation
//! - `error` - `ToolInvokeError`

pub mod analytics;
pub mod catalog;
pub mod error;
pub mod executor;

pub use analytics::{
    AnalyticsBackend, AnalyticsQuery, ColumnMeta, QueryRows, TinybirdClient, TinybirdConfig,
    BRAND_PARAM, TENANT_PARAM,
};
pub use catalog::{AnalyticsTool, Domain, Filter, PipeSpec, ToolCatalog, UnknownDomainError};
pub use error::ToolInvokeError;
pub use executor::{empty_dataset, invoke_all, invoke_tool, ToolResult};
