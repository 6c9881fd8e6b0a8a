//! Live market data plumbing: provider tools and the quota budget that
//! gates every outbound call.

pub mod providers;
pub mod quota;

pub use providers::{ToolParams, ToolRegistry, TOOL_NAMES};
pub use quota::QuotaManager;
