//! Centralized constants for the snapshot engine and plugin host
//!
//! This module contains the magic numbers used by the capture queries and
//! the plugin discovery convention, making them easy to find and modify.

// ============================================================================
// Application Info
// ============================================================================

/// Crate name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Crate version from Cargo.toml
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Buffer Size Negotiation
// ============================================================================

/// Initial buffer size for the system process table query (256 KB)
pub const PROCESS_TABLE_INITIAL_BYTES: usize = 0x40000;

/// Initial buffer size for the system handle table query (128 KB)
pub const HANDLE_TABLE_INITIAL_BYTES: usize = 0x20000;

/// Slack added on top of the size the OS reported when retrying a query
pub const QUERY_SIZE_SLACK_BYTES: usize = 0x10000;

/// Maximum resize-and-retry attempts before a query is abandoned
pub const MAX_QUERY_ATTEMPTS: usize = 8;

/// Initial capacity of the module handle array for module enumeration
pub const MODULE_LIST_INITIAL_CAPACITY: usize = 128;

// ============================================================================
// Display Fallbacks
// ============================================================================

/// Label for the idle system process, whose image name field is empty
pub const IDLE_PROCESS_NAME: &str = "System Idle Process";

/// Placeholder when a module short name cannot be derived from its path
pub const UNKNOWN_MODULE_NAME: &str = "[Unknown]";

// ============================================================================
// Plugin Discovery
// ============================================================================

/// Subdirectory scanned for plugins, relative to the host executable
pub const PLUGIN_DIRECTORY_NAME: &str = "plugins";

/// File extension a plugin module must carry (matched case-insensitively)
pub const PLUGIN_FILE_EXTENSION: &str = "dll";
