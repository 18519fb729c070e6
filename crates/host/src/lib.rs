// wsgate-host library
// Gates WebSocket upgrades behind an externally supplied accept/reject decision

// Session registry and client state
pub mod session;

// Upgrade listener, decision router, relay and dispatcher
pub mod ws;

// Configuration
pub mod config;

// Error types
pub mod error;
