// Integration test suite for RingForge.
//
// Organized by control-plane feature area; each module shares
// common::TestClient for DB lifecycle management. The gateway_* modules
// drive the WebSocket protocol end to end against a real listener.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/system.rs"]
mod system;

#[path = "integration/tenants.rs"]
mod tenants;

#[path = "integration/fleets.rs"]
mod fleets;

#[path = "integration/keys.rs"]
mod keys;

#[path = "integration/usage.rs"]
mod usage;

#[path = "integration/gateway_common.rs"]
mod gateway_common;

#[path = "integration/gateway_replay.rs"]
mod gateway_replay;

#[path = "integration/gateway_memory.rs"]
mod gateway_memory;

#[path = "integration/gateway_dm.rs"]
mod gateway_dm;

#[path = "integration/gateway_tasks.rs"]
mod gateway_tasks;

#[path = "integration/gateway_tenancy.rs"]
mod gateway_tenancy;

#[path = "integration/gateway_quota.rs"]
mod gateway_quota;
