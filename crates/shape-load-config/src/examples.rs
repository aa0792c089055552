// crates/shape-load-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example shape-load.toml.
// Purpose: Give operators a complete, valid starting point.
// Dependencies: none
// ============================================================================

//! ## Overview
//! `shape-load config example` prints [`config_toml_example`]. The text parses
//! and validates as-is; optional keys are shown commented out with the
//! environment variable that can supply them instead.

/// Returns an example configuration covering every section.
#[must_use]
pub const fn config_toml_example() -> &'static str {
    r#"# shape-load.toml

[target]
base_url = "http://localhost:3000/v1/shape/"
root_table = "items"
# database_id = "..."        # or DATABASE_ID
# auth_token = "..."         # or AUTH_TOKEN
dialect = "current"          # "current" (handle) or "legacy" (shape_id)
connect_timeout_ms = 10000
# request_timeout_ms = 60000

[load]
clients = 100
spawn_rate = 10
poll_interval_ms = 1000
shape_fan_out = 1
histogram_mode = "per_operation"
# run_time_secs = 300

[report]
interval_ms = 3000
# coordinator_url = "http://127.0.0.1:8089/"
# worker_id = "worker-1"

[server]
bind = "127.0.0.1:8089"

[logging]
sink = "stderr"              # "stderr", "file" or "none"
# path = "shape-load.log"
"#
}
