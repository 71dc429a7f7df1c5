// API endpoint tests, grouped by surface.

pub mod biz_config;
pub mod data_plane;
pub mod login_lockout;
pub mod plugins_admin;
pub mod rate_limiting;
pub mod system_setup;
