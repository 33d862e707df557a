//! Client library for a team task board backed by a hosted Postgres
//! platform: typed storage and auth clients, realtime subscriptions, and the
//! board, chat and preference logic the `taskboard` CLI is built from.

pub mod board;
pub mod config;
pub mod errors;
pub mod logging;
pub mod preferences;
pub mod store;
