//! SQLite persistence: users, download history, statistics and cookies.

pub mod cookies;
pub mod db;
pub mod migrations;
