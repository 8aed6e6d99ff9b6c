//! Infrastructure layer - external adapters (remote API, filesystem).
//!
//! This layer handles all I/O operations and external dependencies.

pub mod archive;
pub mod config;
pub mod discord;
pub mod fs_atomic;

pub use archive::pack_directory;
pub use config::{config_file_path, ensure_config_exists, load_config, save_config};
pub use discord::{ArchivedScope, DiscordHttp, GuildApi};
pub use fs_atomic::{write_atomic, write_atomic_blocking};
