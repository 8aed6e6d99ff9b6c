//! Domain layer - core types and rules.
//!
//! This layer contains canonical records, configuration, the schedule
//! grammar and error types without any I/O.

pub mod config;
pub mod error;
pub mod models;
pub mod schedule;

pub use config::{AppConfig, BackupConfig, FormatSet, OutputFormat};
pub use error::{AppError, Result};
pub use models::{
    AttachmentRef, CategoryRecord, ChannelKind, ChannelRecord, EmojiRecord, MemberRecord,
    MessageRecord, OverwriteRecord, PresenceStatus, ReactionRecord, ReactionUser, RoleRecord,
    RunReport, Snowflake, StructureDoc, TargetKind, UNKNOWN_AUTHOR,
};
pub use schedule::Schedule;
