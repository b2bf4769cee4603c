// Backup naming and retention
// A backup is identified and ordered only by its filename

pub mod filename;
pub mod retention;
pub mod types;

pub use filename::{
    generate_backup_filename, has_backup_suffix, parse_backup_filename, BACKUP_PREFIX,
    BACKUP_SUFFIX,
};
pub use retention::clean;
pub use types::{BackupRecord, CleanupReport, FailedDeletion, FormatError, RetentionPolicy};
