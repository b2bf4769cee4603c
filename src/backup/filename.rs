//! Backup filename codec.
//!
//! A backup's filename is its only identity and ordering key; there is no
//! manifest. Names look like `unifi-backup-2025-12-05T00-57-39Z.unf`: UTC,
//! second resolution, hyphens in place of colons so the name is valid on
//! SMB shares and Windows filesystems.
//!
//! Two backups generated within the same second get the same name and the
//! second overwrites the first.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use super::types::FormatError;

/// Prefix of every backup filename
pub const BACKUP_PREFIX: &str = "unifi-backup-";

/// Extension of every backup filename; stores only list keys ending in it
pub const BACKUP_SUFFIX: &str = ".unf";

/// Timestamp layout embedded between prefix and suffix
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%SZ";

/// Build the filename for a backup captured at `now`.
///
/// Sub-second precision is dropped.
pub fn generate_backup_filename(now: DateTime<Utc>) -> String {
    format!("{}{}{}", BACKUP_PREFIX, now.format(TIME_FORMAT), BACKUP_SUFFIX)
}

/// Extract the capture time from a backup filename.
pub fn parse_backup_filename(filename: &str) -> Result<DateTime<Utc>, FormatError> {
    let stamp = filename
        .strip_prefix(BACKUP_PREFIX)
        .and_then(|rest| rest.strip_suffix(BACKUP_SUFFIX))
        .ok_or_else(|| {
            FormatError::new(
                filename,
                format!("expected {}<timestamp>{}", BACKUP_PREFIX, BACKUP_SUFFIX),
            )
        })?;

    let naive = NaiveDateTime::parse_from_str(stamp, TIME_FORMAT)
        .map_err(|e| FormatError::new(filename, format!("bad timestamp {:?}: {}", stamp, e)))?;

    // chrono accepts unpadded fields; only the canonical rendering is a backup name
    if naive.format(TIME_FORMAT).to_string() != stamp {
        return Err(FormatError::new(
            filename,
            format!("timestamp {:?} is not in canonical form", stamp),
        ));
    }

    Ok(Utc.from_utc_datetime(&naive))
}

/// Whether a key carries the backup suffix.
pub fn has_backup_suffix(key: &str) -> bool {
    key.ends_with(BACKUP_SUFFIX)
}
