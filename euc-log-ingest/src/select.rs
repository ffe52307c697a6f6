use crate::source::FileEntry;

pub const LOG_FILE_SUFFIX: &str = ".csv";

/// Pick the next log file to ingest after `cursor`.
///
/// Only `.csv` names take part, compared byte-wise, so the logging device must name
/// its files with a sortable prefix (EUC World uses `yyyy_mm_dd_hh_mm_ss`). Returns
/// `None` when every listed file is at or before the cursor, which just means we are
/// caught up.
pub fn select_next(cursor: Option<&str>, listing: &[FileEntry]) -> Option<String> {
    let cursor = cursor.filter(|c| !c.is_empty());

    listing
        .iter()
        .map(|entry| entry.name.as_str())
        .filter(|name| name.ends_with(LOG_FILE_SUFFIX))
        .filter(|name| cursor.map_or(true, |c| *name > c))
        .min()
        .map(str::to_owned)
}
