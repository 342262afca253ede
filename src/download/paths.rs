use std::path::{Path, PathBuf};

use chrono::NaiveDate;

/// Extension given to every canonical image, and to legacy names that had none.
pub const IMAGE_EXTENSION: &str = "jpeg";

/// Directory name for a date bucket: `YYYY-MM-DD`.
pub fn date_dir(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse a date bucket directory name back into a date.
pub fn parse_date_dir(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name, "%Y-%m-%d").ok()
}

/// Characters that are invalid in file names on common filesystems:
/// `/`, `\`, `:`, `*`, `?`, `"`, `<`, `>`, `|`.
pub fn is_reserved_char(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Clean a filename by removing reserved characters.
pub fn clean_filename(filename: &str) -> String {
    filename.chars().filter(|c| !is_reserved_char(*c)).collect()
}

/// Canonical location of an image: `<media>/<date>/<id>_<seed>.jpeg`.
///
/// Depends only on the record and seed, so a re-signed URL for the same
/// image still maps to the same file. `id` is used verbatim; records with
/// ids that are not valid file names are rejected when decoded.
pub fn canonical_image_path(media_root: &Path, date: NaiveDate, id: &str, seed: i64) -> PathBuf {
    media_root
        .join(date_dir(date))
        .join(format!("{}_{}.{}", id, seed, IMAGE_EXTENSION))
}

/// Last path segment of `url`, with the default extension appended when
/// the segment has none. `None` for unparsable URLs or an empty segment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let mut filename = clean_filename(segment);
    if filename.is_empty() {
        return None;
    }
    if !filename.contains('.') {
        filename.push('.');
        filename.push_str(IMAGE_EXTENSION);
    }
    Some(filename)
}

/// Location older versions used for an image: named after its URL.
pub fn legacy_image_path(media_root: &Path, date: NaiveDate, url: &str) -> Option<PathBuf> {
    filename_from_url(url).map(|name| media_root.join(date_dir(date)).join(name))
}

/// Hidden, uniquely named sibling of `path` for writing before publish:
/// `.<name>.<uuid>.<suffix>`. Unique per call, so concurrent writers never
/// share a temporary file.
pub fn temp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!(".{}.{}.{}", name, uuid::Uuid::new_v4().simple(), suffix))
}
