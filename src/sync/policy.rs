/// Extension of the legacy binary workbook format
pub const LEGACY_EXTENSION: &str = ".xls";

/// Extension of the open XML workbook format
pub const MODERN_EXTENSION: &str = ".xlsx";

/// Decide whether the locally held bytes must be replaced by a server fetch.
///
/// True when the server converted a legacy upload to the modern format, or
/// when at least one edit has been acknowledged since the document loaded.
/// Extensions compare case-insensitively.
pub fn should_fetch(local_name: &str, canonical_filename: &str, revision: u64) -> bool {
    format_converted(local_name, canonical_filename) || revision > 0
}

/// The server holds a transcoded copy of a legacy upload
pub fn format_converted(local_name: &str, canonical_filename: &str) -> bool {
    has_extension(local_name, LEGACY_EXTENSION)
        && has_extension(canonical_filename, MODERN_EXTENSION)
}

fn has_extension(name: &str, extension: &str) -> bool {
    name.to_lowercase().ends_with(extension)
}
