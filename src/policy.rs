//! Upload allow/deny rules.
//!
//! Rules are keyed on the file extension and on the part's content type.
//! An allow-list, when non-empty, admits only what it names; a deny-list
//! always rejects what it names. Comparisons ignore case.

use std::collections::HashSet;

#[derive(Clone, Debug, Default)]
pub struct UploadPolicy {
    allow_files: HashSet<String>,
    deny_files: HashSet<String>,
    allow_media_types: HashSet<String>,
    deny_media_types: HashSet<String>,
}

impl UploadPolicy {
    pub fn new<I>(allow_files: I, deny_files: I, allow_media_types: I, deny_media_types: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let extensions = |items: I| {
            items
                .into_iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|ext| !ext.is_empty())
                .collect()
        };
        let media_types = |items: I| {
            items
                .into_iter()
                .map(|media| essence(&media))
                .filter(|media| !media.is_empty())
                .collect()
        };
        Self {
            allow_files: extensions(allow_files),
            deny_files: extensions(deny_files),
            allow_media_types: media_types(allow_media_types),
            deny_media_types: media_types(deny_media_types),
        }
    }

    /// Whether an upload named `file_name` with `content_type` must be refused.
    pub fn denied(&self, file_name: &str, content_type: Option<&str>) -> bool {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.allow_files.is_empty() && !self.allow_files.contains(&ext) {
            return true;
        }
        if self.deny_files.contains(&ext) {
            return true;
        }

        let media = content_type.map(essence).unwrap_or_default();
        if !self.allow_media_types.is_empty() && !self.allow_media_types.contains(&media) {
            return true;
        }
        self.deny_media_types.contains(&media)
    }
}

/// `type/subtype` without parameters, lowercased.
fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
