use std::collections::HashMap;
use std::path::Path;

const PACKAGED_TABLE: &str = include_str!("mime.types");
const FALLBACK: &str = "application/octet-stream";

/// Extension → MIME type lookup table, parsed from nginx `mime.types`
/// syntax: `type ext1 ext2 ...;` lines inside an (optional) `types { }`
/// block. The packaged table ships a common subset; `load_from` merges in
/// a user-supplied file, overriding on conflict.
#[derive(Debug, Clone)]
pub struct MimeTypes {
    by_extension: HashMap<String, String>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        let mut table = Self { by_extension: HashMap::new() };
        table.merge(PACKAGED_TABLE);
        table
    }
}

impl MimeTypes {
    pub fn load_from(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut table = Self::default();
        table.merge(&std::fs::read_to_string(path)?);
        Ok(table)
    }

    fn merge(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim().trim_end_matches(';');
            if line.is_empty() || line.ends_with('{') || line.starts_with('}') || line.starts_with("types") {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(mime) = parts.next() else { continue };
            for ext in parts {
                self.by_extension.insert(ext.to_ascii_lowercase(), mime.to_string());
            }
        }
    }

    /// Resolves a file's content type from its extension, or `None` if the
    /// extension is unrecognized (callers fall back to `application/octet-stream`
    /// plus a `Content-Disposition: attachment` per §4.5).
    pub fn lookup(&self, path: impl AsRef<Path>) -> Option<&str> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        self.by_extension.get(&ext).map(String::as_str)
    }

    pub fn lookup_or_octet_stream(&self, path: impl AsRef<Path>) -> &str {
        self.lookup(path).unwrap_or(FALLBACK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_common_extensions() {
        let table = MimeTypes::default();
        assert_eq!(table.lookup("index.html"), Some("text/html"));
        assert_eq!(table.lookup("photo.JPG"), Some("image/jpeg"));
    }

    #[test]
    fn unknown_extension_falls_back() {
        let table = MimeTypes::default();
        assert_eq!(table.lookup("data.xyz123"), None);
        assert_eq!(table.lookup_or_octet_stream("data.xyz123"), "application/octet-stream");
    }

    #[test]
    fn user_table_overrides_packaged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mime.types");
        std::fs::write(&path, "types {\n  application/x-custom cst;\n}\n").unwrap();
        let table = MimeTypes::load_from(&path).unwrap();
        assert_eq!(table.lookup("a.cst"), Some("application/x-custom"));
        assert_eq!(table.lookup("a.html"), Some("text/html"));
    }
}
