/// File categorization by extension.
///
/// This module maps file names to bucket names (the subfolders files are sorted
/// into). Buckets are kept in configuration order so that an extension listed under
/// two buckets always resolves to the earlier one.
///
/// # Examples
///
/// ```
/// use downtidy::file_category::{Bucket, Classifier};
///
/// let classifier = Classifier::new(
///     vec![
///         Bucket::new("Images", ["png", "jpg"]),
///         Bucket::new("Documents", ["pdf"]),
///     ],
///     "Other",
/// );
/// assert_eq!(classifier.classify("holiday.PNG"), "Images");
/// assert_eq!(classifier.classify("invoice.pdf"), "Documents");
/// assert_eq!(classifier.classify("README"), "Other");
/// ```
use std::collections::{HashMap, HashSet};

/// A named destination subfolder and the extensions that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    name: String,
    extensions: HashSet<String>,
}

impl Bucket {
    /// Creates a bucket, normalising every extension (trimmed, no leading dot,
    /// lower-case). Empty extensions are dropped.
    pub fn new<I, S>(name: impl Into<String>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            extensions: extensions
                .into_iter()
                .map(|ext| normalize_extension(ext.as_ref()))
                .filter(|ext| !ext.is_empty())
                .collect(),
        }
    }

    /// The bucket (subfolder) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if this bucket lists `ext` (already normalised).
    pub fn contains(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }

    /// Iterates the normalised extensions of this bucket.
    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

/// Normalises a configured extension: trims whitespace, strips leading dots and
/// lower-cases it.
///
/// ```
/// use downtidy::file_category::normalize_extension;
///
/// assert_eq!(normalize_extension(" .JPG "), "jpg");
/// assert_eq!(normalize_extension("tar.gz"), "tar.gz");
/// ```
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Extracts the lower-cased extension of a file name: the text after the final `.`.
///
/// Returns `None` when the name has no `.` or ends with one.
///
/// ```
/// use downtidy::file_category::extension_of;
///
/// assert_eq!(extension_of("report.final.PDF").as_deref(), Some("pdf"));
/// assert_eq!(extension_of("Makefile"), None);
/// assert_eq!(extension_of("trailing."), None);
/// ```
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_lowercase())
    }
}

/// Resolves file names to bucket names.
///
/// Lookups go through an index built once at construction time, which maps each
/// extension to the first bucket (in configuration order) that lists it.
#[derive(Debug, Clone)]
pub struct Classifier {
    buckets: Vec<Bucket>,
    fallback: String,
    index: HashMap<String, usize>,
}

impl Classifier {
    /// Builds a classifier over `buckets` (in priority order) with a catch-all
    /// `fallback` bucket.
    pub fn new(buckets: Vec<Bucket>, fallback: impl Into<String>) -> Self {
        let mut index = HashMap::new();
        for (position, bucket) in buckets.iter().enumerate() {
            for ext in bucket.extensions() {
                // first bucket wins
                index.entry(ext.to_string()).or_insert(position);
            }
        }

        Self {
            buckets,
            fallback: fallback.into(),
            index,
        }
    }

    /// Returns the bucket a file with this name belongs to.
    ///
    /// Names without an extension, and extensions no bucket lists, resolve to the
    /// fallback bucket.
    pub fn classify(&self, file_name: &str) -> &str {
        extension_of(file_name)
            .and_then(|ext| self.bucket_for_extension(&ext))
            .unwrap_or(self.fallback.as_str())
    }

    /// Looks up a normalised extension, returning the owning bucket name if any.
    pub fn bucket_for_extension(&self, ext: &str) -> Option<&str> {
        self.index
            .get(ext)
            .map(|&position| self.buckets[position].name())
    }

    /// The catch-all bucket name.
    pub fn fallback(&self) -> &str {
        &self.fallback
    }
}

/// The built-in bucket table used when the configuration has no `[mappings]`.
pub fn default_buckets() -> Vec<Bucket> {
    vec![
        Bucket::new(
            "Images",
            ["jpg", "jpeg", "png", "gif", "webp", "tiff", "svg", "heic"],
        ),
        Bucket::new("Videos", ["mp4", "mov", "mkv", "avi", "webm"]),
        Bucket::new("Audio", ["mp3", "wav", "m4a", "flac", "aac", "ogg"]),
        Bucket::new(
            "Documents",
            ["pdf", "doc", "docx", "txt", "rtf", "odt", "pages", "md"],
        ),
        Bucket::new("Spreadsheets", ["xls", "xlsx", "csv", "ods"]),
        Bucket::new("Presentations", ["ppt", "pptx", "key"]),
        Bucket::new("Archives", ["zip", "rar", "7z", "tar", "gz", "bz2"]),
        Bucket::new(
            "Code",
            [
                "py", "js", "ts", "json", "yml", "yaml", "toml", "html", "css", "sh", "go", "rs",
            ],
        ),
        Bucket::new("Installers", ["dmg", "pkg", "app", "exe", "msi"]),
        Bucket::new("Fonts", ["ttf", "otf", "woff", "woff2"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(default_buckets(), "Other")
    }

    #[test]
    fn test_mapped_extensions() {
        let classifier = classifier();
        assert_eq!(classifier.classify("photo.png"), "Images");
        assert_eq!(classifier.classify("clip.mkv"), "Videos");
        assert_eq!(classifier.classify("song.flac"), "Audio");
        assert_eq!(classifier.classify("notes.md"), "Documents");
        assert_eq!(classifier.classify("setup.msi"), "Installers");
    }

    #[test]
    fn test_classify_case_insensitive() {
        let classifier = classifier();
        assert_eq!(classifier.classify("PHOTO.PNG"), "Images");
        assert_eq!(classifier.classify("Report.Pdf"), "Documents");
    }

    #[test]
    fn test_unmapped_or_missing_extension_uses_fallback() {
        let classifier = classifier();
        assert_eq!(classifier.classify("data.xyz"), "Other");
        assert_eq!(classifier.classify("LICENSE"), "Other");
        assert_eq!(classifier.classify("weird."), "Other");
    }

    #[test]
    fn test_only_final_extension_counts() {
        let classifier = classifier();
        assert_eq!(classifier.classify("backup.tar.gz"), "Archives");
        assert_eq!(classifier.classify("photo.png.txt"), "Documents");
    }

    #[test]
    fn test_duplicate_extension_first_bucket_wins() {
        let classifier = Classifier::new(
            vec![
                Bucket::new("First", ["x", "a"]),
                Bucket::new("Second", ["x", "b"]),
            ],
            "Other",
        );

        for _ in 0..10 {
            assert_eq!(classifier.classify("file.x"), "First");
        }
        assert_eq!(classifier.classify("file.b"), "Second");
    }

    #[test]
    fn test_bucket_normalises_extensions() {
        let bucket = Bucket::new("Docs", [".PDF", " txt ", ""]);
        assert!(bucket.contains("pdf"));
        assert!(bucket.contains("txt"));
        assert_eq!(bucket.extensions().count(), 2);
    }

    #[test]
    fn test_custom_fallback() {
        let classifier = Classifier::new(Vec::new(), "Misc");
        assert_eq!(classifier.classify("anything.png"), "Misc");
        assert_eq!(classifier.fallback(), "Misc");
    }
}
