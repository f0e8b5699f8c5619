//! HTML directory listings

use std::io;
use std::path::Path;

/// A single directory entry as shown in a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Read a directory's entries, sorted case-insensitively by name
///
/// Symlinks are reported by what they point at; broken links show as files.
pub async fn read_entries(dir: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
        });
    }

    entries.sort_by_cached_key(|e| e.name.to_lowercase());
    Ok(entries)
}

/// Render a listing page
///
/// # Arguments
/// * `request_path` - Raw path the directory was requested under; links are
///   built relative to it
/// * `entries` - Entries in display order
pub fn render(request_path: &str, entries: &[ListingEntry]) -> String {
    let base = if request_path.ends_with('/') {
        request_path.to_string()
    } else {
        format!("{}/", request_path)
    };

    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>Contents</title>\n\
         <style>\n\
         body { font-family: Arial, sans-serif; padding: 20px; }\n\
         a { text-decoration: none; }\n\
         a:hover { text-decoration: underline; }\n\
         ul { list-style-type: none; padding: 0; }\n\
         li { margin-bottom: 10px; }\n\
         </style>\n\
         </head>\n<body>\n<h2>Contents</h2>\n<ul>\n",
    );

    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let href = format!("{}{}{}", base, urlencoding::encode(&entry.name), suffix);
        html.push_str(&format!(
            "<li><a href=\"{}\">{}{}</a></li>\n",
            escape_html(&href),
            escape_html(&entry.name),
            suffix
        ));
    }

    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            is_dir,
        }
    }

    #[tokio::test]
    async fn test_read_entries_sorted_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("beta.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("Alpha.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("gamma.txt"), b"g").unwrap();
        std::fs::create_dir(dir.path().join("Delta")).unwrap();

        let entries = read_entries(dir.path()).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha.txt", "beta.txt", "Delta", "gamma.txt"]);
        assert!(entries[2].is_dir);
        assert!(!entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_read_entries_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_entries_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_entries(&dir.path().join("nope")).await.is_err());
    }

    #[test]
    fn test_render_links() {
        let html = render(
            "/tok/docs",
            &[entry("file1.txt", false), entry("my dir", true)],
        );
        assert!(html.contains("<title>Contents</title>"));
        assert!(html.contains("<li><a href=\"/tok/docs/file1.txt\">file1.txt</a></li>"));
        assert!(html.contains("<li><a href=\"/tok/docs/my%20dir/\">my dir/</a></li>"));
    }

    #[test]
    fn test_render_escapes_names() {
        let html = render("/tok/", &[entry("<script>&.txt", false)]);
        assert!(html.contains("&lt;script&gt;&amp;.txt"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_render_empty() {
        let html = render("/tok/", &[]);
        assert!(html.contains("<ul>\n</ul>"));
    }
}
