use scraper::Html;

use crate::errors::{AgentError, AgentResult};
use crate::files::{DownloadedFile, FileStorage};

/// Download a stored file and extract its text.
///
/// Download and aborted extraction are errors. Files that cannot be parsed
/// yield empty text.
pub async fn extract_from_storage(
    storage: &dyn FileStorage,
    api_key: &str,
    url: &str,
) -> AgentResult<String> {
    let file = storage.download(api_key, url).await?;
    let name = file.name.clone();
    run_blocking(&name, move || extract_text(&file)).await
}

async fn run_blocking<F>(name: &str, extract: F) -> AgentResult<String>
where
    F: FnOnce() -> String + Send + 'static,
{
    tokio::task::spawn_blocking(extract).await.map_err(|e| {
        tracing::error!("text extraction of {} aborted: {}", name, e);
        AgentError::Extraction(format!("{}: {}", name, e))
    })
}

/// UTF-8 text with invalid byte sequences dropped
fn decode_text(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}

/// Extract plain text, choosing the format from the file extension
pub fn extract_text(file: &DownloadedFile) -> String {
    let result = match file.extension().as_str() {
        ".pdf" => extract_pdf(&file.bytes),
        ".csv" => csv_to_markdown(&decode_text(&file.bytes)),
        ".html" | ".htm" => Ok(html_to_text(&decode_text(&file.bytes))),
        _ => Ok(decode_text(&file.bytes)),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("could not extract text from {}: {}", file.name, e);
        String::new()
    })
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    // pdf-extract panics on some malformed documents
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| "the PDF parser panicked".to_string())?
        .map_err(|e| format!("{:?}", e))
}

/// Render CSV as a markdown table, the header row first
pub fn csv_to_markdown(content: &str) -> Result<String, String> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(escape_cell)
        .collect();
    if headers.is_empty() {
        return Ok(String::new());
    }

    let mut lines = vec![
        format!("| {} |", headers.join(" | ")),
        format!("|{}", " --- |".repeat(headers.len())),
    ];
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let cells: Vec<String> = (0..headers.len())
            .map(|i| escape_cell(record.get(i).unwrap_or_default()))
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }

    Ok(lines.join("\n"))
}

fn escape_cell(cell: &str) -> String {
    cell.trim().replace('|', "\\|").replace('\n', " ")
}

/// Visible text of an HTML document, one trimmed text node per line
pub fn html_to_text(content: &str) -> String {
    let document = Html::parse_document(content);
    document
        .tree
        .root()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| matches!(el.name(), "script" | "style"))
            });
            let text = text.trim();
            (!hidden && !text.is_empty()).then(|| text.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, content: &[u8]) -> DownloadedFile {
        DownloadedFile {
            name: name.to_string(),
            bytes: content.to_vec(),
        }
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(extract_text(&file("notes.TXT", b"hello\nworld")), "hello\nworld");
    }

    #[test]
    fn test_invalid_utf8_bytes_are_dropped() {
        assert_eq!(extract_text(&file("notes.txt", &[b'a', 0xff, b'b'])), "ab");
        assert_eq!(
            extract_text(&file("data.bin", &[0xc3, b'x', 0xe2, 0x82, b'y'])),
            "xy"
        );
        // a real replacement character in the source survives
        assert_eq!(extract_text(&file("notes.txt", "a\u{FFFD}b".as_bytes())), "a\u{FFFD}b");
    }

    #[tokio::test]
    async fn test_aborted_extraction_is_an_error() {
        let result = run_blocking("broken.pdf", || panic!("parser crashed")).await;
        assert!(matches!(result, Err(AgentError::Extraction(ref m)) if m.starts_with("broken.pdf")));
    }

    #[test]
    fn test_unknown_extension_falls_back_to_text() {
        assert_eq!(extract_text(&file("data.json", b"{\"a\": 1}")), "{\"a\": 1}");
        assert_eq!(extract_text(&file("README", b"read me")), "read me");
    }

    #[test]
    fn test_csv_as_markdown() {
        let text = extract_text(&file("sales.csv", b"region,revenue\nnorth,10\nsouth,7\n"));
        assert_eq!(
            text,
            "| region | revenue |\n| --- | --- |\n| north | 10 |\n| south | 7 |"
        );
    }

    #[test]
    fn test_csv_ragged_rows_and_pipes() {
        let text = csv_to_markdown("a,b\n1\nx|y,2,extra\n").unwrap();
        assert_eq!(text, "| a | b |\n| --- | --- |\n| 1 |  |\n| x\\|y | 2 |");
    }

    #[test]
    fn test_html_drops_scripts_and_styles() {
        let html = r#"<html><head><title>Report</title><style>body { color: red; }</style></head>
            <body><h1> Results </h1><script>var x = 1;</script><p>Revenue <b>grew</b>.</p></body></html>"#;
        let text = extract_text(&file("page.html", html.as_bytes()));
        assert_eq!(text, "Report\nResults\nRevenue\ngrew\n.");
    }

    #[test]
    fn test_broken_pdf_yields_empty_text() {
        assert_eq!(extract_text(&file("broken.pdf", b"not a pdf at all")), "");
    }
}
