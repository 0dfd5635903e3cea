// # ixfr-report
//
// Prints, per recipient, the net record changes to the owner names they
// watch, read from an ixfrd JSON-lines change log.
//
// ## Configuration
//
// - `IXFR_REPORT_LOG`: Change log written by ixfrd (`IXFRD_LOG_PATH`);
//   rotated logs ending in `.gz` are decompressed
// - `IXFR_REPORT_WATCHLIST`: JSON object mapping owner name to recipients
//   (default `watchlist.json`)
//
// ```json
// { "www.example.com": ["hostmaster@example.com"] }
// ```

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::env;
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;

use ixfr_core::WatchReport;

async fn run() -> Result<String> {
    let log_path = env::var("IXFR_REPORT_LOG").context("IXFR_REPORT_LOG is required")?;
    let watchlist_path =
        env::var("IXFR_REPORT_WATCHLIST").unwrap_or_else(|_| "watchlist.json".to_string());

    let watchlist = tokio::fs::read_to_string(&watchlist_path)
        .await
        .with_context(|| format!("Failed to read watchlist {}", watchlist_path))?;
    let mut report = WatchReport::from_json(&watchlist)
        .with_context(|| format!("Invalid watchlist {}", watchlist_path))?;

    let log = read_log(Path::new(&log_path))
        .await
        .with_context(|| format!("Failed to read log {}", log_path))?;
    report
        .add_log(&log)
        .with_context(|| format!("Invalid log {}", log_path))?;

    Ok(report.render())
}

/// Log contents, gunzipped when the file name ends in `.gz`
async fn read_log(path: &Path) -> Result<String> {
    let is_gzip = path.extension().is_some_and(|ext| ext == "gz");
    if !is_gzip {
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    let compressed = tokio::fs::read(path).await?;
    let mut content = String::new();
    GzDecoder::new(&compressed[..])
        .read_to_string(&mut content)
        .context("Failed to decompress log")?;
    Ok(content)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(rendered) => {
            print!("{}", rendered);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    const LOG: &str = concat!(
        r#"{"record":"change","zone":"example.com.","serial":11,"deleted":true,"name":"www.example.com.","ttl":300,"rdclass":"IN","rdtype":"A","rdata":"192.0.2.1","text":"www.example.com. 300 IN A 192.0.2.1"}"#,
        "\n",
        r#"{"record":"change","zone":"example.com.","serial":11,"deleted":false,"name":"www.example.com.","ttl":300,"rdclass":"IN","rdtype":"A","rdata":"192.0.2.2","text":"www.example.com. 300 IN A 192.0.2.2"}"#,
        "\n",
    );

    #[tokio::test]
    async fn gzipped_log_is_decompressed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.jsonl.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(LOG.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let content = read_log(&path).await.unwrap();
        assert_eq!(content, LOG);

        let mut report =
            WatchReport::from_json(r#"{"www.example.com": ["hostmaster@example.com"]}"#).unwrap();
        assert_eq!(report.add_log(&content).unwrap(), 2);
        let rendered = report.render();
        assert!(rendered.contains("Report for hostmaster@example.com:"));
        assert!(rendered.contains("  Deleted: www.example.com. 300 IN A 192.0.2.1"));
        assert!(rendered.contains("  Added:   www.example.com. 300 IN A 192.0.2.2"));
    }

    #[tokio::test]
    async fn plain_log_is_read_as_is() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.jsonl");
        std::fs::write(&path, LOG).unwrap();

        assert_eq!(read_log(&path).await.unwrap(), LOG);
    }

    #[tokio::test]
    async fn corrupt_gzip_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changes.jsonl.gz");
        std::fs::write(&path, LOG).unwrap();

        assert!(read_log(&path).await.is_err());
    }
}
