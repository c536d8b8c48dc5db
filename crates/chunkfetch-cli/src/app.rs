use std::path::PathBuf;

use chunkfetch::HashAlgorithm;
use clap::Parser;

#[derive(Clone, Debug, Parser)]
#[command(name = "chunkfetch", version = env!("CARGO_PKG_VERSION"), about = "Download a file over HTTP in parallel chunks", long_about = None)]
pub struct App {
    /// URL of the file to download.
    pub url: String,

    /// Directory to place the file in.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// File name; defaults to the last URL path segment.
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Concurrent chunk fetches.
    #[arg(short, long)]
    pub parallelism: Option<usize>,

    /// Whole-download attempts (0 = a single attempt).
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Expected digest, hex encoded.
    #[arg(long)]
    pub checksum: Option<String>,

    /// Digest algorithm of --checksum.
    #[arg(long, default_value = "sha256")]
    pub algorithm: HashAlgorithm,

    /// TOML settings file; flags override its values.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra request header, `Key: Value`. Repeatable.
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Authorization header value.
    #[arg(long)]
    pub auth: Option<String>,

    /// Host header override.
    #[arg(long)]
    pub host: Option<String>,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

impl App {
    /// `--name`, else the last non-empty URL path segment, else `download`.
    pub fn file_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        let path = path.split_once("://").map_or(path, |(_, rest)| rest);
        path.split('/')
            .skip(1)
            .filter(|s| !s.is_empty())
            .last()
            .map_or_else(|| "download".to_string(), str::to_string)
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Key: Value`, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty header name in `{raw}`"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}
