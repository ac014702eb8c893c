use std::{fmt, path::PathBuf, str::FromStr};

use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use crate::{emit::SinkConfig, error::RouteError, source::SourceConfig};

/// Shortest locator worth handing to the URL parser, `null://` being the shortest we accept.
pub const MIN_LOCATOR_LENGTH: usize = 7;

/// How the bytes of a file-like source or sink are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Jsonl,
    Gzip,
}

impl FromStr for FileFormat {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JSONL" => Ok(FileFormat::Jsonl),
            "GZ" => Ok(FileFormat::Gzip),
            _ => Err(RouteError::UnknownFormatOverride(s.to_string())),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Jsonl => write!(f, "JSONL"),
            FileFormat::Gzip => write!(f, "GZ"),
        }
    }
}

/// Pick the reader for an input locator. No locator means standard input.
pub fn select_source(
    locator: Option<&str>,
    format_override: Option<FileFormat>,
) -> Result<SourceConfig, RouteError> {
    let Some(locator) = locator.map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(SourceConfig::Stdin {
            format: format_override.unwrap_or(FileFormat::Jsonl),
        });
    };

    let url = parse_locator(locator)?;
    let config = match url.scheme() {
        "file" => {
            let path = file_path(&url, locator)?;
            let name = path.to_string_lossy();
            let format = resolve_format(format_override, &[name.as_ref()], locator)?;
            SourceConfig::File { path, format }
        }
        "http" | "https" => {
            if url.path().trim_start_matches('/').is_empty() {
                return Err(RouteError::InvalidLocator {
                    locator: locator.to_string(),
                    reason: "missing resource path".to_string(),
                });
            }
            let format = resolve_format(
                format_override,
                &[url.path(), url.query().unwrap_or_default()],
                locator,
            )?;
            SourceConfig::Http { url, format }
        }
        other => {
            return Err(RouteError::UnsupportedScheme {
                scheme: other.to_string(),
                locator: locator.to_string(),
            })
        }
    };

    debug!(locator, ?config, "selected source");
    Ok(config)
}

/// Pick the writer for an output locator. No locator means standard output.
pub fn select_sink(
    locator: Option<&str>,
    format_override: Option<FileFormat>,
) -> Result<SinkConfig, RouteError> {
    let Some(locator) = locator.map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(SinkConfig::Stdout);
    };

    let url = parse_locator(locator)?;
    let config = match url.scheme() {
        "null" => SinkConfig::Null,
        "file" => {
            let path = file_path(&url, locator)?;
            let name = path.to_string_lossy();
            let format = resolve_format(format_override, &[name.as_ref()], locator)?;
            SinkConfig::File { path, format }
        }
        "amqp" | "amqps" | "sqs" | "https" | "kafka" => SinkConfig::Queue { target: url },
        other => {
            return Err(RouteError::UnsupportedScheme {
                scheme: other.to_string(),
                locator: locator.to_string(),
            })
        }
    };

    debug!(locator, ?config, "selected sink");
    Ok(config)
}

fn parse_locator(locator: &str) -> Result<Url, RouteError> {
    if locator.len() < MIN_LOCATOR_LENGTH {
        return Err(RouteError::InvalidLocator {
            locator: locator.to_string(),
            reason: format!("shorter than {MIN_LOCATOR_LENGTH} characters"),
        });
    }

    Url::parse(locator).map_err(|e| RouteError::InvalidLocator {
        locator: locator.to_string(),
        reason: e.to_string(),
    })
}

// `file:///abs/path` is absolute, `file://relative/path` is relative to the working directory.
fn file_path(url: &Url, locator: &str) -> Result<PathBuf, RouteError> {
    let path = match url.host_str() {
        None | Some("") | Some("localhost") => {
            url.to_file_path().map_err(|_| RouteError::InvalidLocator {
                locator: locator.to_string(),
                reason: "not a valid file path".to_string(),
            })?
        }
        Some(host) => {
            let relative = format!("{}{}", original_host(locator, host), url.path());
            let decoded = percent_decode_str(&relative).decode_utf8().map_err(|_| {
                RouteError::InvalidLocator {
                    locator: locator.to_string(),
                    reason: "path is not valid UTF-8".to_string(),
                }
            })?;
            PathBuf::from(decoded.as_ref())
        }
    };

    if path.parent().is_none() {
        return Err(RouteError::InvalidLocator {
            locator: locator.to_string(),
            reason: "missing file path".to_string(),
        });
    }

    Ok(path)
}

// The parsed host is lowercased, but it is the first directory of a relative path.
fn original_host<'a>(locator: &'a str, host: &'a str) -> &'a str {
    locator
        .split_once("://")
        .map(|(_, rest)| rest.split(['/', '?', '#']).next().unwrap_or(rest))
        .filter(|raw| raw.eq_ignore_ascii_case(host))
        .unwrap_or(host)
}

fn resolve_format(
    format_override: Option<FileFormat>,
    candidates: &[&str],
    locator: &str,
) -> Result<FileFormat, RouteError> {
    if let Some(format) = format_override {
        return Ok(format);
    }

    for candidate in candidates {
        let candidate = candidate.to_ascii_lowercase();
        if candidate.ends_with(".jsonl") {
            return Ok(FileFormat::Jsonl);
        }
        if candidate.ends_with(".gz") {
            return Ok(FileFormat::Gzip);
        }
    }

    Err(RouteError::UnsupportedFormat {
        locator: locator.to_string(),
    })
}
