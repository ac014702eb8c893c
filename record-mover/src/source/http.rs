use std::io;

use futures::TryStreamExt;
use reqwest::Client;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::debug;
use url::Url;

use crate::error::SourceError;

/// GET `url` and expose the response body as a byte stream. Anything but a 2xx is an
/// open failure.
pub async fn open(
    client: &Client,
    url: &Url,
    source_label: &str,
) -> Result<Box<dyn AsyncRead + Send + Unpin>, SourceError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| SourceError::open(source_label, e))?;

    debug!(
        %url,
        status = %response.status(),
        content_length = ?response.content_length(),
        "opened http source"
    );

    let body = response.bytes_stream().map_err(io::Error::other);
    Ok(Box::new(StreamReader::new(Box::pin(body))))
}
