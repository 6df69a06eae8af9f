use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::nekos::category::{Category, ImageFormat, ImageType};
use crate::nekos::error::{DownloadError, NekosError, NekosResult};
use crate::nekos::io::Config;
use crate::nekos::urls::ImageUrl;

/// The smallest `count` the listing endpoint accepts.
pub(crate) const MIN_IMAGE_COUNT: usize = 2;

/// Result of one call to the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Listing {
    /// The API answered with a list of image URLs, in API order.
    Urls(Vec<ImageUrl>),
    /// The API answered with a non-200 status, treated as zero results.
    Unavailable(u16),
}

/// Anything that can list categories and images for an endpoint.
pub(crate) trait ListingSource: Send + Sync {
    /// Valid category names for a type and format.
    fn categories(&self, kind: ImageType, format: ImageFormat) -> NekosResult<Vec<String>>;

    /// Up to `count` image URLs of a category.
    fn images(&self, category: &Category, count: usize) -> NekosResult<Listing>;
}

/// Opens a remote image for streaming.
pub(crate) trait ImageFetcher: Send + Sync {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, DownloadError>;
}

/// Checks whether a remote file exists without downloading it.
pub(crate) trait UrlProber: Send + Sync {
    fn exists(&self, url: &str) -> bool;
}

/// JSON shapes returned by the API.
pub(crate) mod entries {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub(crate) struct ApiEnvelope {
        pub(crate) data: ApiData,
    }

    #[derive(Deserialize, Debug)]
    pub(crate) struct ApiData {
        pub(crate) status: ApiStatus,
        #[serde(default)]
        pub(crate) response: ApiResponse,
    }

    #[derive(Deserialize, Debug)]
    pub(crate) struct ApiStatus {
        pub(crate) success: bool,
        #[serde(default)]
        pub(crate) message: Option<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    pub(crate) struct ApiResponse {
        #[serde(default)]
        pub(crate) urls: Vec<String>,
        #[serde(default)]
        pub(crate) categories: Vec<String>,
    }
}

use entries::ApiEnvelope;

/// Turns a decoded listing response into URLs, failing when the API rejected the category.
///
/// # Arguments
///
/// * `envelope`: The decoded body of a 200 response.
/// * `category`: The category that was requested, used for the error message.
/// * `count`: How many URLs the caller asked for; extra URLs are dropped.
pub(crate) fn listing_from_envelope(
    envelope: ApiEnvelope,
    category: &Category,
    count: usize,
) -> NekosResult<Listing> {
    let data = envelope.data;
    if !data.status.success {
        let reason = data
            .status
            .message
            .unwrap_or_else(|| "You must supply a proper category, check endpoints.".to_string());
        return Err(NekosError::IllegalCategory(format!("{category}: {reason}")));
    }

    let urls = data
        .response
        .urls
        .into_iter()
        .take(count)
        .map(ImageUrl::new)
        .collect();
    Ok(Listing::Urls(urls))
}

/// Blocking HTTP access to the image API.
#[derive(Clone)]
pub(crate) struct RequestSender {
    client: Client,
    base_url: Arc<str>,
}

impl RequestSender {
    /// Builds the HTTP client from the configured user agent and timeout.
    pub(crate) fn new(config: &Config) -> NekosResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(Duration::from_secs(config.request_timeout_secs()))
            .gzip(true)
            .build()?;

        let mut base_url = config.base_url().trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        trace!("Request sender targets {}", base_url);

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
        })
    }

    /// URL that lists the categories of a type and format.
    pub(crate) fn endpoint_url(&self, kind: ImageType, format: ImageFormat) -> String {
        format!("{}images/{}/{}/", self.base_url, kind, format)
    }

    /// URL that lists `count` images of a category.
    pub(crate) fn listing_url(&self, category: &Category, count: usize) -> String {
        format!(
            "{}images/{}/{}/{}/?count={}",
            self.base_url,
            category.kind(),
            category.format(),
            category.name(),
            count
        )
    }
}

impl ListingSource for RequestSender {
    fn categories(&self, kind: ImageType, format: ImageFormat) -> NekosResult<Vec<String>> {
        // The endpoint answers a bare type/format path with an error that lists valid categories,
        // so the status is not checked here.
        let url = self.endpoint_url(kind, format);
        let envelope: ApiEnvelope = self.client.get(&url).send()?.json()?;
        Ok(envelope.data.response.categories)
    }

    fn images(&self, category: &Category, count: usize) -> NekosResult<Listing> {
        let url = self.listing_url(category, count.max(MIN_IMAGE_COUNT));
        debug!("GET {}", url);

        let response = self.client.get(&url).send()?;
        if response.status() != StatusCode::OK {
            warn!("Listing {} answered with {}", category, response.status());
            return Ok(Listing::Unavailable(response.status().as_u16()));
        }

        listing_from_envelope(response.json()?, category, count)
    }
}

impl ImageFetcher for RequestSender {
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, DownloadError> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        Ok(Box::new(response))
    }
}

impl UrlProber for RequestSender {
    fn exists(&self, url: &str) -> bool {
        match self.client.head(url).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("Probe of {} failed: {}", url, err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat() -> Category {
        Category::new(ImageType::Safe, ImageFormat::Still, "cat")
    }

    #[test]
    fn test_listing_urls_are_truncated() {
        let body = r#"{"data":{"status":{"success":true,"code":200},
            "response":{"urls":["https://cdn.example/a_1.png","https://cdn.example/a_2.png","https://cdn.example/a_3.png"]}}}"#;
        let envelope: ApiEnvelope = serde_json::from_str(body).unwrap();

        let listing = listing_from_envelope(envelope, &cat(), 2).unwrap();
        match listing {
            Listing::Urls(urls) => {
                assert_eq!(urls.len(), 2);
                assert_eq!(urls[1].filename(), "a_2.png");
            }
            other => panic!("unexpected listing {:?}", other),
        }
    }

    #[test]
    fn test_unsuccessful_listing_is_illegal_category() {
        let body = r#"{"data":{"status":{"success":false,"message":"bad category"},"response":{}}}"#;
        let envelope: ApiEnvelope = serde_json::from_str(body).unwrap();

        let err = listing_from_envelope(envelope, &cat(), 20).unwrap_err();
        assert!(matches!(err, NekosError::IllegalCategory(ref msg) if msg.contains("bad category")));
    }

    #[test]
    fn test_categories_decode_without_urls() {
        let body = r#"{"data":{"status":{"success":false},"response":{"categories":["neko","cat"]}}}"#;
        let envelope: ApiEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.data.response.categories, vec!["neko", "cat"]);
        assert!(envelope.data.response.urls.is_empty());
    }

    #[test]
    fn test_request_urls() {
        let sender = RequestSender::new(&Config::default()).unwrap();
        assert_eq!(
            sender.listing_url(&cat(), 20),
            "https://api.nekos.dev/api/v3/images/sfw/img/cat/?count=20"
        );
        assert_eq!(
            sender.endpoint_url(ImageType::Explicit, ImageFormat::Animated),
            "https://api.nekos.dev/api/v3/images/nsfw/gif/"
        );
    }
}
