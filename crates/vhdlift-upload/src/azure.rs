use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use serde::Deserialize;
use url::Url;

use crate::{BlobProperties, PageRangeChunk, PageStore, PageStoreError};
use vhdlift_storage::ByteRange;

const API_VERSION: &str = "2021-12-02";
const META_HEADER_PREFIX: &str = "x-ms-meta-";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Azure Blob REST client scoped to one (container, page blob) pair.
///
/// Authorization is a pre-acquired SAS token appended to every request's
/// query string; acquiring credentials is the caller's problem. The
/// endpoint is overridable for emulators and sovereign clouds.
pub struct AzurePageStore {
    client: reqwest::Client,
    container_url: Url,
    blob_url: Url,
    sas: Vec<(String, String)>,
}

impl AzurePageStore {
    pub fn new(
        endpoint: Url,
        container: &str,
        blob: &str,
        sas_token: Option<&str>,
    ) -> Result<Self, PageStoreError> {
        if !endpoint.has_host() {
            return Err(PageStoreError::InvalidConfig(
                "endpoint must be an absolute URL".to_string(),
            ));
        }

        let mut container_url = endpoint.clone();
        container_url
            .path_segments_mut()
            .map_err(|_| PageStoreError::InvalidConfig("endpoint cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(container);

        let mut blob_url = container_url.clone();
        blob_url
            .path_segments_mut()
            .map_err(|_| PageStoreError::InvalidConfig("endpoint cannot be a base URL".to_string()))?
            .push(blob);

        Ok(Self {
            client: reqwest::Client::new(),
            container_url,
            blob_url,
            sas: sas_token.map(parse_sas_token).unwrap_or_default(),
        })
    }

    /// Build the store for a public-cloud storage account.
    pub fn for_account(
        account: &str,
        container: &str,
        blob: &str,
        sas_token: Option<&str>,
    ) -> Result<Self, PageStoreError> {
        let endpoint = Url::parse(&format!("https://{account}.blob.core.windows.net"))
            .map_err(|e| PageStoreError::InvalidConfig(format!("account name: {e}")))?;
        Self::new(endpoint, container, blob, sas_token)
    }

    /// Blob URL with the query stripped, safe for logs.
    pub fn redacted_blob_url(&self) -> Url {
        redact_url(&self.blob_url)
    }

    fn request_url(&self, base: &Url, params: &[(&str, &str)]) -> Url {
        let mut url = base.clone();
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &self.sas {
                query.append_pair(key, value);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }
}

/// SAS tokens are passed around both with and without the leading `?`.
fn parse_sas_token(token: &str) -> Vec<(String, String)> {
    let token = token.trim_start_matches('?');
    url::form_urlencoded::parse(token.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn redact_url(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url
}

/// Transport errors may embed the full request URL, SAS signature
/// included; redact before the message can reach logs.
fn transport_error(err: reqwest::Error) -> PageStoreError {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        msg = msg.replace(url.as_str(), redact_url(url).as_str());
    }
    PageStoreError::Http(msg)
}

fn error_code(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn require_success(resp: reqwest::Response) -> Result<reqwest::Response, PageStoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(PageStoreError::HttpStatus {
        status: status.as_u16(),
        code: error_code(resp.headers()),
    })
}

#[derive(Debug, Deserialize)]
struct PageListXml {
    #[serde(rename = "PageRange", default)]
    page_ranges: Vec<PageRangeXml>,
    #[serde(rename = "NextMarker")]
    next_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageRangeXml {
    #[serde(rename = "Start")]
    start: u64,
    #[serde(rename = "End")]
    end: u64,
}

/// Parse a `GET ?comp=pagelist` body. The store speaks inclusive
/// `[start, end]` offsets; everything downstream is half-open.
fn parse_page_list(xml: &str) -> Result<PageRangeChunk, PageStoreError> {
    let parsed: PageListXml = quick_xml::de::from_str(xml)
        .map_err(|e| PageStoreError::Protocol(format!("pagelist body: {e}")))?;

    let mut ranges = Vec::with_capacity(parsed.page_ranges.len());
    for pr in parsed.page_ranges {
        if pr.end < pr.start {
            return Err(PageStoreError::Protocol(format!(
                "pagelist range reversed: {}-{}",
                pr.start, pr.end
            )));
        }
        ranges.push(ByteRange::new(pr.start, pr.end + 1));
    }

    Ok(PageRangeChunk {
        ranges,
        next_marker: parsed.next_marker.filter(|m| !m.is_empty()),
    })
}

#[async_trait]
impl PageStore for AzurePageStore {
    async fn create_container(&self) -> Result<(), PageStoreError> {
        let url = self.request_url(&self.container_url, &[("restype", "container")]);
        let resp = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status() == reqwest::StatusCode::CONFLICT {
            let code = error_code(resp.headers());
            if matches!(
                code.as_deref(),
                Some("ContainerAlreadyExists") | Some("ResourceAlreadyExists")
            ) {
                return Ok(());
            }
            return Err(PageStoreError::HttpStatus { status: 409, code });
        }

        require_success(resp).map(drop)
    }

    async fn create_page_blob(
        &self,
        size: u64,
        metadata: &BTreeMap<String, String>,
    ) -> Result<(), PageStoreError> {
        let url = self.request_url(&self.blob_url, &[]);
        let mut req = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-type", "PageBlob")
            .header("x-ms-blob-content-length", size.to_string())
            .header(CONTENT_LENGTH, 0);
        for (key, value) in metadata {
            req = req.header(format!("{META_HEADER_PREFIX}{key}"), value.as_str());
        }

        let resp = req.send().await.map_err(transport_error)?;
        require_success(resp).map(drop)
    }

    async fn get_blob_properties(&self) -> Result<Option<BlobProperties>, PageStoreError> {
        let url = self.request_url(&self.blob_url, &[]);
        let resp = self
            .client
            .head(url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(transport_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = require_success(resp)?;
        let headers = resp.headers();

        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        let content_md5 = headers
            .get("Content-MD5")
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                general_purpose::STANDARD
                    .decode(v)
                    .map_err(|_| PageStoreError::Protocol("Content-MD5 is not base64".to_string()))
            })
            .transpose()?;

        let mut metadata = BTreeMap::new();
        for (name, value) in headers {
            if let Some(key) = name.as_str().strip_prefix(META_HEADER_PREFIX) {
                if let Ok(value) = value.to_str() {
                    metadata.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Some(BlobProperties {
            content_length,
            content_md5,
            metadata,
        }))
    }

    async fn set_content_md5(&self, md5: &[u8; 16]) -> Result<(), PageStoreError> {
        let url = self.request_url(&self.blob_url, &[("comp", "properties")]);
        let resp = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-blob-content-md5", general_purpose::STANDARD.encode(md5))
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(transport_error)?;
        require_success(resp).map(drop)
    }

    async fn write_pages(&self, offset: u64, data: &[u8]) -> Result<(), PageStoreError> {
        if data.is_empty() {
            return Ok(());
        }
        let url = self.request_url(&self.blob_url, &[("comp", "page")]);
        let end_inclusive = offset + data.len() as u64 - 1;
        let resp = self
            .client
            .put(url)
            .header("x-ms-version", API_VERSION)
            .header("x-ms-page-write", "update")
            .header("x-ms-range", format!("bytes={offset}-{end_inclusive}"))
            .header(CONTENT_LENGTH, data.len())
            .body(data.to_vec())
            .send()
            .await
            .map_err(transport_error)?;
        require_success(resp).map(drop)
    }

    async fn list_page_ranges(
        &self,
        marker: Option<&str>,
    ) -> Result<PageRangeChunk, PageStoreError> {
        let mut params = vec![("comp", "pagelist")];
        if let Some(marker) = marker {
            params.push(("marker", marker));
        }
        let url = self.request_url(&self.blob_url, &params);
        let resp = self
            .client
            .get(url)
            .header("x-ms-version", API_VERSION)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = require_success(resp)?;
        let body = resp.text().await.map_err(transport_error)?;
        parse_page_list(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_list_converts_inclusive_ranges() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<PageList>
  <PageRange><Start>0</Start><End>511</End></PageRange>
  <PageRange><Start>1048576</Start><End>1049087</End></PageRange>
</PageList>"#;

        let chunk = parse_page_list(xml).unwrap();
        assert_eq!(
            chunk.ranges,
            vec![ByteRange::new(0, 512), ByteRange::new(1_048_576, 1_049_088)]
        );
        assert!(chunk.next_marker.is_none());
    }

    #[test]
    fn parse_page_list_carries_next_marker() {
        let xml = "<PageList><PageRange><Start>0</Start><End>511</End></PageRange>\
                   <NextMarker>abc123</NextMarker></PageList>";
        let chunk = parse_page_list(xml).unwrap();
        assert_eq!(chunk.next_marker.as_deref(), Some("abc123"));
    }

    #[test]
    fn parse_page_list_treats_blank_marker_as_done() {
        let xml = "<PageList><NextMarker /></PageList>";
        let chunk = parse_page_list(xml).unwrap();
        assert!(chunk.ranges.is_empty());
        assert!(chunk.next_marker.is_none());
    }

    #[test]
    fn parse_page_list_rejects_reversed_ranges() {
        let xml = "<PageList><PageRange><Start>512</Start><End>0</End></PageRange></PageList>";
        assert!(matches!(
            parse_page_list(xml),
            Err(PageStoreError::Protocol(_))
        ));
    }

    #[test]
    fn request_urls_carry_sas_and_operation_params() {
        let store = AzurePageStore::for_account(
            "acct",
            "vhds",
            "disk.vhd",
            Some("?sv=2021-12-02&sig=secret"),
        )
        .unwrap();

        let url = store.request_url(&store.blob_url, &[("comp", "page")]);
        assert_eq!(url.host_str(), Some("acct.blob.core.windows.net"));
        assert_eq!(url.path(), "/vhds/disk.vhd");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("sv".into(), "2021-12-02".into())));
        assert!(pairs.contains(&("sig".into(), "secret".into())));
        assert!(pairs.contains(&("comp".into(), "page".into())));
    }

    #[test]
    fn redacted_blob_url_drops_query() {
        let store =
            AzurePageStore::for_account("acct", "vhds", "disk.vhd", Some("sig=secret")).unwrap();
        assert_eq!(
            store.redacted_blob_url().as_str(),
            "https://acct.blob.core.windows.net/vhds/disk.vhd"
        );
    }

    #[test]
    fn custom_endpoint_paths_are_preserved() {
        let endpoint = Url::parse("http://127.0.0.1:10000/devstoreaccount1").unwrap();
        let store = AzurePageStore::new(endpoint, "vhds", "disk.vhd", None).unwrap();
        assert_eq!(
            store.redacted_blob_url().path(),
            "/devstoreaccount1/vhds/disk.vhd"
        );
    }
}
