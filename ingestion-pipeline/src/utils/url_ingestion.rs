use std::{net::IpAddr, sync::OnceLock, time::Duration};

use common::error::AppError;
use regex::Regex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};
use url::Url;

const FETCH_TIMEOUT_SECS: u64 = 60;

/// Where to download a submitted paper link from, plus what the link itself
/// reveals about the paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperLink {
    pub original_url: String,
    pub download_url: String,
    pub arxiv_id: Option<String>,
    pub year: Option<i32>,
    pub filename: String,
}

fn arxiv_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"arxiv\.org/(?:abs|pdf)/(\d{2})(\d{2})\.(\d{4,5})(v\d+)?")
            .unwrap_or_else(|err| unreachable!("static arxiv pattern is valid: {err}"))
    })
}

/// Normalises a paper link. arXiv abstract pages map to their PDF and the
/// year comes from the `YYMM` prefix of the identifier; any other http(s)
/// URL is downloaded as-is.
pub fn parse_paper_url(raw: &str) -> Result<PaperLink, AppError> {
    let url = Url::parse(raw.trim())
        .map_err(|_| AppError::Validation(format!("Invalid paper URL: {raw}")))?;
    ensure_fetch_allowed(&url)?;

    if let Some(caps) = arxiv_pattern().captures(url.as_str()) {
        let yy: i32 = caps[1].parse().unwrap_or_default();
        let version = caps.get(4).map_or("", |m| m.as_str());
        let id = format!("{}{}.{}{version}", &caps[1], &caps[2], &caps[3]);
        return Ok(PaperLink {
            original_url: url.to_string(),
            download_url: format!("https://arxiv.org/pdf/{id}"),
            year: Some(2000 + yy),
            filename: format!("{id}.pdf"),
            arxiv_id: Some(id),
        });
    }

    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map_or_else(|| "paper.pdf".to_string(), str::to_string);

    Ok(PaperLink {
        original_url: url.to_string(),
        download_url: url.to_string(),
        arxiv_id: None,
        year: None,
        filename,
    })
}

/// Downloads the document behind `link`, retrying transient failures.
pub async fn fetch_paper(link: &PaperLink) -> Result<Vec<u8>, AppError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()?;

    let client = &client;
    let download_url = link.download_url.as_str();
    let retry_strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);
    let bytes = Retry::spawn(retry_strategy, || async move {
        let response = client
            .get(download_url)
            .send()
            .await?
            .error_for_status()?;
        response.bytes().await
    })
    .await
    .map_err(|err| {
        warn!(url = %link.download_url, error = %err, "paper download failed");
        AppError::from(err)
    })?;

    info!(url = %link.download_url, bytes = bytes.len(), "paper downloaded");
    Ok(bytes.to_vec())
}

fn ensure_fetch_allowed(url: &Url) -> Result<(), AppError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            warn!(%url, %scheme, "rejected paper URL with unsupported scheme");
            return Err(AppError::Validation(
                "Unsupported URL scheme for paper download".to_string(),
            ));
        }
    }

    let Some(host) = url.host_str() else {
        return Err(AppError::Validation("URL is missing a host component".to_string()));
    };

    if host.eq_ignore_ascii_case("localhost") {
        warn!(%url, host, "rejected paper URL pointing to localhost");
        return Err(AppError::Validation("Paper URL host is not allowed".to_string()));
    }

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        let restricted = match ip {
            IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
            IpAddr::V6(v6) => v6.is_unique_local() || v6.is_unicast_link_local(),
        };
        if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() || restricted {
            warn!(%url, host, "rejected paper URL pointing to a restricted network");
            return Err(AppError::Validation("Paper URL host is not allowed".to_string()));
        }
    }

    Ok(())
}
