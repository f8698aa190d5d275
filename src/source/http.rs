use crate::core::projection::TileAddress;
use crate::source::{Attribution, MapSource};
use crate::{Result, TileError};
use log::debug;
use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use std::ops::RangeInclusive;

/// Shared blocking HTTP client with a custom User-Agent so that public tile
/// servers (e.g. OpenStreetMap) don't reject the request. Building the client
/// once avoids the cost of TLS and connection pool setup for every tile.
pub(crate) static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("tilescroll/0.1 (+https://github.com/PoHsuanLai/tilescroll)")
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("failed to build reqwest blocking client")
});

/// Remote tile source addressed by a `{z}/{x}/{y}` URL template.
pub struct HttpMapSource {
    partition_key: String,
    url_template: String,
    subdomains: Vec<String>,
    zoom_range: RangeInclusive<u8>,
    tile_side: u32,
    attribution: Attribution,
}

impl HttpMapSource {
    /// Creates a source from a URL template containing `{z}`, `{x}` and
    /// `{y}` placeholders, and optionally `{s}` for subdomain rotation.
    pub fn new(
        partition_key: impl Into<String>,
        url_template: impl Into<String>,
        zoom_range: RangeInclusive<u8>,
        tile_side: u32,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            url_template: url_template.into(),
            subdomains: Vec::new(),
            zoom_range,
            tile_side,
            attribution: Attribution::default(),
        }
    }

    pub fn with_subdomains(mut self, subdomains: Vec<String>) -> Self {
        self.subdomains = subdomains;
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    /// The default OpenStreetMap tile server
    pub fn openstreetmap() -> Self {
        Self::new(
            "openstreetmap",
            "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png",
            0..=19,
            256,
        )
        .with_subdomains(vec!["a".into(), "b".into(), "c".into()])
        .with_attribution(Attribution {
            short_name: Some("OpenStreetMap".into()),
            short_attribution: Some("© OpenStreetMap contributors".into()),
            long_description: None,
            long_attribution: Some(
                "Map data © OpenStreetMap contributors, available under the Open Database License"
                    .into(),
            ),
        })
    }

    /// Build the URL for the requested tile
    pub fn url(&self, addr: TileAddress) -> String {
        let mut url = self
            .url_template
            .replace("{z}", &addr.zoom.to_string())
            .replace("{x}", &addr.x.to_string())
            .replace("{y}", &addr.y.to_string());

        if url.contains("{s}") {
            let sub = if self.subdomains.is_empty() {
                ""
            } else {
                let idx = ((addr.x + addr.y) as usize) % self.subdomains.len();
                self.subdomains[idx].as_str()
            };
            url = url.replace("{s}", sub);
        }
        url
    }
}

impl MapSource for HttpMapSource {
    fn fetch_tile_bytes(&self, addr: TileAddress) -> Result<Vec<u8>> {
        if !self.zoom_range.contains(&addr.zoom) {
            return Err(TileError::TileNotFound(addr));
        }

        let url = self.url(addr);
        debug!("fetching tile {:?} from {}", addr, url);

        let response = HTTP_CLIENT.get(&url).send()?;
        match response.status() {
            status if status.is_success() => Ok(response.bytes()?.to_vec()),
            reqwest::StatusCode::NOT_FOUND => Err(TileError::TileNotFound(addr)),
            status => Err(TileError::FetchFailed(format!(
                "HTTP {} for {:?}",
                status, addr
            ))),
        }
    }

    fn zoom_range(&self) -> RangeInclusive<u8> {
        self.zoom_range.clone()
    }

    fn tile_side_length(&self) -> u32 {
        self.tile_side
    }

    fn cache_partition_key(&self) -> &str {
        &self.partition_key
    }

    fn attribution(&self) -> Attribution {
        self.attribution.clone()
    }
}
