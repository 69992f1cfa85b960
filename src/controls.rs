//! Collector targets, throttling and the command-line surface that builds them.

use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default listings site queried for sold results.
pub const DEFAULT_BASE_URL: &str = "https://www.realestate.com.au";

/// A suburb to collect, written on the command line as `name:state:postcode`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suburb {
    /// Display name, e.g. `Essendon`.
    pub name: String,
    /// State abbreviation, e.g. `vic`.
    pub state: String,
    /// Postcode, e.g. `3040`.
    pub postcode: String,
}

impl Suburb {
    /// URL slug used by sold-search pages: `in-essendon,+vic+3040`.
    pub fn slug(&self) -> String {
        format!(
            "in-{},+{}+{}",
            self.name.trim().to_ascii_lowercase().replace(' ', "+"),
            self.state.trim().to_ascii_lowercase(),
            self.postcode.trim()
        )
    }

    /// Sold-search result page `page` (1-based) for this suburb.
    pub fn search_url(&self, base_url: &str, page: usize) -> String {
        format!(
            "{}/sold/{}/list-{}",
            base_url.trim_end_matches('/'),
            self.slug(),
            page
        )
    }
}

impl FromStr for Suburb {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(':').map(str::trim).collect();
        match parts.as_slice() {
            [name, state, postcode] if !name.is_empty() && !state.is_empty() => {
                if postcode.is_empty() || !postcode.chars().all(|c| c.is_ascii_digit()) {
                    return Err(format!("invalid postcode in suburb spec {value:?}"));
                }
                Ok(Self {
                    name: name.to_string(),
                    state: state.to_string(),
                    postcode: postcode.to_string(),
                })
            }
            _ => Err(format!(
                "suburb must look like name:state:postcode, got {value:?}"
            )),
        }
    }
}

impl fmt::Display for Suburb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.state, self.postcode)
    }
}

/// Tunable knobs that bound a collection run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectControls {
    suburbs: Vec<Suburb>,
    pages_per_suburb: usize,
    politeness_delay: Duration,
    page_timeout: Duration,
    follow_details: bool,
    base_url: String,
}

impl CollectControls {
    /// Constructs a new set of collection controls.
    pub fn new(
        suburbs: Vec<Suburb>,
        pages_per_suburb: usize,
        politeness_delay: Duration,
        page_timeout: Duration,
        follow_details: bool,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            suburbs,
            pages_per_suburb: pages_per_suburb.max(1),
            politeness_delay,
            page_timeout,
            follow_details,
            base_url: base_url.into(),
        }
    }

    /// Suburbs to visit, in order.
    pub fn suburbs(&self) -> &[Suburb] {
        &self.suburbs
    }

    /// Result pages requested per suburb.
    pub fn pages_per_suburb(&self) -> usize {
        self.pages_per_suburb
    }

    /// Time to wait between successive requests.
    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Upper bound on a single page load.
    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }

    /// Whether each card is followed to its detail page.
    pub fn follow_details(&self) -> bool {
        self.follow_details
    }

    /// Site root that search URLs are built from.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for CollectControls {
    fn default() -> Self {
        Self {
            suburbs: Vec::new(),
            pages_per_suburb: 6,
            politeness_delay: Duration::from_millis(1500),
            page_timeout: Duration::from_secs(20),
            follow_details: true,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Command-line interface for the `collector` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "collector",
    about = "Collect sold listings for a set of suburbs into a CSV"
)]
pub struct Cli {
    /// Suburbs as name:state:postcode, comma separated or repeated
    #[arg(
        long = "suburb",
        env = "HOMEPRICE_SUBURBS",
        value_delimiter = ',',
        default_value = "Essendon:vic:3040,Bentleigh:vic:3204,Burwood:vic:3125"
    )]
    pub suburbs: Vec<Suburb>,

    /// Output CSV path
    #[arg(long, env = "HOMEPRICE_LISTINGS_CSV", default_value = "data/listings.csv")]
    pub out: PathBuf,

    /// Sold-search result pages visited per suburb
    #[arg(long, env = "HOMEPRICE_PAGES_PER_SUBURB", default_value_t = 6)]
    pub pages_per_suburb: usize,

    /// Milliseconds to wait between requests
    #[arg(long, env = "HOMEPRICE_POLITENESS_MS", default_value_t = 1500)]
    pub politeness_ms: u64,

    /// Seconds before a single page load is abandoned
    #[arg(long, env = "HOMEPRICE_PAGE_TIMEOUT_SECS", default_value_t = 20)]
    pub page_timeout_secs: u64,

    /// Site root used to build search URLs
    #[arg(long, env = "HOMEPRICE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Keep card-level fields only instead of opening every detail page
    #[arg(long, default_value_t = false)]
    pub skip_details: bool,

    /// Import saved search-API JSON payloads from this directory instead of fetching
    #[arg(long, env = "HOMEPRICE_PAYLOAD_DIR")]
    pub from_json: Option<PathBuf>,
}

impl Cli {
    /// Converts the parsed CLI into `CollectControls`.
    pub fn build_controls(&self) -> CollectControls {
        CollectControls::new(
            self.suburbs.clone(),
            self.pages_per_suburb,
            Duration::from_millis(self.politeness_ms),
            Duration::from_secs(self.page_timeout_secs.max(1)),
            !self.skip_details,
            self.base_url.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suburb_spec() {
        let suburb: Suburb = "Moonee Ponds:VIC:3039".parse().unwrap();
        assert_eq!(suburb.slug(), "in-moonee+ponds,+vic+3039");
        assert_eq!(
            suburb.search_url("https://example.com/", 2),
            "https://example.com/sold/in-moonee+ponds,+vic+3039/list-2"
        );
        assert!("Essendon:vic".parse::<Suburb>().is_err());
        assert!("Essendon:vic:30a0".parse::<Suburb>().is_err());
    }

    #[test]
    fn cli_builds_controls() {
        let cli = Cli::parse_from([
            "collector",
            "--suburb",
            "Essendon:vic:3040",
            "--pages-per-suburb",
            "2",
            "--skip-details",
        ]);
        let controls = cli.build_controls();
        assert_eq!(controls.suburbs().len(), 1);
        assert_eq!(controls.pages_per_suburb(), 2);
        assert!(!controls.follow_details());
        assert_eq!(controls.base_url(), DEFAULT_BASE_URL);
    }
}
