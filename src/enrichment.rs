//! External-intelligence enrichment: geolocation, IP reputation, and local
//! user-agent parsing.
//!
//! Enrichment is strictly best-effort. Every lookup failure is swallowed and
//! the corresponding field is simply omitted; the pipeline never depends on
//! an upstream API being reachable.

use crate::config::Settings;
use crate::models::{GeoInfo, LogEvent, Severity, ThreatIntel, UaDetails};
use lru::LruCache;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const GEO_CACHE_CAPACITY: usize = 1000;
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
const ABUSE_MAX_AGE_DAYS: u32 = 90;
const ABUSE_ALERT_THRESHOLD: u32 = 80;

#[derive(Debug, Deserialize)]
struct IpinfoResponse {
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    loc: Option<String>,
    #[serde(default)]
    org: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AbuseIpdbResponse {
    data: AbuseIpdbData,
}

#[derive(Debug, Deserialize)]
struct AbuseIpdbData {
    #[serde(rename = "abuseConfidenceScore", default)]
    abuse_confidence_score: u32,
    #[serde(rename = "isTor", default)]
    is_tor: bool,
    #[serde(rename = "usageType", default)]
    usage_type: Option<String>,
}

pub struct Enricher {
    client: Client,
    ipinfo_base_url: String,
    ipinfo_token: String,
    abuseipdb_base_url: String,
    abuseipdb_api_key: String,
    geo_cache: Mutex<LruCache<String, GeoInfo>>,
}

impl Enricher {
    pub fn new(settings: &Settings) -> Self {
        Enricher {
            client: Client::builder()
                .timeout(LOOKUP_TIMEOUT)
                .build()
                .unwrap_or_default(),
            ipinfo_base_url: settings.ipinfo_base_url.trim_end_matches('/').to_string(),
            ipinfo_token: settings.ipinfo_token.clone(),
            abuseipdb_base_url: settings
                .abuseipdb_base_url
                .trim_end_matches('/')
                .to_string(),
            abuseipdb_api_key: settings.abuseipdb_api_key.clone(),
            geo_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(GEO_CACHE_CAPACITY).expect("nonzero cache capacity"),
            )),
        }
    }

    /// Enrich an event in place.
    pub async fn enrich(&self, event: &mut LogEvent) {
        if let Some(ip) = event.effective_ip() {
            if let Some(geo) = self.lookup_geo(&ip).await {
                event.geo = Some(geo);
            }
            if let Some(intel) = self.lookup_reputation(&ip).await {
                if intel.abuse_score > ABUSE_ALERT_THRESHOLD {
                    event.alerts.push(format!(
                        "High-Risk IP Detected (AbuseIPDB Score: {})",
                        intel.abuse_score
                    ));
                    event.escalate(Severity::High);
                }
                event.threat_intel = Some(intel);
            }
        }

        if let Some(ua) = event.effective_user_agent() {
            if let Some(details) = parse_user_agent(&ua) {
                event.ua_details = Some(details);
            }
        }
    }

    async fn lookup_geo(&self, ip: &str) -> Option<GeoInfo> {
        {
            let mut cache = self.geo_cache.lock().await;
            if let Some(geo) = cache.get(ip) {
                return Some(geo.clone());
            }
        }

        let url = format!(
            "{}/{}/json?token={}",
            self.ipinfo_base_url, ip, self.ipinfo_token
        );
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Geo lookup for {} returned {}", ip, response.status());
                return None;
            }
            Err(e) => {
                debug!("Geo lookup for {} failed: {}", ip, e);
                return None;
            }
        };

        let parsed: IpinfoResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Geo response for {} unreadable: {}", ip, e);
                return None;
            }
        };

        let (lat, lon) = parsed
            .loc
            .as_deref()
            .and_then(parse_loc)
            .unwrap_or((0.0, 0.0));
        let geo = GeoInfo {
            country: parsed.country.unwrap_or_else(|| "Unknown".to_string()),
            city: parsed.city.unwrap_or_else(|| "Unknown".to_string()),
            lat,
            lon,
            isp: parsed.org,
        };

        let mut cache = self.geo_cache.lock().await;
        cache.put(ip.to_string(), geo.clone());
        Some(geo)
    }

    async fn lookup_reputation(&self, ip: &str) -> Option<ThreatIntel> {
        let url = format!("{}/api/v2/check", self.abuseipdb_base_url);
        let max_age = ABUSE_MAX_AGE_DAYS.to_string();
        let response = match self
            .client
            .get(&url)
            .query(&[("ipAddress", ip), ("maxAgeInDays", max_age.as_str())])
            .header("Key", &self.abuseipdb_api_key)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("Reputation lookup for {} returned {}", ip, response.status());
                return None;
            }
            Err(e) => {
                debug!("Reputation lookup for {} failed: {}", ip, e);
                return None;
            }
        };

        let parsed: AbuseIpdbResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Reputation response for {} unreadable: {}", ip, e);
                return None;
            }
        };

        Some(ThreatIntel {
            abuse_score: parsed.data.abuse_confidence_score,
            is_tor: parsed.data.is_tor,
            usage_type: parsed.data.usage_type,
        })
    }
}

fn parse_loc(loc: &str) -> Option<(f64, f64)> {
    let (lat, lon) = loc.split_once(',')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Classify a user-agent string into browser, OS, and device family.
pub fn parse_user_agent(ua: &str) -> Option<UaDetails> {
    if ua.is_empty() || ua == "-" {
        return None;
    }
    let lower = ua.to_lowercase();

    let browser = if lower.contains("curl") {
        "curl"
    } else if lower.contains("python-requests") {
        "python-requests"
    } else if lower.contains("wget") {
        "wget"
    } else if lower.contains("edg/") || lower.contains("edge/") {
        "Edge"
    } else if lower.contains("firefox/") {
        "Firefox"
    } else if lower.contains("chrome/") {
        "Chrome"
    } else if lower.contains("safari/") {
        "Safari"
    } else if lower.contains("bot") || lower.contains("spider") || lower.contains("crawler") {
        "Bot"
    } else {
        "Other"
    };

    let os = if lower.contains("windows") {
        "Windows"
    } else if lower.contains("android") {
        "Android"
    } else if lower.contains("iphone") || lower.contains("ipad") || lower.contains("ios") {
        "iOS"
    } else if lower.contains("mac os") || lower.contains("macintosh") {
        "macOS"
    } else if lower.contains("linux") {
        "Linux"
    } else {
        "Other"
    };

    let device = if browser == "Bot" {
        "Bot"
    } else if lower.contains("mobile") || lower.contains("iphone") || lower.contains("android") {
        "Mobile"
    } else if lower.contains("ipad") || lower.contains("tablet") {
        "Tablet"
    } else if browser == "curl" || browser == "python-requests" || browser == "wget" {
        "Script"
    } else {
        "Desktop"
    };

    Some(UaDetails {
        browser: browser.to_string(),
        os: os.to_string(),
        device: device.to_string(),
    })
}
