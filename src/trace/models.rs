//! Trace model types: the raw `nexttrace -j` document and the aggregated hops.

use serde::{Deserialize, Deserializer};

/// Placeholder the tool prints for a hop that never answered.
pub const UNRESOLVED_HOP: &str = "*";

/// Treat an explicit JSON `null` the same as a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level document emitted by `nexttrace -j`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTrace {
    /// One group per TTL, each holding every probe fired at that TTL.
    #[serde(rename = "Hops", deserialize_with = "nullable")]
    pub hops: Vec<Vec<ProbeRecord>>,
    #[serde(rename = "TraceMapUrl", deserialize_with = "nullable")]
    pub trace_map_url: String,
}

/// A single probe attempt at one TTL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeRecord {
    #[serde(rename = "Success", deserialize_with = "nullable")]
    pub success: bool,
    #[serde(rename = "Address")]
    pub address: Option<RawAddress>,
    #[serde(rename = "Hostname", deserialize_with = "nullable")]
    pub hostname: String,
    #[serde(rename = "TTL", deserialize_with = "nullable")]
    pub ttl: i64,
    /// Round-trip time in nanoseconds.
    #[serde(rename = "RTT", deserialize_with = "nullable")]
    pub rtt: i64,
    #[serde(rename = "Geo")]
    pub geo: Option<GeoInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAddress {
    #[serde(rename = "IP", deserialize_with = "nullable")]
    pub ip: String,
    #[serde(rename = "Zone", deserialize_with = "nullable")]
    pub zone: String,
}

/// Geo/ASN enrichment attached by the tool to a responding address.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeoInfo {
    #[serde(deserialize_with = "nullable")]
    pub asnumber: String,
    #[serde(deserialize_with = "nullable")]
    pub country: String,
    #[serde(deserialize_with = "nullable")]
    pub country_en: String,
    #[serde(deserialize_with = "nullable")]
    pub prov_en: String,
    #[serde(deserialize_with = "nullable")]
    pub city: String,
    #[serde(deserialize_with = "nullable")]
    pub city_en: String,
    #[serde(deserialize_with = "nullable")]
    pub owner: String,
    #[serde(deserialize_with = "nullable")]
    pub isp: String,
    #[serde(deserialize_with = "nullable")]
    pub whois: String,
}

impl GeoInfo {
    /// `"City, Country"` when both are known, the country alone otherwise.
    pub fn location(&self) -> Option<String> {
        match (self.city_en.is_empty(), self.country_en.is_empty()) {
            (false, false) => Some(format!("{}, {}", self.city_en, self.country_en)),
            (_, false) => Some(self.country_en.clone()),
            _ => None,
        }
    }
}

/// Aggregated view of one trace run.
#[derive(Debug, Clone, Default)]
pub struct TraceResult {
    pub target: String,
    /// Hops in the order the tool reported them.
    pub hops: Vec<Hop>,
}

/// All probes sharing one TTL, folded into a single row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hop {
    pub ttl: u64,
    pub ip: String,
    pub hostname: String,
    /// Successful round-trip times in milliseconds, in probe order.
    pub rtt: Vec<f64>,
    /// Fraction of probes without a resolved reply, in `[0, 1]`.
    pub loss: f64,
    pub asn: String,
    pub location: String,
}

impl Hop {
    pub fn average_rtt(&self) -> f64 {
        if self.rtt.is_empty() {
            return 0.0;
        }
        self.rtt.iter().sum::<f64>() / self.rtt.len() as f64
    }

    pub fn has_valid_ip(&self) -> bool {
        !self.ip.is_empty() && self.ip != UNRESOLVED_HOP
    }
}
