//! Parser for `nexttrace -j` output.
//!
//! The tool prints colored diagnostic banners ahead of the JSON document even
//! when asked for machine output, so the payload is located by stripping ANSI
//! color sequences and taking everything from the first `{`.

use std::sync::OnceLock;

use regex::bytes::Regex;
use thiserror::Error;

use super::models::{Hop, ProbeRecord, RawTrace, TraceResult};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to parse nexttrace JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parse raw combined output of the tool into aggregated hops.
pub fn parse_output(data: &[u8]) -> Result<TraceResult, ParseError> {
    let payload = clean_output(data);
    let raw: RawTrace = serde_json::from_slice(&payload)?;

    let hops = raw
        .hops
        .iter()
        .filter(|probes| !probes.is_empty())
        .filter_map(|probes| aggregate_hop(probes))
        .collect();

    Ok(TraceResult {
        target: String::new(),
        hops,
    })
}

/// Strip ANSI color sequences and cut any preamble before the JSON payload.
///
/// Falls back to the untouched input when no `{` is present so the decoder
/// reports the real problem.
pub fn clean_output(data: &[u8]) -> Vec<u8> {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let ansi = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

    let cleaned = ansi.replace_all(data, &b""[..]);
    match cleaned.iter().position(|&b| b == b'{') {
        Some(start) => cleaned[start..].to_vec(),
        None => data.to_vec(),
    }
}

/// Fold all probes of one TTL group into a [`Hop`].
///
/// Returns `None` when the group does not carry a positive TTL.
fn aggregate_hop(probes: &[ProbeRecord]) -> Option<Hop> {
    let mut fold = HopFold::default();
    for probe in probes {
        fold.push(probe);
    }

    let ttl = u64::try_from(fold.ttl).ok().filter(|ttl| *ttl > 0)?;
    let total = probes.len();
    let loss = (total - fold.answered) as f64 / total as f64;

    Some(Hop {
        ttl,
        ip: fold.ip.unwrap_or_default(),
        hostname: fold.hostname.unwrap_or_default(),
        rtt: fold.rtt,
        loss,
        asn: fold.asn.unwrap_or_default(),
        location: fold.location.unwrap_or_default(),
    })
}

/// Running state while folding a TTL group. Descriptive fields are taken from
/// the first answering probe that has them and never overwritten.
#[derive(Default)]
struct HopFold {
    ttl: i64,
    answered: usize,
    rtt: Vec<f64>,
    ip: Option<String>,
    hostname: Option<String>,
    asn: Option<String>,
    location: Option<String>,
}

impl HopFold {
    fn push(&mut self, probe: &ProbeRecord) {
        // Records of one group share a TTL; the last one read is kept.
        self.ttl = probe.ttl;

        let address = match (&probe.address, probe.success) {
            (Some(address), true) => address,
            _ => return,
        };
        self.answered += 1;

        if probe.rtt > 0 {
            self.rtt.push(probe.rtt as f64 / NANOS_PER_MILLI);
        }

        set_once(&mut self.ip, &address.ip);
        set_once(&mut self.hostname, &probe.hostname);

        if let Some(geo) = &probe.geo {
            set_once(&mut self.asn, &geo.asnumber);
            if self.location.is_none() {
                self.location = geo.location();
            }
        }
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() && !value.is_empty() {
        *slot = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_json(success: bool, ip: Option<&str>, ttl: i64, rtt: i64) -> String {
        let address = match ip {
            Some(ip) => format!(r#"{{"IP": "{}", "Zone": ""}}"#, ip),
            None => "null".to_string(),
        };
        format!(
            r#"{{"Success": {}, "Address": {}, "Hostname": "", "TTL": {}, "RTT": {}, "Error": null, "Geo": null, "Lang": "", "MPLS": null}}"#,
            success, address, ttl, rtt
        )
    }

    #[test]
    fn test_parse_single_hop() {
        let input = br#"{"Hops":[[{"Success":true,"Address":{"IP":"192.168.1.1"},"Hostname":"gw","TTL":1,"RTT":1230000,"Geo":{"asnumber":"64512"}}]]}"#;
        let result = parse_output(input).unwrap();

        assert_eq!(result.hops.len(), 1);
        let hop = &result.hops[0];
        assert_eq!(hop.ttl, 1);
        assert_eq!(hop.ip, "192.168.1.1");
        assert_eq!(hop.hostname, "gw");
        assert_eq!(hop.asn, "64512");
        assert_eq!(hop.rtt, vec![1.23]);
        assert_eq!(hop.loss, 0.0);
        assert_eq!(hop.location, "");
    }

    #[test]
    fn test_parse_full_document() {
        let input = br#"{
            "Hops": [
                [
                    {"Success": true, "Address": {"IP": "192.168.1.1", "Zone": ""}, "Hostname": "gateway.local", "TTL": 1, "RTT": 1230000, "Error": null,
                     "Geo": {"ip": "", "asnumber": "64512", "country": "", "country_en": "", "city": "", "city_en": "", "whois": "RFC1918", "lat": 0, "lng": 0, "router": null}, "Lang": "cn", "MPLS": null},
                    {"Success": true, "Address": {"IP": "192.168.1.1", "Zone": ""}, "Hostname": "gateway.local", "TTL": 1, "RTT": 1450000, "Error": null, "Geo": null, "Lang": "cn", "MPLS": null},
                    {"Success": true, "Address": {"IP": "192.168.1.1", "Zone": ""}, "Hostname": "gateway.local", "TTL": 1, "RTT": 1340000, "Error": null, "Geo": null, "Lang": "cn", "MPLS": null}
                ],
                [
                    {"Success": true, "Address": {"IP": "10.0.0.1", "Zone": ""}, "Hostname": "isp.router", "TTL": 2, "RTT": 5670000, "Error": null,
                     "Geo": {"asnumber": "12345", "country": "Country", "country_en": "Country", "city": "City", "city_en": "City"}, "Lang": "cn", "MPLS": null}
                ]
            ],
            "TraceMapUrl": ""
        }"#;
        let result = parse_output(input).unwrap();

        assert_eq!(result.hops.len(), 2);

        let first = &result.hops[0];
        assert_eq!(first.ttl, 1);
        assert_eq!(first.rtt.len(), 3);
        let expected_avg = (1.23 + 1.45 + 1.34) / 3.0;
        assert!((first.average_rtt() - expected_avg).abs() < 0.001);
        assert_eq!(first.location, "");

        let second = &result.hops[1];
        assert_eq!(second.ttl, 2);
        assert_eq!(second.ip, "10.0.0.1");
        assert_eq!(second.asn, "12345");
        assert_eq!(second.location, "City, Country");
    }

    #[test]
    fn test_parse_partial_loss() {
        let input = format!(
            r#"{{"Hops": [[{}, {}, {}]], "TraceMapUrl": ""}}"#,
            probe_json(true, Some("192.168.1.1"), 1, 1_000_000),
            probe_json(false, None, 1, 0),
            probe_json(false, None, 1, 0),
        );
        let result = parse_output(input.as_bytes()).unwrap();

        let hop = &result.hops[0];
        assert!((hop.loss - 2.0 / 3.0).abs() < 0.01);
        assert_eq!(hop.rtt, vec![1.0]);
    }

    #[test]
    fn test_parse_all_timeout() {
        let input = format!(
            r#"{{"Hops": [[{}, {}, {}]]}}"#,
            probe_json(false, None, 1, 0),
            probe_json(false, None, 1, 0),
            probe_json(false, None, 1, 0),
        );
        let result = parse_output(input.as_bytes()).unwrap();

        assert_eq!(result.hops.len(), 1);
        let hop = &result.hops[0];
        assert_eq!(hop.loss, 1.0);
        assert!(hop.rtt.is_empty());
        assert_eq!(hop.ip, "");
        assert!(!hop.has_valid_ip());
    }

    #[test]
    fn test_loss_ratio_for_each_success_count() {
        for total in 1..=5usize {
            for successes in 0..=total {
                let probes: Vec<String> = (0..total)
                    .map(|i| {
                        if i < successes {
                            probe_json(true, Some("10.0.0.1"), 3, 2_000_000)
                        } else {
                            probe_json(false, None, 3, 0)
                        }
                    })
                    .collect();
                let input = format!(r#"{{"Hops": [[{}]]}}"#, probes.join(","));
                let hop = &parse_output(input.as_bytes()).unwrap().hops[0];

                assert_eq!(hop.loss, (total - successes) as f64 / total as f64);
                assert_eq!(hop.rtt.len(), successes);
            }
        }
    }

    #[test]
    fn test_success_without_address_counts_as_loss() {
        let input = format!(
            r#"{{"Hops": [[{}, {}]]}}"#,
            probe_json(true, None, 4, 3_000_000),
            probe_json(true, Some("10.1.1.1"), 4, 5_000_000),
        );
        let hop = &parse_output(input.as_bytes()).unwrap().hops[0];

        assert_eq!(hop.loss, 0.5);
        assert_eq!(hop.rtt, vec![5.0]);
        assert_eq!(hop.ip, "10.1.1.1");
    }

    #[test]
    fn test_zero_rtt_is_not_recorded() {
        let input = format!(
            r#"{{"Hops": [[{}, {}]]}}"#,
            probe_json(true, Some("10.0.0.1"), 2, 0),
            probe_json(true, Some("10.0.0.1"), 2, 4_000_000),
        );
        let hop = &parse_output(input.as_bytes()).unwrap().hops[0];

        assert_eq!(hop.loss, 0.0);
        assert_eq!(hop.rtt, vec![4.0]);
    }

    #[test]
    fn test_first_value_wins() {
        let input = br#"{"Hops":[[
            {"Success":false,"Address":{"IP":"203.0.113.9"},"Hostname":"ignored","TTL":5,"RTT":0},
            {"Success":true,"Address":{"IP":""},"Hostname":"","TTL":5,"RTT":1000000,"Geo":{"asnumber":"","country_en":"Japan"}},
            {"Success":true,"Address":{"IP":"10.0.0.5"},"Hostname":"first","TTL":5,"RTT":2000000,"Geo":{"asnumber":"100","city_en":"Osaka","country_en":"Japan"}},
            {"Success":true,"Address":{"IP":"10.0.0.6"},"Hostname":"second","TTL":5,"RTT":3000000,"Geo":{"asnumber":"200","city_en":"Tokyo","country_en":"Japan"}}
        ]]}"#;
        let hop = &parse_output(input).unwrap().hops[0];

        assert_eq!(hop.ip, "10.0.0.5");
        assert_eq!(hop.hostname, "first");
        assert_eq!(hop.asn, "100");
        assert_eq!(hop.location, "Japan");
        assert_eq!(hop.rtt, vec![1.0, 2.0, 3.0]);
        assert_eq!(hop.loss, 0.25);
    }

    #[test]
    fn test_last_ttl_in_group_wins() {
        let input = format!(
            r#"{{"Hops": [[{}, {}]]}}"#,
            probe_json(false, None, 7, 0),
            probe_json(false, None, 8, 0),
        );
        let hop = &parse_output(input.as_bytes()).unwrap().hops[0];
        assert_eq!(hop.ttl, 8);
    }

    #[test]
    fn test_non_positive_ttl_is_dropped() {
        let input = format!(
            r#"{{"Hops": [[{}], [{}], [], [{}]]}}"#,
            probe_json(true, Some("10.0.0.1"), 0, 1_000_000),
            probe_json(true, Some("10.0.0.2"), -1, 1_000_000),
            probe_json(false, None, 3, 0),
        );
        let result = parse_output(input.as_bytes()).unwrap();

        assert_eq!(result.hops.len(), 1);
        assert_eq!(result.hops[0].ttl, 3);
    }

    #[test]
    fn test_large_ttl_is_kept() {
        let input = format!(
            r#"{{"Hops": [[{}]]}}"#,
            probe_json(true, Some("10.0.0.9"), 5_000_000_000, 1_000_000),
        );
        let result = parse_output(input.as_bytes()).unwrap();

        assert_eq!(result.hops.len(), 1);
        assert_eq!(result.hops[0].ttl, 5_000_000_000);
    }

    #[test]
    fn test_hop_order_is_preserved() {
        let input = format!(
            r#"{{"Hops": [[{}], [{}], [{}]]}}"#,
            probe_json(true, Some("10.0.0.3"), 3, 1_000_000),
            probe_json(true, Some("10.0.0.1"), 1, 1_000_000),
            probe_json(true, Some("10.0.0.2"), 2, 1_000_000),
        );
        let ttls: Vec<u64> = parse_output(input.as_bytes())
            .unwrap()
            .hops
            .iter()
            .map(|h| h.ttl)
            .collect();
        assert_eq!(ttls, vec![3, 1, 2]);
    }

    #[test]
    fn test_empty_and_null_hops() {
        assert!(parse_output(br#"{"Hops":[]}"#).unwrap().hops.is_empty());
        assert!(parse_output(br#"{"Hops":null}"#).unwrap().hops.is_empty());
        assert!(parse_output(br#"{}"#).unwrap().hops.is_empty());
    }

    #[test]
    fn test_parse_with_ansi_preamble() {
        let input = b"\x1b[37;1m[NextTrace API]\x1b[0;22m preferred API IP - \x1b[32;1m[2606:4700:20::681a:c97]\x1b[0;22m\n{\"Hops\":[[{\"Success\":true,\"Address\":{\"IP\":\"1.1.1.1\"},\"TTL\":1,\"RTT\":500000}]]}";
        let result = parse_output(input).unwrap();

        assert_eq!(result.hops.len(), 1);
        assert_eq!(result.hops[0].rtt, vec![0.5]);
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = parse_output(b"{\"Hops\": [[{]]").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse nexttrace JSON"));
    }

    #[test]
    fn test_parse_without_payload() {
        assert!(parse_output(b"nexttrace: unknown host").is_err());
        assert!(parse_output(b"").is_err());
    }

    #[test]
    fn test_clean_output() {
        let cases: [(&[u8], &[u8]); 4] = [
            (
                b"\x1b[37;1m[NextTrace API]\x1b[0;22m preferred API IP - \x1b[32;1m[2606:4700:20::681a:c97]\x1b[0;22m\n{\"Hops\":[]}",
                b"{\"Hops\":[]}",
            ),
            (b"{\"Hops\":[]}", b"{\"Hops\":[]}"),
            (
                b"\x1b[37;1m[NextTrace API]\x1b[0;22m test\n{\"Hops\":[[{\"Success\":true}]]}",
                b"{\"Hops\":[[{\"Success\":true}]]}",
            ),
            (b"no json here", b"no json here"),
        ];

        for (input, expected) in cases {
            assert_eq!(clean_output(input), expected.to_vec());
        }
    }

    #[test]
    fn test_clean_output_strips_escapes_inside_payload() {
        let plain = br#"{"Hops":[[{"Success":true,"Hostname":"gw"}]]}"#;
        let colored = b"\x1b[1m{\"Hops\":[[{\"Success\":true,\"Hostname\":\x1b[32m\"gw\"\x1b[0m}]]}";
        assert_eq!(clean_output(colored), plain.to_vec());
    }

    #[test]
    fn test_hop_average_rtt() {
        let cases = [
            (vec![1.0, 2.0, 3.0], 2.0),
            (vec![5.5], 5.5),
            (vec![], 0.0),
        ];
        for (rtt, expected) in cases {
            let hop = Hop {
                rtt,
                ..Default::default()
            };
            assert_eq!(hop.average_rtt(), expected);
        }
    }

    #[test]
    fn test_hop_has_valid_ip() {
        let hop = |ip: &str| Hop {
            ip: ip.to_string(),
            ..Default::default()
        };
        assert!(hop("192.168.1.1").has_valid_ip());
        assert!(!hop("").has_valid_ip());
        assert!(!hop("*").has_valid_ip());
    }
}
