use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::comparable_name;

/// Domain validation method used for a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStrategy {
    Dns01,
    Http01,
}

impl fmt::Display for ChallengeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeStrategy::Dns01 => f.write_str("dns-01"),
            ChallengeStrategy::Http01 => f.write_str("http-01"),
        }
    }
}

/// Chooses DNS-01 when any name is a wildcard or ends with a managed zone,
/// HTTP-01 otherwise.
///
/// The decision covers every name in the request: one qualifying name puts
/// the unrelated names on DNS-01 too. Zone matching is a plain suffix test on
/// normalized names, without a label boundary.
pub fn select_strategy(dns_names: &[String], zones: &[String]) -> ChallengeStrategy {
    let zones: Vec<String> = zones
        .iter()
        .map(|zone| comparable_name(zone))
        .filter(|zone| !zone.is_empty())
        .collect();

    let use_dns01 = dns_names.iter().any(|name| {
        let name = comparable_name(name);
        name.starts_with('*') || zones.iter().any(|zone| name.ends_with(zone.as_str()))
    });

    if use_dns01 {
        ChallengeStrategy::Dns01
    } else {
        ChallengeStrategy::Http01
    }
}
