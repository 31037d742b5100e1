use anyhow::{anyhow, Result};

/// Normalizes a DNS name into the lowercase ASCII form used for matching.
pub fn normalize_domain(input: &str) -> Result<String> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(anyhow!("domain name is required"));
    }
    let ascii = idna::domain_to_ascii(trimmed)
        .map_err(|err| anyhow!("invalid domain name: {err}"))?;
    Ok(ascii.to_lowercase())
}

/// Like [`normalize_domain`] but keeps a leading wildcard label.
pub fn normalize_dns_name(input: &str) -> Result<String> {
    let trimmed = input.trim();
    match trimmed.strip_prefix("*.") {
        Some(rest) => Ok(format!("*.{}", normalize_domain(rest)?)),
        None if trimmed == "*" => Err(anyhow!("wildcard name needs a base domain")),
        None => normalize_domain(trimmed),
    }
}

/// Normalized form used for suffix comparisons. Falls back to a plain
/// lowercase/trim when the name is not valid IDNA so comparisons stay total.
pub fn comparable_name(input: &str) -> String {
    normalize_dns_name(input)
        .unwrap_or_else(|_| input.trim().trim_end_matches('.').to_lowercase())
}
