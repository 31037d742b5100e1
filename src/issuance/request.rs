use anyhow::{anyhow, Result};

use crate::{
    core::types::{CertificateRequest, KeyAlgorithm, KeyParams},
    domain::normalize_dns_name,
};

/// Validates a request and returns its normalized form.
///
/// DNS names are trimmed, lowercased and IDNA-encoded; duplicates are dropped
/// but input order is kept so the first name stays the primary subject.
pub fn validate_request(request: &CertificateRequest) -> Result<CertificateRequest> {
    let certificate_name = validate_certificate_name(&request.certificate_name)?;
    let dns_names = validate_and_normalize_dns_names(&request.dns_names)?;
    let key = resolve_key_params(&request.key)?;
    Ok(CertificateRequest {
        certificate_name,
        dns_names,
        key,
        reuse_key: request.reuse_key,
    })
}

pub fn validate_and_normalize_dns_names(dns_names: &[String]) -> Result<Vec<String>> {
    if dns_names.is_empty() {
        return Err(anyhow!("At least one DNS name is required"));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(dns_names.len());
    for raw in dns_names {
        if raw.trim().is_empty() {
            continue;
        }
        let name = normalize_dns_name(raw).map_err(|err| anyhow!("{raw}: {err}"))?;
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }

    if normalized.is_empty() {
        return Err(anyhow!("No valid DNS names provided"));
    }

    Ok(normalized)
}

fn validate_certificate_name(raw: &str) -> Result<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(anyhow!("Certificate name is required"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(anyhow!(
            "Certificate name {name:?} may only contain letters, digits and '-'"
        ));
    }
    Ok(name.to_string())
}

/// Validates key algorithm and size/curve parameters.
pub fn resolve_key_params(key: &KeyParams) -> Result<KeyParams> {
    match key.algorithm {
        KeyAlgorithm::Rsa => {
            let size = key.size.unwrap_or(2048);
            if !matches!(size, 2048 | 3072 | 4096) {
                return Err(anyhow!(
                    "Unsupported RSA key size {size}. Allowed: 2048, 3072, 4096"
                ));
            }
            if key.curve.is_some() {
                return Err(anyhow!("RSA keys do not accept a curve"));
            }
            Ok(KeyParams {
                algorithm: KeyAlgorithm::Rsa,
                size: Some(size),
                curve: None,
            })
        }
        KeyAlgorithm::Ec => {
            if key.size.is_some() {
                return Err(anyhow!("EC keys do not accept a key size"));
            }
            let curve = key.curve.ok_or_else(|| anyhow!("EC key curve is required"))?;
            Ok(KeyParams {
                algorithm: KeyAlgorithm::Ec,
                size: None,
                curve: Some(curve),
            })
        }
    }
}
