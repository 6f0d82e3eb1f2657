//! Domain-list loading and normalization.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, VigilError};

/// Normalize and validate a domain name
///
/// This function:
/// - Removes http:// and https:// prefixes
/// - Removes paths, query strings and ports
/// - Converts to lowercase
/// - Validates format (must contain dots, only alphanumeric/hyphens/dots)
pub fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().to_lowercase();

    let domain = domain
        .strip_prefix("http://")
        .or_else(|| domain.strip_prefix("https://"))
        .unwrap_or(&domain);

    let domain = domain
        .split(['/', '?', '#'])
        .next()
        .unwrap_or(domain);
    let domain = domain.split(':').next().unwrap_or(domain);

    if domain.is_empty() || !domain.contains('.') {
        return Err(VigilError::InvalidDomain(domain.to_string()));
    }

    let valid = domain
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(VigilError::InvalidDomain(domain.to_string()));
    }

    if domain.contains("..") || domain.starts_with('.') || domain.ends_with('.') {
        return Err(VigilError::InvalidDomain(domain.to_string()));
    }

    for label in domain.split('.') {
        if label.is_empty() || label.starts_with('-') || label.ends_with('-') {
            return Err(VigilError::InvalidDomain(domain.to_string()));
        }
    }

    Ok(domain.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DomainFile {
    Wrapped { domains: Vec<DomainEntry> },
    List(Vec<DomainEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DomainEntry {
    Name(String),
    Record { domain: String },
}

impl DomainEntry {
    fn into_name(self) -> String {
        match self {
            DomainEntry::Name(name) => name,
            DomainEntry::Record { domain } => domain,
        }
    }
}

/// Parses a domain list in any of the accepted shapes: `{"domains": [...]}`,
/// a JSON array, or plain text with one domain per line (`#` comments, CSV
/// first column). Invalid names are skipped; duplicates keep their first
/// position.
pub fn parse_domain_list(content: &str) -> Result<Vec<String>> {
    let trimmed = content.trim_start();
    let raw: Vec<String> = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<DomainFile>(trimmed)? {
            DomainFile::Wrapped { domains } | DomainFile::List(domains) => {
                domains.into_iter().map(DomainEntry::into_name).collect()
            }
        }
    } else {
        content
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| line.split(',').next().unwrap_or(line).trim().to_string())
            .collect()
    };

    let mut seen = HashSet::new();
    let mut domains = Vec::with_capacity(raw.len());
    for entry in raw {
        match normalize_domain(&entry) {
            Ok(domain) => {
                if seen.insert(domain.clone()) {
                    domains.push(domain);
                } else {
                    debug!(domain = %domain, "Skipping duplicate domain");
                }
            }
            Err(_) => warn!(entry = %entry, "Skipping invalid domain"),
        }
    }
    Ok(domains)
}

pub async fn load_domains(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_domain_list(&content)
}
