//! Protocol utilities for upgrade requests
//!
//! Handles request-target parsing, path normalization and header capture.

use std::collections::BTreeMap;

use http::header::{CONNECTION, HOST, UPGRADE};
use http::HeaderMap;
use url::Url;
use wsgate_protocol::UrlComponents;

use crate::session::RequestMetadata;

/// Collapse runs of `/` or `\` into single slashes, dropping empty segments
///
/// The result always starts with exactly one `/`.
pub fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Lower-cased header map; repeated headers are joined with `", "`
pub fn capture_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut captured: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        captured
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    captured
}

/// Split a request target into its components
///
/// Origin-form targets (`/a?b`) take host information from the `Host`
/// header. Absolute-form targets (`http://h/a`) carry their own.
pub fn url_components(target: &str, host_header: Option<&str>) -> UrlComponents {
    if let Some(components) = absolute_components(target) {
        return components;
    }

    let (before_hash, hash) = match target.find('#') {
        Some(i) => (&target[..i], Some(target[i..].to_string())),
        None => (target, None),
    };
    let (raw_path, query) = match before_hash.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (before_hash, None),
    };

    let (hostname, port) = host_header.map_or((None, None), split_host);

    UrlComponents {
        protocol: None,
        host: host_header.map(str::to_string),
        hostname,
        port,
        hash: hash.filter(|h| h.len() > 1),
        search: query.map(|q| format!("?{q}")),
        query: query.map(str::to_string),
        pathname: normalize_path(raw_path),
        path: Some(before_hash.to_string()),
        href: Some(target.to_string()),
    }
}

fn absolute_components(target: &str) -> Option<UrlComponents> {
    let scheme_end = target.find("://")?;
    if !target[..scheme_end]
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return None;
    }
    let url = Url::parse(target).ok()?;
    let host = url.host_str().map(|h| match url.port() {
        Some(port) => format!("{h}:{port}"),
        None => h.to_string(),
    });
    let path = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    Some(UrlComponents {
        protocol: Some(format!("{}:", url.scheme())),
        host,
        hostname: url.host_str().map(str::to_string),
        port: url.port().map(|p| p.to_string()),
        hash: url.fragment().filter(|f| !f.is_empty()).map(|f| format!("#{f}")),
        search: url.query().map(|q| format!("?{q}")),
        query: url.query().map(str::to_string),
        pathname: normalize_path(url.path()),
        path: Some(path),
        href: Some(target.to_string()),
    })
}

fn split_host(host: &str) -> (Option<String>, Option<String>) {
    // Bracketed IPv6 literal: [::1]:8080
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((addr, tail)) => (
                Some(addr.to_string()),
                tail.strip_prefix(':').map(str::to_string),
            ),
            None => (Some(host.to_string()), None),
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            (Some(name.to_string()), Some(port.to_string()))
        }
        _ => (Some(host.to_string()), None),
    }
}

/// True if the request asks for a protocol upgrade at all
///
/// Whether the upgrade is a valid WebSocket handshake is only checked
/// when the handshake is completed.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let has_upgrade = headers.contains_key(UPGRADE);
    let connection_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value.to_str().is_ok_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
    });
    has_upgrade && connection_upgrade
}

/// Everything the consumer sees about a request, captured once
pub fn capture_metadata(request: &http::Request<()>, target: &str) -> RequestMetadata {
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok());
    RequestMetadata {
        headers: capture_headers(request.headers()),
        url: url_components(target, host),
    }
}
