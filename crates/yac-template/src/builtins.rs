//! Builtin globals, filters, and tests registered into every template
//! environment (supplemented from `j2_functions`/`j2_filters`/`j2_tests`,
//! dropped by the distilled spec but required by the `name_generator`
//! grammar and role/set predicates — see SPEC_FULL.md §4.3).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use minijinja::value::Value as JValue;
use minijinja::{Error, ErrorKind};

fn to_err(msg: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg.into())
}

pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Converts a props mapping into a flat `PATH__TO__KEY -> value` constants
/// map, the same flattening convention the shell action plugin uses for
/// environment variables.
pub fn to_consts(props: JValue) -> JValue {
    let mut out = HashMap::new();
    flatten(&props, "", &mut out);
    JValue::from_serialize(&out)
}

fn flatten(v: &JValue, prefix: &str, out: &mut HashMap<String, String>) {
    if let Some(map) = v.as_object() {
        if let Ok(iter) = map.try_iter() {
            for key in iter {
                if let Some(value) = map.get_value(&key) {
                    let k = key.as_str().unwrap_or_default().to_uppercase();
                    let next_prefix = if prefix.is_empty() {
                        k
                    } else {
                        format!("{prefix}__{k}")
                    };
                    flatten(&value, &next_prefix, out);
                }
            }
            return;
        }
    }
    if v.is_none() || v.is_undefined() {
        out.insert(prefix.to_string(), String::new());
    } else {
        out.insert(prefix.to_string(), v.to_string());
    }
}

/// Next free positive integer not already captured (by `pattern`'s first
/// group) among `names`, searched up to a bounded range to avoid looping
/// forever against a pathological pattern.
const NEXT_INT_SEARCH_LIMIT: u64 = 100_000;

pub fn next_int_by_regex(names: Vec<String>, pattern: String) -> Result<String, Error> {
    let re = Regex::new(&pattern).map_err(|e| to_err(format!("invalid pattern: {e}")))?;
    let mut used = std::collections::HashSet::new();
    for name in &names {
        if let Some(caps) = re.captures(name) {
            if let Some(group) = caps.get(1) {
                if let Ok(n) = group.as_str().parse::<u64>() {
                    used.insert(n);
                }
            }
        }
    }
    for candidate in 1..=NEXT_INT_SEARCH_LIMIT {
        if !used.contains(&candidate) {
            return Ok(candidate.to_string());
        }
    }
    Err(to_err("next_int_by_regex: search space exhausted"))
}

static IP_CACHE: Lazy<Mutex<HashMap<String, (Instant, bool)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
const IP_CACHE_TTL: Duration = Duration::from_secs(300);

/// Whether `host` resolves to an address inside any of `ranges` (CIDR
/// strings). Result is cached for `IP_CACHE_TTL` to bound resolver load —
/// the original is an `async`, `alru_cache`-backed lookup; here the
/// resolution itself is a blocking `ToSocketAddrs` call, cached the same
/// way.
pub fn host_in_ip4ranges(host: String, ranges: Vec<String>) -> Result<bool, Error> {
    let cache_key = format!("{host}|{}", ranges.join(","));
    if let Some((at, result)) = IP_CACHE.lock().unwrap().get(&cache_key) {
        if at.elapsed() < IP_CACHE_TTL {
            return Ok(*result);
        }
    }

    let ip = resolve_ipv4(&host).map_err(to_err)?;
    let result = ranges.iter().any(|cidr| ipv4_in_cidr(ip, cidr));

    IP_CACHE
        .lock()
        .unwrap()
        .insert(cache_key, (Instant::now(), result));
    Ok(result)
}

fn resolve_ipv4(host: &str) -> Result<std::net::Ipv4Addr, String> {
    if let Ok(IpAddr::V4(addr)) = host.parse::<IpAddr>() {
        return Ok(addr);
    }
    format!("{host}:0")
        .to_socket_addrs()
        .map_err(|e| format!("could not resolve {host}: {e}"))?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| format!("no IPv4 address for {host}"))
}

fn ipv4_in_cidr(ip: std::net::Ipv4Addr, cidr: &str) -> bool {
    let (net, bits) = match cidr.split_once('/') {
        Some((n, b)) => (n, b.parse::<u32>().unwrap_or(32)),
        None => (cidr, 32),
    };
    let net: std::net::Ipv4Addr = match net.parse() {
        Ok(n) => n,
        Err(_) => return false,
    };
    let mask = if bits == 0 { 0 } else { !0u32 << (32 - bits) };
    u32::from(ip) & mask == u32::from(net) & mask
}

/// Converts an IPv4 network into a reverse-DNS-style fully qualified name
/// fragment, e.g. `10.0.1.0/24` → `1.0.10.in-addr.arpa`.
pub fn ip4net_to_fqhn(net: String) -> Result<String, Error> {
    let (addr, _bits) = net
        .split_once('/')
        .ok_or_else(|| to_err("expected a CIDR network"))?;
    let ip: std::net::Ipv4Addr = addr.parse().map_err(|_| to_err("invalid IPv4 network"))?;
    let octets = ip.octets();
    Ok(format!(
        "{}.{}.{}.in-addr.arpa",
        octets[2], octets[1], octets[0]
    ))
}

/// Normalizes a short hostname into a fully qualified form (no trailing
/// dot, lower-cased).
pub fn to_fqhn(name: String) -> String {
    name.trim_end_matches('.').to_lowercase()
}

pub fn regex_replace(s: String, pattern: String, repl: String) -> Result<String, Error> {
    let re = Regex::new(&pattern).map_err(|e| to_err(format!("invalid pattern: {e}")))?;
    Ok(re.replace_all(&s, repl.as_str()).to_string())
}

pub fn re_escape(s: String) -> String {
    regex::escape(&s)
}

/// Minimal `str.format`-alike over a flat keyword mapping.
pub fn rformat(s: String, kwargs: JValue) -> Result<String, Error> {
    let mut out = s.clone();
    if let Some(map) = kwargs.as_object() {
        if let Ok(iter) = map.try_iter() {
            for key in iter {
                if let Some(value) = map.get_value(&key) {
                    let needle = format!("{{{}}}", key.as_str().unwrap_or_default());
                    out = out.replace(&needle, &value.to_string());
                }
            }
        }
    }
    Ok(out)
}

pub fn to_datetime(s: String) -> Result<String, Error> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.to_rfc3339())
        .map_err(|e| to_err(format!("invalid datetime {s}: {e}")))
}

pub fn regex_match(s: String, pattern: String) -> Result<bool, Error> {
    let re = Regex::new(&pattern).map_err(|e| to_err(format!("invalid pattern: {e}")))?;
    Ok(re.is_match(&s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_int_finds_gap() {
        let names = vec!["h1".to_string(), "h2".to_string(), "h4".to_string()];
        assert_eq!(
            next_int_by_regex(names, r"^h(\d+)$".to_string()).unwrap(),
            "3"
        );
    }

    #[test]
    fn ipv4_in_cidr_matches() {
        let ip: std::net::Ipv4Addr = "10.0.1.5".parse().unwrap();
        assert!(ipv4_in_cidr(ip, "10.0.1.0/24"));
        assert!(!ipv4_in_cidr(ip, "10.0.2.0/24"));
    }

    #[test]
    fn fqhn_reverse_zone() {
        assert_eq!(ip4net_to_fqhn("10.0.1.0/24".to_string()).unwrap(), "1.0.10.in-addr.arpa");
    }

    #[test]
    fn regex_replace_substitutes() {
        assert_eq!(
            regex_replace("a-b-c".to_string(), "-".to_string(), "_".to_string()).unwrap(),
            "a_b_c"
        );
    }
}
