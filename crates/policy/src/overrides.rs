//! Per-workload proxy settings resolved from annotations.
//!
//! Each key resolves independently: object annotation, then namespace
//! annotation, then the config default.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use smallvec::SmallVec;

use crate::annotations::*;
use crate::config::InjectConfig;
use crate::generator::GenerateError;

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+|[numkMGTPE]|[KMGTPE]i)?$")
        .expect("quantity regex is valid")
});

/// Loose check for Kubernetes resource quantities (`100m`, `64Mi`, `1.5`).
pub fn is_quantity(s: &str) -> bool { QUANTITY_RE.is_match(s) }

/// Inclusive port range; a single port has `lo == hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange { pub lo: u16, pub hi: u16 }

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi { write!(f, "{}", self.lo) } else { write!(f, "{}-{}", self.lo, self.hi) }
    }
}

pub type PortList = SmallVec<[PortRange; 4]>;

fn parse_port(s: &str) -> Result<u16, String> {
    match s.trim().parse::<u16>() {
        Ok(0) => Err("port 0 is not valid".into()),
        Ok(p) => Ok(p),
        Err(_) => Err(format!("{:?} is not a port", s.trim())),
    }
}

/// Parse `"25,443,8000-8100"`. Blank entries are ignored.
pub fn parse_ports(s: &str) -> Result<PortList, String> {
    let mut out = PortList::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_port(lo)?, parse_port(hi)?);
                if lo > hi { return Err(format!("range {} is reversed", part)); }
                PortRange { lo, hi }
            }
            None => { let p = parse_port(part)?; PortRange { lo: p, hi: p } }
        };
        out.push(range);
    }
    Ok(out)
}

pub fn join_ports(ports: &[PortRange]) -> String {
    ports.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSettings {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

impl ResourceSettings {
    pub fn is_empty(&self) -> bool {
        self.cpu_request.is_none() && self.cpu_limit.is_none() && self.memory_request.is_none() && self.memory_limit.is_none()
    }
}

/// Fully resolved proxy parameters for one workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub proxy_image: String,
    pub proxy_version: String,
    pub init_image: String,
    pub init_version: String,
    pub uid: i64,
    pub log_level: String,
    pub resources: ResourceSettings,
    pub skip_inbound_ports: PortList,
    pub skip_outbound_ports: PortList,
}

/// Layered annotation view: object first, then namespace.
#[derive(Debug, Clone, Copy)]
pub struct Overrides<'a> {
    object: &'a BTreeMap<String, String>,
    namespace: Option<&'a BTreeMap<String, String>>,
}

impl<'a> Overrides<'a> {
    pub fn new(object: &'a BTreeMap<String, String>, namespace: Option<&'a BTreeMap<String, String>>) -> Self {
        Self { object, namespace }
    }

    /// Returns the winning `(key, value)`; blank values count as unset.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        let pick = |m: &'a BTreeMap<String, String>| m.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        pick(self.object).or_else(|| self.namespace.and_then(pick))
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> GenerateError {
        GenerateError::InvalidAnnotation {
            key: key.to_string(),
            value: self.get(key).unwrap_or_default().to_string(),
            reason: reason.into(),
        }
    }

    fn quantity(&self, key: &str, default: &Option<String>) -> Result<Option<String>, GenerateError> {
        match self.get(key) {
            Some(v) if is_quantity(v) => Ok(Some(v.to_string())),
            Some(_) => Err(self.invalid(key, "not a resource quantity")),
            None => Ok(default.clone()),
        }
    }

    fn ports(&self, key: &str) -> Result<PortList, GenerateError> {
        match self.get(key) {
            Some(v) => parse_ports(v).map_err(|reason| self.invalid(key, reason)),
            None => Ok(PortList::new()),
        }
    }

    pub fn resolve(&self, config: &InjectConfig) -> Result<ProxySettings, GenerateError> {
        let proxy = &config.proxy;
        let uid = match self.get(PROXY_UID_ANNOTATION) {
            Some(v) => v.parse::<i64>().ok().filter(|u| *u >= 0).ok_or_else(|| self.invalid(PROXY_UID_ANNOTATION, "not a non-negative integer"))?,
            None => proxy.uid,
        };
        let proxy_version = self.get(PROXY_VERSION_OVERRIDE_ANNOTATION).unwrap_or(&proxy.version).to_string();
        let init_version = match self.get(PROXY_VERSION_OVERRIDE_ANNOTATION) {
            Some(v) => v.to_string(),
            None => config.init_version().to_string(),
        };
        let r = &proxy.resources;
        Ok(ProxySettings {
            proxy_image: self.get(PROXY_IMAGE_ANNOTATION).unwrap_or(&proxy.image).to_string(),
            proxy_version,
            init_image: self.get(INIT_IMAGE_ANNOTATION).unwrap_or(&config.proxy_init.image).to_string(),
            init_version,
            uid,
            log_level: self.get(PROXY_LOG_LEVEL_ANNOTATION).unwrap_or(&proxy.log_level).to_string(),
            resources: ResourceSettings {
                cpu_request: self.quantity(PROXY_CPU_REQUEST_ANNOTATION, &r.cpu_request)?,
                cpu_limit: self.quantity(PROXY_CPU_LIMIT_ANNOTATION, &r.cpu_limit)?,
                memory_request: self.quantity(PROXY_MEMORY_REQUEST_ANNOTATION, &r.memory_request)?,
                memory_limit: self.quantity(PROXY_MEMORY_LIMIT_ANNOTATION, &r.memory_limit)?,
            },
            skip_inbound_ports: self.ports(SKIP_INBOUND_PORTS_ANNOTATION)?,
            skip_outbound_ports: self.ports(SKIP_OUTBOUND_PORTS_ANNOTATION)?,
        })
    }
}
