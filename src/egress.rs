/// Egress rotation through an external proxy controller.
///
/// Archive traffic leaves through a local proxy whose active outbound node
/// is chosen on a selector group. The controller exposes a small REST API:
///
/// - `GET /version`: liveness, answers 200 (or 401 when a secret is set)
/// - `GET /proxies`: every group and node, `{"proxies": {name: {type, all, now}}}`
/// - `PUT /proxies/{group}` with `{"name": node}`: switch the group's active node (204)
///
/// The node set is discovered once at startup and treated as static for the
/// run. On a confirmed quota failure the fetch loop asks for `rotate()`,
/// which picks a random untried node and switches to it; `verify()` checks
/// the public identity seen through the new path, for the log only.

use crate::config::EgressConfig;
use crate::ingest::build_http_client;
use crate::model::EgressNode;
use crate::pipeline::Sleeper;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Pseudo-nodes that never represent a real alternate path.
const RESERVED_NAMES: [&str; 8] = [
    "direct",
    "reject",
    "reject-drop",
    "pass",
    "compatible",
    "global",
    "auto-select",
    "auto",
];

/// Member types that are themselves groups rather than nodes.
const GROUP_TYPES: [&str; 5] = ["selector", "urltest", "fallback", "loadbalance", "relay"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EgressError {
    #[error("proxy controller not reachable on {host} (ports {ports:?})")]
    ControllerUnavailable { host: String, ports: Vec<u16> },

    #[error("proxy controller at {0} rejected the credentials (check the secret)")]
    ControllerUnauthorized(String),

    #[error("proxy group '{0}' not found on controller")]
    GroupNotFound(String),

    #[error("proxy group '{0}' has no usable nodes")]
    NoNodes(String),

    #[error("switching to node '{node}' failed: {message}")]
    RotationFailed { node: String, message: String },

    #[error("egress rotation is disabled")]
    Disabled,

    #[error("proxy controller request failed: {0}")]
    Http(String),
}

// ---------------------------------------------------------------------------
// Rotator seam
// ---------------------------------------------------------------------------

/// What the fetch loop needs from egress control.
pub trait EgressRotator {
    /// False when rotation has been disabled for this run.
    fn is_enabled(&self) -> bool;

    /// Switches to a different node and reports which one.
    fn rotate(&mut self) -> Result<EgressNode, EgressError>;

    /// Public identity seen through the current path, if it could be checked.
    /// Waits between attempts go through `sleeper`.
    fn verify(&mut self, sleeper: &mut dyn Sleeper) -> Option<String>;

    /// Turns rotation off for the rest of the run.
    fn disable(&mut self);
}

/// Egress control for one run: either a discovered controller, or nothing
/// (discovery failed or was switched off), in which case every rotation
/// request fails with `EgressError::Disabled`.
pub enum Egress {
    Active(ProxyController),
    Disabled,
}

impl Egress {
    /// Locates the controller and discovers its nodes. Failures are logged
    /// and degrade to `Egress::Disabled` for the rest of the run.
    pub fn discover(config: &EgressConfig, proxy_url: Option<&str>) -> Self {
        if !config.enabled {
            info!("egress rotation disabled by configuration");
            return Egress::Disabled;
        }

        match ProxyController::discover(config, proxy_url) {
            Ok(controller) => {
                info!(
                    controller = %controller.base_url(),
                    group = %config.group,
                    nodes = controller.nodes().len(),
                    "egress controller ready"
                );
                Egress::Active(controller)
            }
            Err(e) => {
                warn!(error = %e, "egress discovery failed; quota errors will only back off");
                Egress::Disabled
            }
        }
    }
}

impl EgressRotator for Egress {
    fn is_enabled(&self) -> bool {
        matches!(self, Egress::Active(_))
    }

    fn rotate(&mut self) -> Result<EgressNode, EgressError> {
        match self {
            Egress::Active(controller) => controller.rotate(),
            Egress::Disabled => Err(EgressError::Disabled),
        }
    }

    fn verify(&mut self, sleeper: &mut dyn Sleeper) -> Option<String> {
        match self {
            Egress::Active(controller) => controller.verify(sleeper),
            Egress::Disabled => None,
        }
    }

    fn disable(&mut self) {
        if let Egress::Active(controller) = self {
            warn!(controller = %controller.base_url(), "egress rotation disabled for the rest of the run");
        }
        *self = Egress::Disabled;
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProxiesResponse {
    proxies: HashMap<String, ProxyEntry>,
}

#[derive(Debug, Deserialize)]
struct ProxyEntry {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    all: Vec<String>,
}

/// True for control pseudo-nodes and for the group's own name.
pub fn is_reserved_name(name: &str, group: &str) -> bool {
    let lower = name.trim().to_ascii_lowercase();
    lower.is_empty() || lower == group.trim().to_ascii_lowercase() || RESERVED_NAMES.contains(&lower.as_str())
}

/// Drops reserved names and duplicates, keeping first-seen order.
pub fn usable_nodes<I, S>(group: &str, names: I) -> Vec<EgressNode>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter_map(|name| {
            let name = name.as_ref();
            if is_reserved_name(name, group) || !seen.insert(name.to_string()) {
                None
            } else {
                Some(EgressNode::new(name))
            }
        })
        .collect()
}

fn group_members(group: &str, body: &str) -> Result<Vec<EgressNode>, EgressError> {
    let response: ProxiesResponse = serde_json::from_str(body)
        .map_err(|e| EgressError::Http(format!("unexpected /proxies payload: {}", e)))?;

    let entry = response
        .proxies
        .get(group)
        .ok_or_else(|| EgressError::GroupNotFound(group.to_string()))?;

    let is_group = |name: &str| {
        response
            .proxies
            .get(name)
            .map(|p| GROUP_TYPES.contains(&p.kind.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    };

    let nodes = usable_nodes(group, entry.all.iter().filter(|name| !is_group(name.as_str())));
    if nodes.is_empty() {
        return Err(EgressError::NoNodes(group.to_string()));
    }
    Ok(nodes)
}

fn controller_client(timeout: Duration) -> Result<Client, EgressError> {
    Client::builder()
        .timeout(timeout)
        .no_proxy()
        .build()
        .map_err(|e| EgressError::Http(e.to_string()))
}

/// Probes `GET /version` on each candidate port and returns the base URL of
/// the first one that answers 200 or 401.
pub fn probe_controller(host: &str, ports: &[u16], timeout: Duration) -> Result<String, EgressError> {
    let client = controller_client(timeout)?;

    for port in ports {
        let base_url = format!("http://{}:{}", host, port);
        match client.get(format!("{}/version", base_url)).send() {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(port, status, "probed controller port");
                if status == 200 || status == 401 {
                    return Ok(base_url);
                }
            }
            Err(e) => debug!(port, error = %e, "controller port not answering"),
        }
    }

    Err(EgressError::ControllerUnavailable {
        host: host.to_string(),
        ports: ports.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

struct Verifier {
    http: Client,
    url: String,
    attempts: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct IdentityBody {
    ip: String,
}

/// Controller client with its discovered, static node set.
pub struct ProxyController {
    http: Client,
    base_url: String,
    group: String,
    secret: Option<String>,
    nodes: Vec<EgressNode>,
    tried: HashSet<EgressNode>,
    current: Option<EgressNode>,
    rng: StdRng,
    verifier: Option<Verifier>,
}

impl ProxyController {
    /// Probes the candidate ports, then lists the group's nodes.
    pub fn discover(config: &EgressConfig, proxy_url: Option<&str>) -> Result<Self, EgressError> {
        let base_url = probe_controller(&config.host, &config.candidate_ports, config.probe_timeout())?;
        Self::connect(&base_url, config, proxy_url)
    }

    /// Lists the group's nodes on a known controller URL.
    pub fn connect(base_url: &str, config: &EgressConfig, proxy_url: Option<&str>) -> Result<Self, EgressError> {
        let http = controller_client(Duration::from_secs(10))?;

        let verifier = build_http_client(Duration::from_secs(10), proxy_url)
            .map(|http| Verifier {
                http,
                url: config.verify_url.clone(),
                attempts: config.verify_attempts,
                retry_delay: Duration::from_secs(config.verify_retry_secs),
            })
            .map_err(|e| warn!(error = %e, "identity check client unavailable"))
            .ok();

        let mut controller = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            group: config.group.clone(),
            secret: config.secret.clone().filter(|s| !s.is_empty()),
            nodes: Vec::new(),
            tried: HashSet::new(),
            current: None,
            rng: StdRng::from_entropy(),
            verifier,
        };
        controller.nodes = controller.list_nodes()?;
        Ok(controller)
    }

    /// Replaces the random source, for reproducible selection.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn nodes(&self) -> &[EgressNode] {
        &self.nodes
    }

    pub fn current(&self) -> Option<&EgressNode> {
        self.current.as_ref()
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.secret {
            Some(secret) => request.bearer_auth(secret),
            None => request,
        }
    }

    fn list_nodes(&self) -> Result<Vec<EgressNode>, EgressError> {
        let response = self
            .authorized(self.http.get(format!("{}/proxies", self.base_url)))
            .send()
            .map_err(|e| EgressError::Http(e.to_string()))?;

        match response.status().as_u16() {
            401 => return Err(EgressError::ControllerUnauthorized(self.base_url.clone())),
            s if !(200..300).contains(&s) => {
                return Err(EgressError::Http(format!("GET /proxies returned {}", s)));
            }
            _ => {}
        }

        let body = response.text().map_err(|e| EgressError::Http(e.to_string()))?;
        group_members(&self.group, &body)
    }

    /// Uniform random pick among nodes not yet tried this run. Once every
    /// node has been tried the history resets, avoiding the node in use
    /// when there is an alternative.
    fn choose_node(&mut self) -> Option<EgressNode> {
        let len = self.nodes.len();
        let fresh: Vec<usize> = (0..len)
            .filter(|&i| !self.tried.contains(&self.nodes[i]))
            .collect();

        let pool = if fresh.is_empty() {
            self.tried.clear();
            (0..len)
                .filter(|&i| len == 1 || Some(&self.nodes[i]) != self.current.as_ref())
                .collect()
        } else {
            fresh
        };

        let &i = pool.choose(&mut self.rng)?;
        let node = self.nodes[i].clone();
        self.tried.insert(node.clone());
        Some(node)
    }

    fn switch_to(&self, node: &EgressNode) -> Result<(), EgressError> {
        let url = format!("{}/proxies/{}", self.base_url, urlencoding::encode(&self.group));
        let response = self
            .authorized(self.http.put(&url))
            .json(&serde_json::json!({ "name": node.name }))
            .send()
            .map_err(|e| EgressError::RotationFailed {
                node: node.name.clone(),
                message: e.to_string(),
            })?;

        match response.status().as_u16() {
            200 | 204 => Ok(()),
            401 => Err(EgressError::ControllerUnauthorized(self.base_url.clone())),
            status => Err(EgressError::RotationFailed {
                node: node.name.clone(),
                message: format!("controller answered {}", status),
            }),
        }
    }

    pub fn rotate(&mut self) -> Result<EgressNode, EgressError> {
        let node = self
            .choose_node()
            .ok_or_else(|| EgressError::NoNodes(self.group.clone()))?;

        self.switch_to(&node)?;
        info!(node = %node, group = %self.group, "egress switched");
        self.current = Some(node.clone());
        Ok(node)
    }

    pub fn verify(&mut self, sleeper: &mut dyn Sleeper) -> Option<String> {
        let verifier = self.verifier.as_ref()?;

        for attempt in 1..=verifier.attempts {
            let result = verifier
                .http
                .get(&verifier.url)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.text());

            match result {
                Ok(body) => {
                    let identity = serde_json::from_str::<IdentityBody>(&body)
                        .map(|b| b.ip)
                        .unwrap_or_else(|_| body.trim().to_string());
                    info!(identity = %identity, node = ?self.current.as_ref().map(|n| &n.name), "egress verified");
                    return Some(identity);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "egress identity check failed");
                    if attempt < verifier.attempts {
                        sleeper.sleep(verifier.retry_delay);
                    }
                }
            }
        }
        None
    }
}
