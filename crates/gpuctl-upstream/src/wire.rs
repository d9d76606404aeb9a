//! Raw upstream JSON shapes and the normalization rules from spec §4.2:
//! `clusterName` -> region, `gpuNum` string -> u32, Unix seconds -> ISO-8601,
//! ports grouped by type -> flattened `[{port, type}]`.

use chrono::{DateTime, TimeZone, Utc};
use gpuctl_proto::{Availability, EnvVar, PortKind, PortMapping, Product};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawProductsResponse {
    pub data: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
pub struct RawProduct {
    pub id: String,
    pub name: String,
    #[serde(rename = "availableDeploy")]
    pub available_deploy: bool,
    pub price: f64,
    #[serde(rename = "spotPrice")]
    pub spot_price: f64,
    pub regions: Vec<String>,
    #[serde(default, rename = "gpuType")]
    pub gpu_type: Option<String>,
    #[serde(default, rename = "gpuMemory")]
    pub gpu_memory: Option<u32>,
}

pub fn normalize_product(raw: RawProduct, region: &str) -> Product {
    Product {
        id: raw.id,
        name: raw.name,
        region: region.to_string(),
        spot_price: raw.spot_price,
        on_demand_price: raw.price,
        gpu_type: raw.gpu_type.unwrap_or_default(),
        gpu_memory: raw.gpu_memory.unwrap_or(0),
        availability: if raw.available_deploy {
            Availability::Available
        } else {
            Availability::Unavailable
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct RawTemplateResponse {
    pub template: RawTemplate,
}

#[derive(Debug, Deserialize)]
pub struct RawTemplate {
    #[serde(rename = "Id")]
    pub id: String,
    pub name: String,
    pub image: String,
    #[serde(default, rename = "imageAuth")]
    pub image_auth: Option<String>,
    pub ports: Vec<RawPortGroup>,
    pub envs: Vec<RawEnv>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawPortGroup {
    #[serde(rename = "type")]
    pub kind: String,
    pub ports: Vec<u16>,
}

#[derive(Debug, Deserialize)]
pub struct RawEnv {
    pub key: String,
    pub value: String,
}

/// Flattens grouped ports (`[{type, ports:[int]}]`) into `[{port, type}]`
/// (spec §4.2). The endpoint URL is synthesized as `http://localhost:<port>`
/// for `http`/`https` ports and left empty for `tcp`/`udp`, matching how the
/// upstream template endpoint never carries a resolvable host.
pub fn flatten_ports(groups: Vec<RawPortGroup>) -> Vec<PortMapping> {
    groups
        .into_iter()
        .flat_map(|group| {
            let kind = parse_port_kind(&group.kind);
            group.ports.into_iter().map(move |port| PortMapping {
                port,
                endpoint: match kind {
                    PortKind::Http => format!("http://localhost:{port}"),
                    PortKind::Https => format!("https://localhost:{port}"),
                    PortKind::Tcp | PortKind::Udp => String::new(),
                },
                kind,
            })
        })
        .collect()
}

pub fn parse_port_kind(raw: &str) -> PortKind {
    match raw.to_ascii_lowercase().as_str() {
        "https" => PortKind::Https,
        "tcp" => PortKind::Tcp,
        "udp" => PortKind::Udp,
        _ => PortKind::Http,
    }
}

pub fn normalize_envs(raw: Vec<RawEnv>) -> Vec<EnvVar> {
    raw.into_iter().map(|e| EnvVar { key: e.key, value: e.value }).collect()
}

#[derive(Debug, Deserialize)]
pub struct RawRegistryAuthResponse {
    pub data: Vec<RawRegistryAuth>,
}

#[derive(Debug, Deserialize)]
pub struct RawRegistryAuth {
    pub id: String,
    pub username: String,
    pub password: String,
}

/// Upstream raw instance record, as returned by
/// `GET /v1/gpu/instance?instanceId=<id>` and the list endpoint.
#[derive(Debug, Deserialize)]
pub struct RawInstance {
    pub id: String,
    pub status: String,
    #[serde(rename = "clusterName")]
    pub cluster_name: String,
    #[serde(rename = "gpuNum")]
    pub gpu_num: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(default, rename = "portMappings")]
    pub port_mappings: Vec<RawPortMapping>,
    #[serde(default, rename = "spotStatus")]
    pub spot_status: Option<String>,
    #[serde(default, rename = "spotReclaimTime")]
    pub spot_reclaim_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawPortMapping {
    pub port: u16,
    pub endpoint: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone)]
pub struct NormalizedInstance {
    pub novita_id: String,
    pub status: String,
    pub region: String,
    pub gpu_num: u32,
    pub created_at: DateTime<Utc>,
    pub port_mappings: Vec<PortMapping>,
    pub spot_status: Option<String>,
    pub spot_reclaim_time: Option<String>,
}

impl NormalizedInstance {
    /// Eligibility rule from spec §4.9: `status=exited` AND `spotStatus`
    /// non-empty AND `spotReclaimTime != "0"`.
    pub fn migration_eligible(&self) -> bool {
        self.status == "exited"
            && self.spot_status.as_deref().is_some_and(|s| !s.is_empty())
            && self.spot_reclaim_time.as_deref().is_some_and(|t| t != "0")
    }
}

pub fn normalize_instance(raw: RawInstance) -> NormalizedInstance {
    let gpu_num: u32 = raw.gpu_num.parse().unwrap_or(0);
    let created_at = Utc.timestamp_opt(raw.created_at, 0).single().unwrap_or_else(Utc::now);
    let port_mappings = raw
        .port_mappings
        .into_iter()
        .map(|p| PortMapping {
            port: p.port,
            endpoint: p.endpoint,
            kind: parse_port_kind(&p.kind),
        })
        .collect();
    NormalizedInstance {
        novita_id: raw.id,
        status: raw.status,
        region: raw.cluster_name,
        gpu_num,
        created_at,
        port_mappings,
        spot_status: raw.spot_status,
        spot_reclaim_time: raw.spot_reclaim_time,
    }
}

#[derive(Debug, Deserialize)]
pub struct RawListInstancesResponse {
    pub data: Vec<RawInstance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_ports_produces_one_entry_per_port() {
        let groups = vec![
            RawPortGroup { kind: "http".into(), ports: vec![8080, 8081] },
            RawPortGroup { kind: "tcp".into(), ports: vec![22] },
        ];
        let flattened = flatten_ports(groups);
        assert_eq!(flattened.len(), 3);
        assert_eq!(flattened[0].port, 8080);
        assert_eq!(flattened[0].kind, PortKind::Http);
        assert_eq!(flattened[2].kind, PortKind::Tcp);
        assert_eq!(flattened[2].endpoint, "");
    }

    #[test]
    fn normalize_instance_parses_gpu_num_and_unix_seconds() {
        let raw = RawInstance {
            id: "novita_789".into(),
            status: "running".into(),
            cluster_name: "CN-HK-01".into(),
            gpu_num: "2".into(),
            created_at: 1_640_995_200,
            port_mappings: vec![],
            spot_status: None,
            spot_reclaim_time: None,
        };
        let normalized = normalize_instance(raw);
        assert_eq!(normalized.region, "CN-HK-01");
        assert_eq!(normalized.gpu_num, 2);
        assert_eq!(normalized.created_at.to_rfc3339(), "2022-01-01T00:00:00+00:00");
    }

    #[test]
    fn migration_eligibility_matches_spec_scenario_6() {
        let running = NormalizedInstance {
            novita_id: "a".into(),
            status: "running".into(),
            region: "CN-HK-01".into(),
            gpu_num: 1,
            created_at: Utc::now(),
            port_mappings: vec![],
            spot_status: None,
            spot_reclaim_time: None,
        };
        let exited_not_reclaimed = NormalizedInstance {
            status: "exited".into(),
            spot_status: Some(String::new()),
            spot_reclaim_time: Some("0".into()),
            ..running.clone_with_id("b")
        };
        let exited_reclaimed = NormalizedInstance {
            status: "exited".into(),
            spot_status: Some("reclaimed".into()),
            spot_reclaim_time: Some("1640995200".into()),
            ..running.clone_with_id("c")
        };
        assert!(!running.migration_eligible());
        assert!(!exited_not_reclaimed.migration_eligible());
        assert!(exited_reclaimed.migration_eligible());
    }

    impl NormalizedInstance {
        fn clone_with_id(&self, id: &str) -> Self {
            let mut clone = self.clone();
            clone.novita_id = id.to_string();
            clone
        }
    }
}
