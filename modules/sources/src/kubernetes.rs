//! Orchestrator: externally reachable Kubernetes service ports.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use svcscan_core::{Candidate, Protocol, ScanError};

use crate::command::run_command;
use crate::Enumerator;

#[derive(Debug, Deserialize)]
struct ServiceList {
    #[serde(default)]
    items: Vec<Service>,
}

#[derive(Debug, Deserialize)]
struct Service {
    metadata: Metadata,
    spec: Spec,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Spec {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    node_port: Option<u16>,
}

/// Candidates from `kubectl get services --all-namespaces -o json`. Only
/// NodePort and LoadBalancer services are reachable from the node; ClusterIP
/// and headless services are ignored, as are load balancer ports allocated
/// without a node port.
pub fn parse_services(json: &str) -> Result<Vec<Candidate>, ScanError> {
    let list: ServiceList = serde_json::from_str(json).map_err(|e| ScanError::Parse(format!("kubectl output: {e}")))?;
    let mut out = Vec::new();
    for svc in list.items {
        let external = matches!(svc.spec.kind.as_str(), "NodePort" | "LoadBalancer");
        if !external {
            continue;
        }
        for p in &svc.spec.ports {
            // the service port lives on the load balancer, not on this node
            let Some(port) = p.node_port.filter(|np| *np != 0) else { continue };
            let protocol = p.protocol.as_deref().and_then(|s| s.parse().ok()).unwrap_or(Protocol::Tcp);
            let name = match p.name.as_deref().filter(|n| !n.is_empty()) {
                Some(pn) => format!("{}-{}", svc.metadata.name, pn),
                None => svc.metadata.name.clone(),
            };
            let note = format!("desc=k8s {} {}/{}", svc.spec.kind, svc.metadata.namespace, svc.metadata.name);
            out.push(Candidate::new(name, protocol, port, "kubernetes").with_note(note));
        }
    }
    Ok(out)
}

pub struct KubernetesEnumerator {
    limit: Duration,
}

impl KubernetesEnumerator {
    pub fn new(limit: Duration) -> Self {
        KubernetesEnumerator { limit }
    }
}

#[async_trait]
impl Enumerator for KubernetesEnumerator {
    fn name(&self) -> &'static str { "kubernetes" }

    async fn enumerate(&self) -> Result<Vec<Candidate>> {
        let json = run_command("kubectl", &["get", "services", "--all-namespaces", "-o", "json"], self.limit).await?;
        Ok(parse_services(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
  "apiVersion": "v1",
  "items": [
    {"metadata": {"name": "kubernetes", "namespace": "default"},
     "spec": {"type": "ClusterIP", "ports": [{"name": "https", "port": 443, "protocol": "TCP", "targetPort": 6443}]}},
    {"metadata": {"name": "grafana", "namespace": "monitoring"},
     "spec": {"type": "NodePort", "ports": [{"port": 80, "nodePort": 30080, "protocol": "TCP", "targetPort": 3000}]}},
    {"metadata": {"name": "ingress", "namespace": "ingress-nginx"},
     "spec": {"type": "LoadBalancer", "ports": [
        {"name": "http", "port": 80, "nodePort": 31080, "protocol": "TCP"},
        {"name": "dns", "port": 53, "protocol": "UDP"}]}}
  ],
  "kind": "List"
}"#;

    #[test]
    fn only_external_service_types() {
        let c = parse_services(SAMPLE).unwrap();
        let ports: Vec<_> = c.iter().map(|c| (c.service_name.as_str(), c.protocol, c.port)).collect();
        assert_eq!(
            ports,
            vec![
                ("grafana", Protocol::Tcp, 30080),
                ("ingress-http", Protocol::Tcp, 31080),
            ]
        );
        assert_eq!(c[0].note.as_deref(), Some("desc=k8s NodePort monitoring/grafana"));
    }

    #[test]
    fn load_balancer_port_without_node_port_is_skipped() {
        let json = r#"{"items": [{"metadata": {"name": "edge", "namespace": "prod"},
            "spec": {"type": "LoadBalancer", "allocateLoadBalancerNodePorts": false,
                     "ports": [{"name": "https", "port": 443, "protocol": "TCP"}]}}]}"#;
        assert!(parse_services(json).unwrap().is_empty());
    }

    #[test]
    fn malformed_output_is_a_parse_error() {
        assert!(matches!(parse_services("not json"), Err(ScanError::Parse(_))));
    }
}
