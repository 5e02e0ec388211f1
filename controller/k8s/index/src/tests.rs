use crate::{ConfigStore, Enqueue, RelationshipIndex, SharedStore};
use meshlb_core::{
    config::{EndpointAddr, EndpointPortInfo, EndpointSubsetInfo, EndpointsInfo, PodInfo},
    config::{ServiceInfo, ServicePortInfo, TargetPort},
    ConfigObject, ObjectKey, Payload,
};
use meshlb_k8s_api::{
    labels::Selector,
    networking::{
        Destination, GatewaySpec, HttpRoute, HttpRouteDestination, Port, Protocol, Server,
        VirtualServiceSpec,
    },
    Labels,
};
use parking_lot::Mutex;
use std::sync::Arc;


#[derive(Clone, Debug, Default)]
struct Recorded(Arc<Mutex<Vec<ObjectKey>>>);

impl Enqueue for Recorded {
    fn enqueue(&self, key: ObjectKey) {
        self.0.lock().push(key);
    }
}

impl Recorded {
    fn take(&self) -> Vec<String> {
        let mut keys = std::mem::take(&mut *self.0.lock())
            .into_iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }
}

fn mk_store() -> SharedStore {
    ConfigStore::shared(Arc::new(RelationshipIndex::default()))
}

fn mk_gateway(ns: &str, name: &str, version: &str) -> ConfigObject {
    ConfigObject::new(
        ns,
        name,
        version,
        Payload::Gateway(GatewaySpec {
            servers: vec![Server {
                port: Port {
                    number: 80,
                    name: Some("http".into()),
                    protocol: Protocol::Http,
                },
                hosts: vec!["*.example.com".into()],
                tls: None,
                name: None,
            }],
            ..Default::default()
        }),
    )
}

fn mk_vs(
    ns: &str,
    name: &str,
    version: &str,
    gateways: &[&str],
    hosts: &[&str],
) -> ConfigObject {
    ConfigObject::new(
        ns,
        name,
        version,
        Payload::VirtualService(VirtualServiceSpec {
            hosts: vec!["foo.example.com".into()],
            gateways: gateways.iter().map(|g| g.to_string()).collect(),
            http: vec![HttpRoute {
                route: hosts
                    .iter()
                    .map(|h| HttpRouteDestination {
                        destination: Destination {
                            host: h.to_string(),
                            subset: None,
                            port: None,
                        },
                        weight: Some(100),
                    })
                    .collect(),
                ..Default::default()
            }],
        }),
    )
}

fn mk_svc(
    ns: &str,
    name: &str,
    version: &str,
    selector: &[(&'static str, &'static str)],
) -> ConfigObject {
    ConfigObject::new(
        ns,
        name,
        version,
        Payload::Service(ServiceInfo {
            ports: vec![ServicePortInfo {
                name: None,
                port: 80,
                target_port: TargetPort::Number(8080),
            }],
            selector: selector.iter().copied().collect::<Selector>(),
        }),
    )
}

fn mk_endpoints(ns: &str, name: &str, version: &str, ip: &str) -> ConfigObject {
    ConfigObject::new(
        ns,
        name,
        version,
        Payload::Endpoints(EndpointsInfo {
            subsets: vec![EndpointSubsetInfo {
                addresses: vec![EndpointAddr {
                    ip: ip.parse().unwrap(),
                    pod: None,
                }],
                ports: vec![EndpointPortInfo {
                    name: None,
                    port: 8080,
                }],
            }],
        }),
    )
}

fn mk_pod(
    ns: &str,
    name: &str,
    version: &str,
    labels: &[(&'static str, &'static str)],
) -> ConfigObject {
    ConfigObject::new(
        ns,
        name,
        version,
        Payload::Pod(PodInfo {
            ip: Some("10.0.0.1".parse().unwrap()),
        }),
    )
    .with_labels(labels.iter().copied().collect::<Labels>())
}
