#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod global_configuration;
pub mod labels;
pub mod policy;
pub mod transport_server;
pub mod virtual_server;

pub use self::{
    global_configuration::{GlobalConfiguration, GlobalConfigurationSpec, Listener},
    labels::{Labels, Selector},
    policy::{Policy, PolicySpec},
    transport_server::{TransportServer, TransportServerSpec},
    virtual_server::{
        VirtualServer, VirtualServerRoute, VirtualServerRouteSpec, VirtualServerSpec,
    },
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            ConfigMap, Namespace, ObjectReference, Pod, Secret, Service, ServicePort, ServiceSpec,
        },
        discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::apis::meta::v1::OwnerReference,
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    Client, Resource,
};

/// The API group of the NGINX custom resources.
pub const API_GROUP: &str = "k8s.nginx.org";

/// Annotation selecting the ingress class of a legacy Ingress.
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Label linking an EndpointSlice to its Service.
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// The reserved listener name routing TLS connections by SNI.
pub const TLS_PASSTHROUGH_LISTENER_NAME: &str = "tls-passthrough";

/// Secret types understood by the resolver.
pub mod secret_type {
    pub const TLS: &str = "kubernetes.io/tls";
    pub const CA: &str = "nginx.org/ca";
    pub const JWK: &str = "nginx.org/jwk";
    pub const HTPASSWD: &str = "nginx.org/htpasswd";
    pub const OIDC: &str = "nginx.org/oidc";
}
