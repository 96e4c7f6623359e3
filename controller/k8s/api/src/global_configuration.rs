/// Declares the stream listeners that TransportServers may bind to.
#[derive(
    Clone,
    Debug,
    Default,
    kube::CustomResource,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "k8s.nginx.org",
    version = "v1",
    kind = "GlobalConfiguration",
    shortname = "gc",
    namespaced,
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfigurationSpec {
    #[serde(default)]
    pub listeners: Vec<Listener>,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
pub struct Listener {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

impl GlobalConfigurationSpec {
    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.name == name)
    }
}
