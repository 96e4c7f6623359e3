use crate::{
    core::{Kind, ResourceRef, Warnings},
    k8s::{
        ConfigMap, GlobalConfiguration, Ingress, ObjectReference, Policy, Resource, Secret,
        Service, TransportServer, VirtualServer, VirtualServerRoute,
    },
};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tokio::sync::mpsc::UnboundedReceiver;

const REASON: &str = "AddedOrUpdatedWithWarning";
const ACTION: &str = "Configure";

/// Publishes every warning as a Kubernetes event on the resource it concerns.
pub(crate) async fn publish(client: kube::Client, reporter: Reporter, mut rx: UnboundedReceiver<Warnings>) {
    let recorder = Recorder::new(client, reporter);
    while let Some(warnings) = rx.recv().await {
        for (r, msgs) in warnings {
            let reference = object_reference(&r);
            for msg in msgs {
                let event = Event {
                    type_: EventType::Warning,
                    reason: REASON.to_string(),
                    note: Some(msg),
                    action: ACTION.to_string(),
                    secondary: None,
                };
                if let Err(error) = recorder.publish(&event, &reference).await {
                    tracing::warn!(resource = %r, %error, "Failed to publish event");
                }
            }
        }
    }
    tracing::debug!("Event publisher stopped");
}

fn object_reference(r: &ResourceRef) -> ObjectReference {
    fn api_version<R: Resource<DynamicType = ()>>() -> String {
        R::api_version(&()).into_owned()
    }

    let api_version = match r.kind {
        Kind::Ingress => api_version::<Ingress>(),
        Kind::VirtualServer => api_version::<VirtualServer>(),
        Kind::VirtualServerRoute => api_version::<VirtualServerRoute>(),
        Kind::TransportServer => api_version::<TransportServer>(),
        Kind::GlobalConfiguration => api_version::<GlobalConfiguration>(),
        Kind::Policy => api_version::<Policy>(),
        Kind::Service => api_version::<Service>(),
        Kind::Secret => api_version::<Secret>(),
        Kind::ConfigMap => api_version::<ConfigMap>(),
    };
    ObjectReference {
        api_version: Some(api_version),
        kind: Some(r.kind.to_string()),
        namespace: Some(r.key.namespace.clone()),
        name: Some(r.key.name.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceKey;

    #[test]
    fn references_carry_the_api_group() {
        let r = ResourceRef::new(Kind::VirtualServer, ResourceKey::new("default", "cafe"));
        let reference = object_reference(&r);
        assert_eq!(reference.api_version.as_deref(), Some("k8s.nginx.org/v1"));
        assert_eq!(reference.kind.as_deref(), Some("VirtualServer"));
        assert_eq!(reference.namespace.as_deref(), Some("default"));

        let r = ResourceRef::new(Kind::Ingress, ResourceKey::new("default", "cafe"));
        assert_eq!(
            object_reference(&r).api_version.as_deref(),
            Some("networking.k8s.io/v1")
        );
    }
}
