use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("admission request carries no object")]
    MissingObject,
    #[error("admission request object is a {0}, not a Pod")]
    WrongKind(String),
    #[error("admission request object is not a valid pod: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Turns the untyped object of an admission request into a [`Pod`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionDecoder;

impl AdmissionDecoder {
    pub fn new() -> Self {
        AdmissionDecoder
    }

    pub fn decode(&self, request: &AdmissionRequest<DynamicObject>) -> Result<Pod, DecodeError> {
        let object = request.object.as_ref().ok_or(DecodeError::MissingObject)?;
        if let Some(types) = &object.types {
            if types.kind != "Pod" {
                return Err(DecodeError::WrongKind(types.kind.clone()));
            }
        }
        let value = serde_json::to_value(object)?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kube::core::admission::AdmissionReview;
    use serde_json::{Value, json};

    pub(crate) fn admission_request(object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "name": "test-pod",
                "namespace": "default",
                "operation": "CREATE",
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": null,
                "dryRun": false,
                "options": null
            }
        }))
        .expect("admission review should deserialize");
        review.try_into().expect("review should carry a request")
    }

    #[test]
    fn test_decode_pod() {
        let request = admission_request(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "test-pod", "namespace": "default"},
            "spec": {"containers": [{"name": "b", "image": "original"}]}
        }));

        let pod = AdmissionDecoder::new().decode(&request).expect("pod should decode");

        assert_eq!(pod.metadata.name.as_deref(), Some("test-pod"));
        let spec = pod.spec.expect("pod has a spec");
        assert_eq!(spec.containers[0].image.as_deref(), Some("original"));
    }

    #[test]
    fn test_decode_rejects_other_kinds() {
        let request = admission_request(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "test-deployment"}
        }));

        let err = AdmissionDecoder::new().decode(&request).unwrap_err();
        assert!(matches!(err, DecodeError::WrongKind(kind) if kind == "Deployment"));
    }

    #[test]
    fn test_decode_malformed_pod() {
        let request = admission_request(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "test-pod"},
            "spec": {"containers": "not-a-list"}
        }));

        let err = AdmissionDecoder::new().decode(&request).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid(_)));
    }

    #[test]
    fn test_decode_missing_object() {
        let request = admission_request(Value::Null);

        let err = AdmissionDecoder::new().decode(&request).unwrap_err();
        assert!(matches!(err, DecodeError::MissingObject));
    }
}
