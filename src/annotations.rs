use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha224};

pub static DOMAIN: &str = "kuik.enix.io";
pub static LABEL_MANAGED_NAME: &str = "kuik.enix.io/managed";
pub static ANNOTATION_REWRITE_IMAGES_NAME: &str = "kuik.enix.io/rewrite-images";
pub static LABEL_IMAGE_CACHING_POLICY_NAME: &str = "kuik.enix.io/image-caching-policy";

// Kubernetes limit on the name segment of a qualified key
const MAX_KEY_NAME_LENGTH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Init,
    Regular,
}

impl ContainerKind {
    fn annotation_prefix(self) -> &'static str {
        match self {
            ContainerKind::Init => "original-init-image-",
            ContainerKind::Regular => "original-image-",
        }
    }
}

/// Annotation key holding the image a container had before it was rewritten.
///
/// Names too long to fit in a valid key are replaced by their SHA-224 hex
/// digest, truncated to the room left after the prefix.
pub fn container_annotation_key(container_name: &str, kind: ContainerKind) -> String {
    let prefix = kind.annotation_prefix();
    if prefix.len() + container_name.len() > MAX_KEY_NAME_LENGTH {
        let mut hashed = hex::encode(Sha224::digest(container_name.as_bytes()));
        hashed.truncate(MAX_KEY_NAME_LENGTH - prefix.len());
        format!("{}/{}{}", DOMAIN, prefix, hashed)
    } else {
        format!("{}/{}{}", DOMAIN, prefix, container_name)
    }
}

pub fn record_rewrite(
    metadata: &mut ObjectMeta,
    container_name: &str,
    kind: ContainerKind,
    original_image: &str,
) {
    metadata.annotations.get_or_insert_with(Default::default).insert(
        container_annotation_key(container_name, kind),
        original_image.to_string(),
    );
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(LABEL_MANAGED_NAME.to_string(), "true".to_string());
}

pub fn is_managed(metadata: &ObjectMeta) -> bool {
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(LABEL_MANAGED_NAME))
        .is_some_and(|value| value == "true")
}

/// Mirrors the managed label into the pod-level rewrite annotation.
pub fn finalize_managed_annotation(metadata: &mut ObjectMeta) {
    let managed = is_managed(metadata);
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(ANNOTATION_REWRITE_IMAGES_NAME.to_string(), managed.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_annotation_key() {
        assert_eq!(
            container_annotation_key("nginx", ContainerKind::Regular),
            "kuik.enix.io/original-image-nginx"
        );
        assert_eq!(
            container_annotation_key("nginx", ContainerKind::Init),
            "kuik.enix.io/original-init-image-nginx"
        );
    }

    #[test]
    fn test_container_annotation_key_long_name_is_hashed() {
        let name = "a".repeat(50);
        let key = container_annotation_key(&name, ContainerKind::Init);
        let expected = hex::encode(Sha224::digest(name.as_bytes()));
        assert_eq!(
            key,
            format!("kuik.enix.io/original-init-image-{}", &expected[..43])
        );
        assert_eq!(key.len() - DOMAIN.len() - 1, MAX_KEY_NAME_LENGTH);

        // Fits for a regular container but not for an init container
        let name = "b".repeat(45);
        assert!(container_annotation_key(&name, ContainerKind::Regular).ends_with(&name));
        assert!(!container_annotation_key(&name, ContainerKind::Init).ends_with(&name));
    }

    #[test]
    fn test_record_rewrite_sets_label_and_annotation() {
        let mut metadata = ObjectMeta::default();
        assert!(!is_managed(&metadata));

        record_rewrite(&mut metadata, "b", ContainerKind::Regular, "original");

        assert!(is_managed(&metadata));
        let annotations = metadata.annotations.as_ref().expect("annotations set");
        assert_eq!(
            annotations.get("kuik.enix.io/original-image-b").map(String::as_str),
            Some("original")
        );
    }

    #[test]
    fn test_finalize_managed_annotation_reflects_label() {
        let mut metadata = ObjectMeta::default();
        finalize_managed_annotation(&mut metadata);
        assert_eq!(
            metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_REWRITE_IMAGES_NAME)),
            Some(&"false".to_string())
        );

        record_rewrite(&mut metadata, "a", ContainerKind::Init, "original-init");
        finalize_managed_annotation(&mut metadata);
        assert_eq!(
            metadata.annotations.as_ref().and_then(|a| a.get(ANNOTATION_REWRITE_IMAGES_NAME)),
            Some(&"true".to_string())
        );
    }
}
