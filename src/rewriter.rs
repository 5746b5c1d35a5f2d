use crate::annotations::{
    self, ContainerKind, LABEL_IMAGE_CACHING_POLICY_NAME, finalize_managed_annotation,
    record_rewrite,
};
use crate::decoder::AdmissionDecoder;
use crate::ignore_policy::IgnorePolicy;
use crate::image_reference::{ImageReference, ParseError};
use k8s_openapi::api::core::v1::{Container, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub proxy_port: u16,
    pub ignore_policy: IgnorePolicy,
}

/// Why a container image was left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("image cannot be parsed: {0}")]
    ParseFailed(#[from] ParseError),
    #[error("image contains a digest")]
    DigestPresent,
    #[error("image matches {0}")]
    IgnoreMatched(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RewriterError {
    #[error("admission decoder has not been injected")]
    DecoderNotInjected,
    #[error("admission decoder has already been injected")]
    DecoderAlreadyInjected,
}

#[derive(Debug)]
pub struct ImageRewriter {
    config: RewriteConfig,
    decoder: Option<AdmissionDecoder>,
}

impl ImageRewriter {
    /// Creates a rewriter that still needs a decoder before it can handle
    /// admission requests.
    pub fn new(config: RewriteConfig) -> Self {
        Self {
            config,
            decoder: None,
        }
    }

    pub fn inject_decoder(&mut self, decoder: AdmissionDecoder) -> Result<(), RewriterError> {
        if self.decoder.is_some() {
            return Err(RewriterError::DecoderAlreadyInjected);
        }
        self.decoder = Some(decoder);
        Ok(())
    }

    fn decoder(&self) -> Result<&AdmissionDecoder, RewriterError> {
        self.decoder.as_ref().ok_or(RewriterError::DecoderNotInjected)
    }

    pub fn handle(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let response = AdmissionResponse::from(request);

        let decoder = match self.decoder() {
            Ok(decoder) => decoder,
            Err(e) => {
                warn!("Cannot handle admission request {}: {}", request.uid, e);
                return response.deny(e);
            }
        };
        let original = match decoder.decode(request) {
            Ok(pod) => pod,
            Err(e) => {
                warn!("Failed to decode pod from admission request {}: {}", request.uid, e);
                return response.deny(e);
            }
        };

        let mut pod = original.clone();
        let perform_rewrite = should_rewrite(&pod);
        self.rewrite_images(&mut pod, perform_rewrite);

        let patch = match (serde_json::to_value(&original), serde_json::to_value(&pod)) {
            (Ok(before), Ok(after)) => json_patch::diff(&before, &after),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to serialize pod {}: {}", pod.name_any(), e);
                return response.deny(e.to_string());
            }
        };

        info!(
            "Admitted {:?} of pod {} in namespace {} (rewrite: {}, managed: {})",
            request.operation,
            pod.name_any(),
            request.namespace.as_deref().unwrap_or_default(),
            perform_rewrite,
            annotations::is_managed(&pod.metadata)
        );

        if patch.0.is_empty() {
            return response;
        }
        match response.clone().with_patch(patch) {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to attach patch for pod {}: {}", pod.name_any(), e);
                response.deny(e.to_string())
            }
        }
    }

    /// Routes eligible container images of `pod` through the caching proxy
    /// when `perform_rewrite` is set, then refreshes the pod-level rewrite
    /// annotation from the managed label.
    pub fn rewrite_images(&self, pod: &mut Pod, perform_rewrite: bool) {
        let Pod { metadata, spec, .. } = pod;

        if perform_rewrite {
            if let Some(spec) = spec.as_mut() {
                let init_containers = spec
                    .init_containers
                    .iter_mut()
                    .flatten()
                    .map(|container| (ContainerKind::Init, container));
                let containers = spec
                    .containers
                    .iter_mut()
                    .map(|container| (ContainerKind::Regular, container));

                for (kind, container) in init_containers.chain(containers) {
                    self.rewrite_container(metadata, container, kind);
                }
            }
        }

        finalize_managed_annotation(metadata);
    }

    fn rewrite_container(
        &self,
        metadata: &mut ObjectMeta,
        container: &mut Container,
        kind: ContainerKind,
    ) {
        let Some(image) = container.image.as_deref() else {
            debug!("Container {} has no image, skipping", container.name);
            return;
        };

        match self.check_rewritable(image) {
            Ok(reference) => {
                let original = reference.upstream().to_string();
                let rewritten = rewrite_reference(&reference, self.config.proxy_port);
                debug!(
                    "Rewriting image of container {} from {} to {} (upstream {})",
                    container.name, image, rewritten, original
                );
                container.image = Some(rewritten);
                record_rewrite(metadata, &container.name, kind, &original);
            }
            Err(rejection) => {
                debug!(
                    "Not rewriting image {} of container {}: {}",
                    image, container.name, rejection
                );
            }
        }
    }

    pub fn check_rewritable(&self, image: &str) -> Result<ImageReference, Rejection> {
        let reference = ImageReference::parse(image)?;
        if reference.has_digest() {
            return Err(Rejection::DigestPresent);
        }
        if let Some(pattern) = self.config.ignore_policy.matches(image) {
            return Err(Rejection::IgnoreMatched(pattern.to_string()));
        }
        Ok(reference)
    }
}

fn should_rewrite(pod: &Pod) -> bool {
    pod.labels()
        .get(LABEL_IMAGE_CACHING_POLICY_NAME)
        .is_none_or(|policy| policy != "ignore")
}

/// Builds the image pulled through the proxy listening on `localhost:<proxy_port>`.
///
/// The upstream registry becomes the first path segment, its port colon turned
/// into a hyphen. Images without a registry, or already pointing at localhost,
/// keep their bare path.
pub fn rewrite_reference(reference: &ImageReference, proxy_port: u16) -> String {
    let mut path = match (&reference.domain, reference.hostname()) {
        (Some(domain), Some(hostname)) if hostname != "localhost" => {
            format!("{}/{}", domain.replace(':', "-"), reference.path)
        }
        _ => reference.path.clone(),
    };
    if let Some(tag) = &reference.tag {
        path.push(':');
        path.push_str(tag);
    }
    format!("localhost:{}/{}", proxy_port, path)
}
