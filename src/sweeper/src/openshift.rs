use crate::image_index::{ClusterError, ClusterImageLister, ImageRecord};
use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};

const IMAGE_GROUP: &str = "image.openshift.io";
const IMAGE_VERSION: &str = "v1";
const IMAGE_KIND: &str = "Image";

/// Lists cluster-scoped OpenShift `Image` objects.
///
/// An image's `metadata.name` is its manifest digest.
#[derive(Clone)]
pub struct OpenShiftImageLister {
    api: Api<DynamicObject>,
    page_size: u32,
}

impl OpenShiftImageLister {
    pub fn new(client: Client, page_size: u32) -> Self {
        let gvk = GroupVersionKind::gvk(IMAGE_GROUP, IMAGE_VERSION, IMAGE_KIND);
        let resource = ApiResource::from_gvk(&gvk);
        Self {
            api: Api::all_with(client, &resource),
            page_size: page_size.max(1),
        }
    }
}

#[async_trait]
impl ClusterImageLister for OpenShiftImageLister {
    async fn list_images(&self) -> Result<Vec<ImageRecord>, ClusterError> {
        let mut records = Vec::new();
        let mut continue_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params = ListParams::default().limit(self.page_size);
            if let Some(token) = &continue_token {
                params = params.continue_token(token);
            }

            let list = self.api.list(&params).await?;
            pages += 1;
            records.extend(list.items.iter().filter_map(image_record));

            tracing::debug!(page = pages, images = records.len(), "Listed cluster images");

            match list.metadata.continue_ {
                Some(token) if !token.is_empty() => continue_token = Some(token),
                _ => break,
            }
        }

        Ok(records)
    }
}

/// Nameless objects are skipped; a missing reference maps to an empty string.
fn image_record(object: &DynamicObject) -> Option<ImageRecord> {
    let digest = object.metadata.name.clone()?;
    let reference = object
        .data
        .get("dockerImageReference")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    Some(ImageRecord::new(digest, reference))
}
