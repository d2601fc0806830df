//! Layer-order reconstruction from parent links.

use std::collections::{HashMap, HashSet};

use burrow_common::constants::MAX_IMAGE_LAYERS;
use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;

use crate::catalog::ImageEntry;

/// Orders an image's layers bottom to top by walking parent links down
/// from the single layer no other layer names as its parent.
///
/// # Errors
///
/// Returns `BurrowError::CorruptImage` if the links form a cycle, name a
/// layer outside the image, leave layers unreachable, or the image has
/// more than [`MAX_IMAGE_LAYERS`] layers.
pub fn order_layers(image: &ImageEntry) -> Result<Vec<Digest>> {
    let corrupt = |message: String| BurrowError::CorruptImage {
        image: image.reference(),
        message,
    };

    if image.layers.is_empty() {
        return Ok(Vec::new());
    }
    if image.layers.len() > MAX_IMAGE_LAYERS {
        return Err(corrupt(format!(
            "{} layers exceeds the limit of {MAX_IMAGE_LAYERS}",
            image.layers.len()
        )));
    }

    let mut parents: HashMap<&Digest, Option<&Digest>> = HashMap::new();
    for layer in &image.layers {
        if parents.insert(&layer.digest, layer.parent.as_ref()).is_some() {
            return Err(corrupt(format!("layer {} listed twice", layer.digest)));
        }
    }

    let referenced: HashSet<&Digest> = parents.values().filter_map(|p| *p).collect();
    let mut tops = image
        .layers
        .iter()
        .map(|l| &l.digest)
        .filter(|d| !referenced.contains(d));
    let top = tops
        .next()
        .ok_or_else(|| corrupt("no top layer, parent links form a cycle".into()))?;
    if let Some(other) = tops.next() {
        return Err(corrupt(format!("two top layers: {top} and {other}")));
    }

    let mut order = Vec::with_capacity(image.layers.len());
    let mut seen = HashSet::new();
    let mut current = Some(top);
    while let Some(digest) = current {
        if !seen.insert(digest) {
            return Err(corrupt(format!("parent links loop back to {digest}")));
        }
        order.push(digest.clone());
        current = match parents.get(digest) {
            Some(parent) => *parent,
            None => return Err(corrupt(format!("parent {digest} is not a layer of the image"))),
        };
    }

    if order.len() != image.layers.len() {
        return Err(corrupt(format!(
            "{} of {} layers reachable from the top layer",
            order.len(),
            image.layers.len()
        )));
    }
    order.reverse();
    Ok(order)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::catalog::{ImageMetadata, LayerRef, chain_layers};
    use crate::hash::hash_bytes;

    fn image(layers: Vec<LayerRef>) -> ImageEntry {
        ImageEntry {
            name: "img".into(),
            tag: "v1".into(),
            layers,
            metadata: ImageMetadata::default(),
            source: "test".into(),
            created_at: Utc::now(),
        }
    }

    fn layer(digest: &Digest, parent: Option<&Digest>) -> LayerRef {
        LayerRef {
            digest: digest.clone(),
            parent: parent.cloned(),
            size_bytes: 0,
        }
    }

    #[test]
    fn order_follows_parents_not_storage_order() {
        let (a, b, c) = (hash_bytes(b"a"), hash_bytes(b"b"), hash_bytes(b"c"));
        let img = image(vec![
            layer(&c, Some(&b)),
            layer(&a, None),
            layer(&b, Some(&a)),
        ]);
        assert_eq!(order_layers(&img).expect("order"), vec![a, b, c]);
    }

    #[test]
    fn chained_layers_round_trip() {
        let digests: Vec<_> = (0..5_u8).map(|i| (hash_bytes(&[i]), 1)).collect();
        let img = image(chain_layers(&digests));
        let order = order_layers(&img).expect("order");
        assert_eq!(order, digests.into_iter().map(|(d, _)| d).collect::<Vec<_>>());
    }

    #[test]
    fn cyclic_parents_are_corrupt() {
        let (a, b) = (hash_bytes(b"a"), hash_bytes(b"b"));
        let img = image(vec![layer(&a, Some(&b)), layer(&b, Some(&a))]);
        let err = order_layers(&img).unwrap_err();
        assert_eq!(err.kind(), "corrupt_image");
    }

    #[test]
    fn cycle_below_a_top_layer_is_corrupt() {
        let (a, b, c) = (hash_bytes(b"a"), hash_bytes(b"b"), hash_bytes(b"c"));
        let img = image(vec![
            layer(&c, Some(&b)),
            layer(&b, Some(&a)),
            layer(&a, Some(&b)),
        ]);
        assert_eq!(order_layers(&img).unwrap_err().kind(), "corrupt_image");
    }

    #[test]
    fn dangling_parent_is_corrupt() {
        let (a, ghost) = (hash_bytes(b"a"), hash_bytes(b"ghost"));
        let img = image(vec![layer(&a, Some(&ghost))]);
        assert_eq!(order_layers(&img).unwrap_err().kind(), "corrupt_image");
    }

    #[test]
    fn two_chains_are_corrupt() {
        let (a, b) = (hash_bytes(b"a"), hash_bytes(b"b"));
        let img = image(vec![layer(&a, None), layer(&b, None)]);
        assert_eq!(order_layers(&img).unwrap_err().kind(), "corrupt_image");
    }
}
