use log::debug;

use crate::engine::Engine;

/// First tag of `candidates` (in the given order) whose image exists locally.
///
/// Never pulls. An engine error on a candidate counts as "not present".
pub async fn newest_local_tag(
    engine: &dyn Engine,
    image: &str,
    candidates: &[String],
) -> Option<String> {
    for tag in candidates {
        let reference = format!("{}:{}", image, tag);
        match engine.image_exists(&reference).await {
            Ok(true) => {
                debug!("Found local image {}", reference);
                return Some(tag.clone());
            }
            Ok(false) => {}
            Err(e) => debug!("Could not check {}: {}", reference, e),
        }
    }
    None
}
