//! Build ordering.

use crate::build::AffectedBuild;

/// Sort builds by ascending `order`, keeping matcher order for ties.
pub fn sort_by_order(builds: &mut [AffectedBuild]) {
    // slice::sort_by_key is stable
    builds.sort_by_key(|b| b.order);
}
