use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::domain::Image;
use crate::core::error::{AinebError, AinebResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum TrajectoryFile {
    Many(Vec<Image>),
    One(Image),
}

/// Reads every image in a JSON trajectory (an array, or a single image object).
pub fn read_images(path: &Path) -> AinebResult<Vec<Image>> {
    let text = fs::read_to_string(path)?;
    let parsed: TrajectoryFile = serde_json::from_str(&text)?;
    Ok(match parsed {
        TrajectoryFile::Many(v) => v,
        TrajectoryFile::One(img) => vec![img],
    })
}

/// Reads the last image of a trajectory.
pub fn read_last(path: &Path) -> AinebResult<Image> {
    read_images(path)?
        .pop()
        .ok_or_else(|| AinebError::Config(format!("{} contains no images", path.display())))
}

/// Writes a trajectory, replacing any existing file via a temporary sibling.
pub fn write_images(path: &Path, images: &[Image]) -> AinebResult<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(images)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
