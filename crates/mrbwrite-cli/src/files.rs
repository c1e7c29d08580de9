//! Bytecode file loading

use std::path::PathBuf;

use anyhow::{bail, Result};
use mrbwrite_core::bytecode::BytecodeImage;
use tracing::{info, warn};

/// Load every file, skip the ones that are not bytecode, and join the rest
/// into a single image in command line order
pub fn load_images(paths: &[PathBuf]) -> Result<BytecodeImage> {
    let mut images = Vec::with_capacity(paths.len());
    for path in paths {
        match BytecodeImage::from_file(path) {
            Ok(image) => {
                info!(file = %path.display(), bytes = image.len(), "loaded bytecode");
                images.push(image);
            }
            Err(e) => warn!(file = %path.display(), "skipping: {}", e),
        }
    }
    if images.is_empty() {
        bail!("no valid bytecode file given (expected .mrb files starting with RITE)");
    }
    Ok(BytecodeImage::concat(images)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_skips_invalid_and_joins_valid() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.mrb");
        let b = dir.path().join("b.rb");
        let c = dir.path().join("c.mrb");
        std::fs::write(&a, b"RITEaaaaaa").unwrap();
        std::fs::write(&b, b"puts 1").unwrap();
        std::fs::write(&c, b"RITEcc").unwrap();

        let image = load_images(&[a, b, c]).unwrap();
        assert_eq!(image.as_bytes(), b"RITEaaaaaaRITEcc");
    }

    #[test]
    fn test_no_valid_files_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let b = dir.path().join("b.rb");
        std::fs::write(&b, b"puts 1").unwrap();
        assert!(load_images(&[b]).is_err());
        assert!(load_images(&[]).is_err());
        assert!(load_images(&[dir.path().join("missing.mrb")]).is_err());
    }
}
