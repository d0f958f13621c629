//! Output layout.
//!
//! ```text
//! <out>/<top_level>.py
//! <out>/procedures/__init__.py
//! <out>/procedures/_support.py
//! <out>/procedures/<include>.py
//! ```
pub mod python;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

pub fn package_dir(out_dir: &Path) -> PathBuf {
    out_dir.join(python::PACKAGE)
}

/// Module file of a converted include.
pub fn procedure_path(out_dir: &Path, procedure: &str) -> PathBuf {
    package_dir(out_dir).join(format!("{procedure}.py"))
}

/// Module file of a top-level script's procedure.
pub fn top_level_path(out_dir: &Path, procedure: &str) -> PathBuf {
    out_dir.join(format!("{procedure}.py"))
}

/// Create the `procedures` package with its support module.
pub fn ensure_package(out_dir: &Path) -> io::Result<()> {
    let pkg = package_dir(out_dir);
    fs::create_dir_all(&pkg)?;
    write_if_changed(&pkg.join("__init__.py"), "")?;
    write_if_changed(&pkg.join("_support.py"), python::SUPPORT_MODULE)?;
    Ok(())
}

/// Write `contents` unless the file already holds exactly that.
pub fn write_if_changed(path: &Path, contents: &str) -> io::Result<bool> {
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == contents {
            return Ok(false);
        }
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    debug!("wrote {}", path.display());
    Ok(true)
}
