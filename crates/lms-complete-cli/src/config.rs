//! Path resolution for fixtures and the browser binary.

use std::path::{Path, PathBuf};

/// Environment variable naming a default fixture file.
pub const FIXTURE_ENV: &str = "LMS_COMPLETE_FIXTURE";

/// Environment variable naming a Chromium executable.
pub const CHROMIUM_ENV: &str = "LMS_COMPLETE_CHROMIUM_PATH";

/// Resolve the fixture path: explicit flag, then `LMS_COMPLETE_FIXTURE`,
/// then `.lms-complete/fixture.json` under the working directory, then the
/// same file under the home directory.
pub fn resolve_fixture_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(FIXTURE_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_fixture = PathBuf::from(".lms-complete/fixture.json");
    if cwd_fixture.exists() {
        return Some(cwd_fixture);
    }

    dirs::home_dir()
        .map(|home| home.join(".lms-complete/fixture.json"))
        .filter(|path| path.exists())
}

/// Find a Chromium binary.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CHROMIUM_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".lms-complete/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".lms-complete/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            ]
        } else {
            vec![home.join(".lms-complete/chromium/chrome-linux64/chrome")]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}
