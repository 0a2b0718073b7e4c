// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

const APP_DIR: &str = "signgate";

/// Return the application data directory, or `None` if no candidate
/// variable is set. The directory is not created here.
pub fn data_dir() -> Option<PathBuf> {
    resolve(|name| std::env::var(name).ok())
}

fn resolve(var: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let set = |name: &str| var(name).filter(|v| !v.is_empty());

    if let Some(explicit) = set("SIGNGATE_DATA_DIR") {
        return Some(PathBuf::from(explicit));
    }
    // Try XDG data dir, then fallback to home
    if let Some(xdg) = set("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg).join(APP_DIR));
    }
    set("HOME").map(|home| PathBuf::from(home).join(".local").join("share").join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn explicit_dir_wins() {
        let dir = resolve(env(&[
            ("SIGNGATE_DATA_DIR", "/srv/sign"),
            ("XDG_DATA_HOME", "/x"),
            ("HOME", "/home/op"),
        ]));
        assert_eq!(dir, Some(PathBuf::from("/srv/sign")));
    }

    #[test]
    fn xdg_then_home() {
        assert_eq!(
            resolve(env(&[("XDG_DATA_HOME", "/x"), ("HOME", "/home/op")])),
            Some(PathBuf::from("/x/signgate"))
        );
        assert_eq!(
            resolve(env(&[("XDG_DATA_HOME", ""), ("HOME", "/home/op")])),
            Some(PathBuf::from("/home/op/.local/share/signgate"))
        );
    }

    #[test]
    fn nothing_set() {
        assert_eq!(resolve(env(&[])), None);
    }
}
