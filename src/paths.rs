use anyhow::Context;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

const APP_DIR: &str = "flux";
pub const CONFIG_FILE: &str = "config.toml";

/// Config directory for the given environment: `$FLUX_HOME/config`, then
/// `$XDG_CONFIG_HOME/flux`, then `$HOME/.config/flux`. Empty variables count as unset.
fn config_dir_in(lookup: impl Fn(&str) -> Option<OsString>) -> anyhow::Result<PathBuf> {
    let var = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);

    if let Some(home) = var("FLUX_HOME") {
        return Ok(home.join("config"));
    }
    if let Some(xdg) = var("XDG_CONFIG_HOME") {
        return Ok(xdg.join(APP_DIR));
    }
    let home = var("HOME").context("HOME is not set")?;
    Ok(home.join(".config").join(APP_DIR))
}

/// The config directory, created if missing.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let dir = config_dir_in(|key| env::var_os(key))?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory: {}", dir.display()))?;
    Ok(dir)
}

/// Config files to try in order: the config directory, then the working directory.
pub fn config_candidates() -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = vec![config_dir()?.join(CONFIG_FILE)];
    if let Ok(cwd) = env::current_dir() {
        paths.push(cwd.join(CONFIG_FILE));
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<OsString> + 'a {
        move |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| OsString::from(*v))
    }

    #[test]
    fn flux_home_wins() {
        let vars = [("FLUX_HOME", "/opt/flux"), ("XDG_CONFIG_HOME", "/xdg"), ("HOME", "/home/u")];
        assert_eq!(config_dir_in(lookup(&vars)).unwrap(), PathBuf::from("/opt/flux/config"));
    }

    #[test]
    fn falls_back_through_xdg_and_home() {
        let vars = [("FLUX_HOME", ""), ("XDG_CONFIG_HOME", "/xdg"), ("HOME", "/home/u")];
        assert_eq!(config_dir_in(lookup(&vars)).unwrap(), PathBuf::from("/xdg/flux"));

        let vars = [("HOME", "/home/u")];
        assert_eq!(config_dir_in(lookup(&vars)).unwrap(), PathBuf::from("/home/u/.config/flux"));

        assert!(config_dir_in(lookup(&[])).is_err());
    }
}
