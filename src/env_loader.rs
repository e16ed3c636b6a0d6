use std::env;
use std::path::PathBuf;

include!(concat!(env!("OUT_DIR"), "/harvest_env_allowlist.rs"));

const ENV_PREFIX: &str = "HARVEST_";

fn fallback_dotenv_path(harvest_home: Option<PathBuf>) -> Option<PathBuf> {
    let base = harvest_home?;
    Some(base.join(".env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Some(path) = fallback_dotenv_path(env::var_os("HARVEST_HOME").map(PathBuf::from)) else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

fn unknown_keys<I>(keys: I, allowlist: &[&str]) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = keys
        .into_iter()
        .filter(|k| k.starts_with(ENV_PREFIX))
        .filter(|k| !allowlist.contains(&k.as_str()))
        .collect::<Vec<_>>();
    out.sort();
    out
}

/// `HARVEST_*` variables set in the environment that nothing reads.
pub fn unknown_harvest_env_keys() -> Vec<String> {
    unknown_keys(env::vars().map(|(k, _)| k), GENERATED_HARVEST_ENV_ALLOWLIST)
}
