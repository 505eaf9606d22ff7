use std::env;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::time::{self, Duration};
use tracing::{debug, warn};

/// Searches `PATH` for an executable called `name`.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    find_in(name, &paths)
}

fn find_in(name: &str, paths: &OsStr) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_file(candidate))
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

pub fn host_name() -> Option<String> {
    sysinfo::System::host_name().filter(|h| !h.is_empty())
}

/// Runs `attempt` up to `attempts` times, sleeping `pause` between tries.
///
/// Gives up with `None`; failures are only logged.
pub async fn retry_fixed<T, E, F, Fut>(
    what: &str,
    attempts: u32,
    pause: Duration,
    mut attempt: F,
) -> Option<T>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    for n in 1..=attempts {
        match attempt().await {
            Ok(v) => return Some(v),
            Err(e) => warn!("{} attempt {}/{} fail, err:{}", what, n, attempts, e),
        }
        if n < attempts {
            debug!("Wait {:?} retry {}", pause, what);
            time::sleep(pause).await;
        }
    }

    None
}
