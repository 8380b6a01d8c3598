use std::path::PathBuf;

const APP_DIR: &str = "ogradio";

#[cfg(unix)]
pub fn mpv_socket_name() -> String {
    format!("{}/ogradio-mpv.sock", std::env::temp_dir().display())
}

#[cfg(windows)]
pub fn mpv_socket_name() -> String {
    "ogradio-mpv".to_string()
}

#[cfg(unix)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server={}", mpv_socket_name())
}

#[cfg(windows)]
pub fn mpv_socket_arg() -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name())
}

pub fn data_dir() -> PathBuf {
    // ~/.local/share/ogradio on both Linux and macOS
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_DIR)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_DIR)
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
    }
}

#[cfg(unix)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv"]
}

#[cfg(windows)]
fn mpv_binary_names() -> &'static [&'static str] {
    &["mpv.exe", "mpv"]
}

#[cfg(unix)]
fn ffmpeg_binary_names() -> &'static [&'static str] {
    &["ffmpeg"]
}

#[cfg(windows)]
fn ffmpeg_binary_names() -> &'static [&'static str] {
    &["ffmpeg.exe", "ffmpeg"]
}

fn find_beside_exe(names: &[&str]) -> Option<PathBuf> {
    let current_exe = std::env::current_exe().ok()?;
    let dir = current_exe.parent()?;
    names
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

fn find_on_path(names: &[&str]) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        for name in names {
            let p = dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Find mpv: `MPV_PATH`, then beside the executable, then PATH.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_beside_exe(mpv_binary_names()).or_else(|| find_on_path(mpv_binary_names()))
}

/// Find ffmpeg for PCM capture: `FFMPEG_PATH`, then beside the executable,
/// then PATH.
pub fn find_ffmpeg_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("FFMPEG_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }
    find_beside_exe(ffmpeg_binary_names()).or_else(|| find_on_path(ffmpeg_binary_names()))
}
