use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

// configuration loader: parses yaml and describes the filter lists to acquire

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_pattern_scan_limit")]
    pub pattern_scan_limit: usize,
    #[serde(default = "default_notify_throttle_ms")]
    pub notify_throttle_ms: u64,
    #[serde(default = "default_lists")]
    pub lists: Vec<FilterListSource>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct FilterListSource {
    pub name: String,
    pub url: String,
}

impl FilterListSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("adblocker")
}

fn default_refresh_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_download_timeout_secs() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    5
}

fn default_pattern_scan_limit() -> usize {
    5000
}

fn default_notify_throttle_ms() -> u64 {
    500
}

fn default_lists() -> Vec<FilterListSource> {
    vec![
        FilterListSource::new("easylist", "https://easylist.to/easylist/easylist.txt"),
        FilterListSource::new(
            "easyprivacy",
            "https://easylist.to/easylist/easyprivacy.txt",
        ),
        FilterListSource::new(
            "peter-lowe",
            "https://pgl.yoyo.org/adservers/serverlist.php?hostformat=adblockplus&showintro=0",
        ),
    ]
}

impl Config {
    pub fn load(path: Option<PathBuf>) -> io::Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => {
                let default_path = Path::new("adshield.yaml");
                if default_path.exists() {
                    Self::from_path(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let cfg: Self = serde_yaml::from_str(&contents)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        cfg.validate()?;

        Ok(cfg)
    }

    pub fn validate(&self) -> io::Result<()> {
        if self.refresh_interval_secs == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "refresh_interval_secs must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Location of the cached copy of `source`.
    pub fn cache_path(&self, source: &FilterListSource) -> PathBuf {
        cache_path(&self.cache_dir, &source.name)
    }

    /// Never shorter than one second, even for a hand-built zero value.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn notify_throttle(&self) -> Duration {
        Duration::from_millis(self.notify_throttle_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            cache_dir: default_cache_dir(),
            refresh_interval_secs: default_refresh_interval_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            max_redirects: default_max_redirects(),
            pattern_scan_limit: default_pattern_scan_limit(),
            notify_throttle_ms: default_notify_throttle_ms(),
            lists: default_lists(),
        }
    }
}

pub(crate) fn cache_path(cache_dir: &Path, name: &str) -> PathBuf {
    let file_name: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    cache_dir.join(format!("{file_name}.txt"))
}
