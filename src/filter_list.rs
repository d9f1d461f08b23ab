use std::{
    io,
    path::Path,
    time::Duration,
};

use reqwest::{redirect, StatusCode};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, task::JoinSet};

use crate::config::{self, Config, FilterListSource};

// acquires filter lists, preferring fresh cached copies over downloads

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: StatusCode },
}

/// Where the text of a list came from during one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrigin {
    Cache,
    Download,
    /// Download failed; an outdated cached copy was used instead.
    StaleCache,
}

#[derive(Debug, Clone)]
pub struct ListContent {
    pub name: String,
    pub text: String,
    pub origin: ListOrigin,
}

/// Builds the download client: no custom user agent, at most
/// `max_redirects` followed redirects and an overall per-request timeout.
pub fn build_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    let max_redirects = config.max_redirects;
    // `previous` holds every url already requested, the original included
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > max_redirects {
            attempt.error(format!("more than {max_redirects} redirects"))
        } else {
            attempt.follow()
        }
    });

    let client = reqwest::Client::builder()
        .redirect(policy)
        .timeout(config.download_timeout())
        .build()?;
    Ok(client)
}

/// Acquires every configured list concurrently. Failures are logged and the
/// affected list is left out; the result keeps configuration order.
pub async fn acquire(config: &Config) -> Vec<ListContent> {
    if config.lists.is_empty() {
        return Vec::new();
    }

    if let Err(err) = fs::create_dir_all(&config.cache_dir).await {
        tracing::warn!(dir = %config.cache_dir.display(), error = %err, "failed to create filter list cache directory");
    }

    let client = match build_client(config) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(error = %err, "failed to build filter list http client");
            return Vec::new();
        }
    };

    let max_age = config.refresh_interval();
    let mut tasks = JoinSet::new();

    for (index, source) in config.lists.iter().cloned().enumerate() {
        let client = client.clone();
        let cache_dir = config.cache_dir.clone();
        tasks.spawn(async move {
            let outcome = acquire_one(&client, &source, &cache_dir, max_age).await;
            (index, source, outcome)
        });
    }

    let mut acquired = Vec::with_capacity(config.lists.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, _, Ok(content))) => acquired.push((index, content)),
            Ok((_, source, Err(err))) => {
                tracing::warn!(list = %source.name, url = %source.url, error = %err, "filter list unavailable, skipping");
            }
            Err(err) => {
                tracing::error!(error = %err, "filter list task failed");
            }
        }
    }

    acquired.sort_by_key(|(index, _)| *index);
    acquired.into_iter().map(|(_, content)| content).collect()
}

pub async fn acquire_one(
    client: &reqwest::Client,
    source: &FilterListSource,
    cache_dir: &Path,
    max_age: Duration,
) -> Result<ListContent, FetchError> {
    let path = config::cache_path(cache_dir, &source.name);

    if let Some(age) = cache_age(&path).await {
        if age < max_age {
            let text = read_cached(&path).await?;
            tracing::info!(list = %source.name, age_hours = age.as_secs() / 3600, "loaded cached filter list");
            return Ok(ListContent {
                name: source.name.clone(),
                text,
                origin: ListOrigin::Cache,
            });
        }
    }

    tracing::info!(list = %source.name, url = %source.url, "downloading filter list");

    match download(client, &source.url).await {
        Ok(bytes) => {
            if let Err(err) = write_body(&path, &bytes).await {
                tracing::warn!(list = %source.name, path = %path.display(), error = %err, "failed to cache filter list");
            } else {
                tracing::info!(list = %source.name, size_kb = bytes.len() / 1024, "saved filter list");
            }
            Ok(ListContent {
                name: source.name.clone(),
                text: String::from_utf8_lossy(&bytes).into_owned(),
                origin: ListOrigin::Download,
            })
        }
        Err(err) => match read_cached(&path).await {
            Ok(text) => {
                tracing::warn!(list = %source.name, error = %err, "filter list download failed, using stale cache");
                Ok(ListContent {
                    name: source.name.clone(),
                    text,
                    origin: ListOrigin::StaleCache,
                })
            }
            Err(_) => Err(err),
        },
    }
}

async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();

    if status != StatusCode::OK {
        return Err(FetchError::UnexpectedStatus {
            url: url.to_string(),
            status,
        });
    }

    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

async fn cache_age(path: &Path) -> Option<Duration> {
    let metadata = fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    Some(modified.elapsed().unwrap_or_default())
}

async fn read_cached(path: &Path) -> Result<String, FetchError> {
    let bytes = fs::read(path).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_body(destination: &Path, bytes: &[u8]) -> Result<(), FetchError> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    let temp_path = destination.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(temp_path, destination).await?;
    Ok(())
}
