use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;

use crate::error::{AppResult, FileError};
use crate::models::job::NewJob;
use crate::models::profile::UserProfile;

/// 职位种子文件格式
///
/// ```toml
/// [[jobs]]
/// source_url = "https://boards.greenhouse.io/acme/jobs/1"
/// title = "Product Designer"
/// company = "Acme"
/// priority = 8
/// ```
#[derive(Debug, Default, Deserialize)]
struct JobSeedFile {
    #[serde(default)]
    jobs: Vec<NewJob>,
}

async fn read_toml_text(path: &Path) -> AppResult<String> {
    fs::read_to_string(path).await.map_err(|source| {
        FileError::ReadFailed {
            path: path.display().to_string(),
            source,
        }
        .into()
    })
}

/// 从 TOML 文件加载用户资料
pub async fn load_profile(profile_path: &Path) -> AppResult<UserProfile> {
    let content = read_toml_text(profile_path).await?;
    let profile: UserProfile =
        toml::from_str(&content).map_err(|source| FileError::TomlParseFailed {
            path: profile_path.display().to_string(),
            source,
        })?;
    Ok(profile)
}

/// 加载单个职位种子文件
pub async fn load_job_seed_file(path: &Path) -> AppResult<Vec<NewJob>> {
    let content = read_toml_text(path).await?;
    let seeds: JobSeedFile = toml::from_str(&content).map_err(|source| FileError::TomlParseFailed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(seeds.jobs)
}

/// 从文件夹中加载所有职位种子
///
/// 单个文件解析失败只记录警告，不影响其他文件。
pub async fn load_job_seeds(folder_path: &str) -> AppResult<Vec<NewJob>> {
    let folder = PathBuf::from(folder_path);

    if !fs::try_exists(&folder).await.unwrap_or(false) {
        return Err(FileError::DirectoryNotFound {
            path: folder_path.to_string(),
        }
        .into());
    }

    let mut entries = fs::read_dir(&folder)
        .await
        .map_err(|source| FileError::ReadFailed {
            path: folder_path.to_string(),
            source,
        })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            files.push(path);
        }
    }
    files.sort();

    let mut seeds = Vec::new();
    for path in files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );
        match load_job_seed_file(&path).await {
            Ok(jobs) => {
                tracing::info!("成功加载 {} 个职位", jobs.len());
                seeds.extend(jobs);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    Ok(seeds)
}
