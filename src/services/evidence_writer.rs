//! 证据写入服务 - 业务能力层
//!
//! 只负责"保存截图 / 写人工待办清单"能力，不关心流程

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppResult, FileError};
use crate::models::{Application, Job};

/// 证据写入服务
///
/// 职责：
/// - 把提交前后的截图写入证据目录
/// - 把需要人工处理 / 失败的申请追加到待办清单（附原始链接和已生成材料）
pub struct EvidenceWriter {
    evidence_dir: PathBuf,
    manual_list_path: PathBuf,
}

impl EvidenceWriter {
    pub fn new(evidence_dir: impl Into<PathBuf>) -> Self {
        let evidence_dir = evidence_dir.into();
        let manual_list_path = evidence_dir.join("manual_followup.txt");
        Self {
            evidence_dir,
            manual_list_path,
        }
    }

    pub fn evidence_dir(&self) -> &Path {
        &self.evidence_dir
    }

    /// 保存截图，返回文件路径
    pub async fn save_screenshot(&self, application: &Application, png: &[u8]) -> AppResult<PathBuf> {
        fs::create_dir_all(&self.evidence_dir)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: self.evidence_dir.display().to_string(),
                source,
            })?;
        let path = self.evidence_dir.join(format!("{}.png", application.id));
        fs::write(&path, png)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: path.display().to_string(),
                source,
            })?;
        debug!("截图已保存: {} ({} 字节)", path.display(), png.len());
        Ok(path)
    }

    /// 追加一条人工待办
    pub async fn write_followup(&self, job: &Job, application: &Application) -> AppResult<()> {
        fs::create_dir_all(&self.evidence_dir)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: self.evidence_dir.display().to_string(),
                source,
            })?;

        let materials = application
            .materials
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let line = format!(
            "{} | {} @ {} | {} | 链接: {} | 材料: [{}] | 原因: {}\n",
            application.status,
            job.title,
            job.company,
            application.id,
            application.manual_url.as_deref().unwrap_or(&job.source_url),
            materials,
            application.last_error.as_deref().unwrap_or("-"),
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.manual_list_path)
            .await
            .map_err(|source| FileError::WriteFailed {
                path: self.manual_list_path.display().to_string(),
                source,
            })?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::{ApplicationStatus, JobStatus, Platform};

    #[tokio::test]
    async fn followup_line_carries_link_and_materials() {
        let dir = std::env::temp_dir().join(format!("evidence_{}", Uuid::new_v4()));
        let writer = EvidenceWriter::new(&dir);

        let job = Job {
            id: Uuid::new_v4(),
            source_url: "https://jobs.lever.co/acme/1".into(),
            title: "Illustrator".into(),
            company: "Acme".into(),
            source: Platform::Lever,
            priority: 5,
            match_score: None,
            deadline: None,
            status: JobStatus::Applying,
            is_active: true,
            last_checked_at: Utc::now(),
            notes: String::new(),
            created_at: Utc::now(),
        };
        let mut app = Application::start(job.id, 0);
        app.materials.push(PathBuf::from("out/resume.pdf"));
        app.record_error("challenge unsolved");
        app.finish(ApplicationStatus::NeedsManual).unwrap();

        writer.write_followup(&job, &app).await.unwrap();
        let shot = writer.save_screenshot(&app, b"png").await.unwrap();

        let text = std::fs::read_to_string(dir.join("manual_followup.txt")).unwrap();
        assert!(text.starts_with("needs_manual"));
        assert!(text.contains("https://jobs.lever.co/acme/1"));
        assert!(text.contains("out/resume.pdf"));
        assert!(shot.exists());

        std::fs::remove_dir_all(dir).ok();
    }
}
