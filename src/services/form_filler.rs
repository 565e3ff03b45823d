//! 表单填写 - 业务能力层
//!
//! 对每个字段：分类 → 取资料中的值 → 写入页面。
//! 没有对应资料的字段保持空白并报告，绝不编造。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, PageHandle};
use crate::config::Config;
use crate::error::AppResult;
use crate::models::{
    FieldDescriptor, FieldInput, FieldKind, FillResult, SemanticFieldType, UserProfile,
};
use crate::services::field_classifier;

/// 键入节奏：每个按键之间随机停顿
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypingPace {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl TypingPace {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_delay_ms: config.typing_delay_min_ms,
            max_delay_ms: config.typing_delay_max_ms.max(config.typing_delay_min_ms),
        }
    }

    /// 下一个按键前的停顿
    pub fn next_delay(&self) -> Duration {
        Duration::from_millis(fastrand::u64(self.min_delay_ms..=self.max_delay_ms))
    }
}

/// 单个字段的处理结果
enum FieldOutcome {
    Filled,
    Failed,
    Unfilled,
    Skipped,
}

/// 表单填写服务
pub struct FormFiller {
    driver: Arc<dyn BrowserDriver>,
    pace: TypingPace,
}

impl FormFiller {
    pub fn new(driver: Arc<dyn BrowserDriver>, pace: TypingPace) -> Self {
        Self { driver, pace }
    }

    /// 填写整张表单
    ///
    /// 单个字段失败不会中断，结果中记录失败字段名。
    pub async fn fill(
        &self,
        page: &PageHandle,
        fields: &[FieldDescriptor],
        profile: &UserProfile,
    ) -> FillResult {
        let mut result = FillResult {
            total_count: fields.len(),
            ..FillResult::default()
        };

        for field in fields {
            match self.fill_field(page, field, profile).await {
                FieldOutcome::Filled => result.filled_count += 1,
                FieldOutcome::Failed => result.failed_field_names.push(field.display_name()),
                FieldOutcome::Unfilled => result.unfilled_field_names.push(field.display_name()),
                FieldOutcome::Skipped => result.skipped_count += 1,
            }
        }

        info!(
            "📝 填表完成: {}/{} (跳过 {}, 失败 {}, 无资料 {})",
            result.filled_count,
            result.total_count,
            result.skipped_count,
            result.failed_field_names.len(),
            result.unfilled_field_names.len()
        );
        result
    }

    async fn fill_field(
        &self,
        page: &PageHandle,
        field: &FieldDescriptor,
        profile: &UserProfile,
    ) -> FieldOutcome {
        let Some(field_type) = field_classifier::classify(field) else {
            debug!("跳过无法识别的字段: {}", field.display_name());
            return FieldOutcome::Skipped;
        };

        let Some(input) = plan_input(field, field_type, profile).await else {
            debug!("资料中没有 {} 的值: {}", field_type, field.display_name());
            return FieldOutcome::Unfilled;
        };

        let written = match &input {
            FieldInput::Keys(text) => self.type_paced(page, field, text).await,
            other => self.driver.set_field_value(page, field, other).await,
        };

        match written {
            Ok(()) => {
                debug!("✓ {} <- {}", field.display_name(), field_type);
                FieldOutcome::Filled
            }
            Err(e) => {
                warn!("⚠️ 字段 {} 写入失败: {}", field.display_name(), e);
                FieldOutcome::Failed
            }
        }
    }

    /// 清空后逐字符键入
    async fn type_paced(&self, page: &PageHandle, field: &FieldDescriptor, text: &str) -> AppResult<()> {
        self.driver
            .set_field_value(page, field, &FieldInput::Clear)
            .await?;
        for ch in text.chars() {
            self.driver
                .set_field_value(page, field, &FieldInput::Keys(ch.to_string()))
                .await?;
            let delay = self.pace.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(())
    }
}

/// 决定对字段执行的动作；没有可用的值时返回 None
async fn plan_input(
    field: &FieldDescriptor,
    field_type: SemanticFieldType,
    profile: &UserProfile,
) -> Option<FieldInput> {
    match field.kind {
        FieldKind::File => {
            let path = profile.attachment_for(field_type)?;
            attachment_exists(path)
                .await
                .then(|| FieldInput::Attach(path.clone()))
        }
        FieldKind::Checkbox => {
            if field_type == SemanticFieldType::Consent {
                return profile.accept_terms.then_some(FieldInput::Check(true));
            }
            profile
                .value_for(field_type)
                .and_then(yes_no)
                .map(FieldInput::Check)
        }
        FieldKind::Select | FieldKind::Radio => {
            let chosen = profile
                .value_for(field_type)
                .and_then(|value| choose_option(&field.options, value))
                .or_else(|| {
                    field_type
                        .is_eeo()
                        .then(|| decline_option(&field.options))
                        .flatten()
                })?;
            Some(FieldInput::Choose(chosen.to_string()))
        }
        FieldKind::Text | FieldKind::TextArea => {
            if field_type.is_attachment() || field_type == SemanticFieldType::Consent {
                return None;
            }
            profile
                .value_for(field_type)
                .map(|v| FieldInput::Keys(v.to_string()))
        }
    }
}

async fn attachment_exists(path: &Path) -> bool {
    match tokio::fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!("无法检查附件 {}: {}", path.display(), e);
            false
        }
    }
}

fn yes_no(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn is_placeholder(option: &str) -> bool {
    let lower = option.trim().to_lowercase();
    lower.is_empty() || lower.starts_with("select") || lower.starts_with("choose") || lower.starts_with("--")
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// `needle` 是否作为连续的整词出现在 `haystack` 中
fn contains_words(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// 在候选项中找与资料值最匹配的一项
///
/// 只按整词匹配，"No" 不会命中 "None of the above"。
pub fn choose_option<'a>(options: &'a [String], value: &str) -> Option<&'a str> {
    let want = value.trim().to_lowercase();
    let want_words = words(&want);
    if want_words.is_empty() {
        return None;
    }
    let candidates: Vec<(&'a str, String, Vec<String>)> = options
        .iter()
        .filter(|o| !is_placeholder(o))
        .map(|o| (o.as_str(), o.trim().to_lowercase(), words(o)))
        .collect();

    candidates
        .iter()
        .find(|(_, o, _)| *o == want)
        .or_else(|| {
            candidates
                .iter()
                .find(|(_, _, w)| w.starts_with(&want_words))
        })
        .or_else(|| {
            candidates
                .iter()
                .find(|(_, _, w)| contains_words(w, &want_words))
        })
        .or_else(|| {
            candidates.iter().find(|(_, o, w)| {
                o.chars().count() > 2 && contains_words(&want_words, w)
            })
        })
        .map(|(original, _, _)| *original)
}

/// EEO 问题的"不愿透露"选项
pub fn decline_option(options: &[String]) -> Option<&str> {
    options
        .iter()
        .find(|o| {
            let lower = o.to_lowercase();
            lower.contains("prefer not")
                || lower.contains("decline")
                || lower.contains("not to disclose")
                || lower.contains("not wish")
        })
        .map(String::as_str)
}
