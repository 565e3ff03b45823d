//! JS 执行器 - 基础设施层
//!
//! 持有一个申请页面，只暴露"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::{AppError, AppResult, BrowserError};

/// JS 执行器
///
/// 职责：
/// - 持有 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 Job / Application
/// - 不处理申请流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（导航、截图等非 JS 操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> AppResult<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result
            .into_value()
            .map_err(|e| AppError::Browser(BrowserError::ScriptExecutionFailed {
                source: Box::new(e),
            }))?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> AppResult<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 把 Rust 值作为 JSON 参数传给一段 JS 函数体
    ///
    /// `body` 中通过 `args` 访问参数。
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        body: &str,
        args: &JsonValue,
    ) -> AppResult<T> {
        let js = format!("((args) => {{ {} }})({})", body, args);
        self.eval_as(js).await
    }

    /// 关闭页面，释放资源
    pub async fn close(self) -> AppResult<()> {
        self.page.close().await?;
        Ok(())
    }
}
