//! 基于 chromiumoxide 的浏览器驱动

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Browser;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::browser::driver::{BrowserDriver, PageHandle};
use crate::error::{AppError, AppResult, BrowserError};
use crate::infrastructure::JsExecutor;
use crate::models::{Challenge, FieldDescriptor, FieldInput, FieldKind};
use crate::services::challenge_detector::detect_from_html;

/// 枚举表单字段并打上 data-autoapply-idx 标记
const LIST_FIELDS_JS: &str = r#"
(() => {
    const labelOf = (el) => {
        if (el.id) {
            const l = document.querySelector(`label[for="${CSS.escape(el.id)}"]`);
            if (l) return l.innerText.trim();
        }
        const wrap = el.closest('label');
        if (wrap) return wrap.innerText.trim();
        return el.getAttribute('aria-label') || null;
    };
    const visible = (el) => !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length);
    const out = [];
    const radios = new Map();
    let idx = 0;
    for (const el of document.querySelectorAll('input, select, textarea')) {
        const type = (el.getAttribute('type') || '').toLowerCase();
        if (['hidden', 'submit', 'button', 'reset', 'image'].includes(type)) continue;
        if (type !== 'file' && !visible(el)) continue;
        if (el.closest('.g-recaptcha, .h-captcha, .cf-turnstile')) continue;
        if (type === 'radio') {
            const key = el.name || `radio-${idx}`;
            if (!radios.has(key)) {
                const group = el.closest('fieldset');
                const legend = group ? group.querySelector('legend') : null;
                const field = {
                    selector: `input[type="radio"][name="${CSS.escape(key)}"]`,
                    name: el.name || null,
                    id: null,
                    label: legend ? legend.innerText.trim() : null,
                    placeholder: null,
                    input_type: 'radio',
                    kind: 'radio',
                    options: [],
                    required: el.required,
                };
                radios.set(key, field);
                out.push(field);
            }
            radios.get(key).options.push(labelOf(el) || el.value);
            continue;
        }
        el.setAttribute('data-autoapply-idx', String(idx));
        let kind = 'text';
        if (el.tagName === 'SELECT') kind = 'select';
        else if (el.tagName === 'TEXTAREA') kind = 'text_area';
        else if (type === 'checkbox') kind = 'checkbox';
        else if (type === 'file') kind = 'file';
        out.push({
            selector: `[data-autoapply-idx="${idx}"]`,
            name: el.name || null,
            id: el.id || null,
            label: labelOf(el),
            placeholder: el.getAttribute('placeholder'),
            input_type: type || null,
            kind,
            options: el.tagName === 'SELECT'
                ? Array.from(el.options).map(o => o.text.trim()).filter(t => t.length > 0)
                : [],
            required: el.required,
        });
        idx += 1;
    }
    return out;
})()
"#;

const CLEAR_JS: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return false;
el.focus();
el.value = '';
el.dispatchEvent(new Event('input', { bubbles: true }));
return true;
"#;

const CHOOSE_JS: &str = r#"
const want = args.value.toLowerCase();
if (args.kind === 'radio') {
    for (const el of document.querySelectorAll(args.selector)) {
        const label = (el.closest('label')?.innerText || el.value || '').trim().toLowerCase();
        const byFor = el.id ? document.querySelector(`label[for="${CSS.escape(el.id)}"]`) : null;
        const text = byFor ? byFor.innerText.trim().toLowerCase() : label;
        if (text === want || el.value.toLowerCase() === want) {
            el.click();
            return true;
        }
    }
    return false;
}
const el = document.querySelector(args.selector);
if (!el) return false;
for (const o of el.options) {
    if (o.text.trim().toLowerCase() === want || o.value.toLowerCase() === want) {
        el.value = o.value;
        el.dispatchEvent(new Event('change', { bubbles: true }));
        return true;
    }
}
return false;
"#;

const CHECK_JS: &str = r#"
const el = document.querySelector(args.selector);
if (!el) return false;
if (el.checked !== args.checked) el.click();
return el.checked === args.checked;
"#;

const SUBMIT_JS: &str = r#"
(() => {
    const candidates = Array.from(document.querySelectorAll(
        'button[type="submit"], input[type="submit"], button'
    ));
    const btn = candidates.find(b => {
        const t = (b.innerText || b.value || '').toLowerCase();
        return b.type === 'submit' || t.includes('submit') || t.includes('apply');
    });
    if (btn) { btn.click(); return true; }
    const form = document.querySelector('form');
    if (form) { form.requestSubmit ? form.requestSubmit() : form.submit(); return true; }
    return false;
})()
"#;

const INJECT_JS: &str = r#"
const setAll = (sel) => {
    let hit = false;
    for (const el of document.querySelectorAll(sel)) {
        el.value = args.token;
        el.innerHTML = args.token;
        el.dispatchEvent(new Event('change', { bubbles: true }));
        hit = true;
    }
    return hit;
};
const findCallback = (root) => {
    const host = document.querySelector(root);
    const name = host ? host.getAttribute('data-callback') : null;
    return name && typeof window[name] === 'function' ? window[name] : null;
};
let hit = false;
switch (args.kind) {
    case 'recaptcha_v2':
    case 'recaptcha_v3':
        hit = setAll('textarea[name="g-recaptcha-response"], #g-recaptcha-response');
        { const cb = findCallback('.g-recaptcha'); if (cb) cb(args.token); }
        break;
    case 'hcaptcha':
        hit = setAll('textarea[name="h-captcha-response"], textarea[name="g-recaptcha-response"]');
        { const cb = findCallback('.h-captcha'); if (cb) cb(args.token); }
        break;
    case 'turnstile':
        hit = setAll('input[name="cf-turnstile-response"]');
        { const cb = findCallback('.cf-turnstile'); if (cb) cb(args.token); }
        break;
    case 'funcaptcha':
        hit = setAll('input[name="fc-token"], input[name="verification-token"]');
        break;
    default:
        hit = setAll('input[name*="captcha" i], input[id*="captcha" i]');
}
return hit;
"#;

const CHECKBOX_BOX_JS: &str = r#"
(() => {
    const direct = document.querySelector('[data-challenge="checkbox"]');
    if (direct) { direct.click(); return null; }
    const frame = document.querySelector('iframe[src*="recaptcha"][src*="anchor"], iframe[title*="reCAPTCHA"]');
    if (!frame) return null;
    const r = frame.getBoundingClientRect();
    return { x: r.left + 28, y: r.top + r.height / 2 };
})()
"#;

/// 导出的 cookie（只保留恢复会话需要的字段）
#[derive(Debug, Serialize, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    path: String,
    secure: bool,
    http_only: bool,
}

#[derive(Debug, Deserialize)]
struct ClickPoint {
    x: f64,
    y: f64,
}

/// chromiumoxide 浏览器驱动
///
/// 每个打开的页面由一个 `JsExecutor` 持有。
pub struct ChromiumDriver {
    browser: Browser,
    pages: DashMap<String, Arc<JsExecutor>>,
}

impl ChromiumDriver {
    pub fn new(browser: Browser) -> Self {
        Self {
            browser,
            pages: DashMap::new(),
        }
    }

    fn executor(&self, page: &PageHandle) -> AppResult<Arc<JsExecutor>> {
        self.pages
            .get(&page.id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                AppError::Browser(BrowserError::UnknownPage {
                    page_id: page.id.clone(),
                })
            })
    }

    async fn page_html(&self, page: &PageHandle) -> AppResult<String> {
        let executor = self.executor(page)?;
        Ok(executor.page().content().await?)
    }

    async fn current_url(&self, page: &PageHandle) -> AppResult<String> {
        let executor = self.executor(page)?;
        Ok(executor
            .page()
            .url()
            .await?
            .unwrap_or_else(|| page.url.clone()))
    }

    async fn attach_file(
        &self,
        executor: &JsExecutor,
        field: &FieldDescriptor,
        path: &std::path::Path,
    ) -> AppResult<()> {
        let element = executor
            .page()
            .find_element(field.selector.as_str())
            .await
            .map_err(|_| {
                AppError::Browser(BrowserError::ElementNotFound {
                    selector: field.selector.clone(),
                })
            })?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string_lossy().to_string()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(|e| AppError::Browser(BrowserError::ConfigurationFailed(e)))?;
        executor.page().execute(params).await?;
        Ok(())
    }
}

fn not_found(field: &FieldDescriptor) -> AppError {
    AppError::Browser(BrowserError::ElementNotFound {
        selector: field.selector.clone(),
    })
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn open(&self, url: &str) -> AppResult<PageHandle> {
        let page = self
            .browser
            .new_page(url)
            .await
            .map_err(|e| AppError::navigation_failed(url, e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| AppError::navigation_failed(url, e.to_string()))?;

        let handle = PageHandle {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
        };
        self.pages
            .insert(handle.id.clone(), Arc::new(JsExecutor::new(page)));
        debug!("已打开页面 {} -> {}", handle.id, url);
        Ok(handle)
    }

    async fn page_text(&self, page: &PageHandle) -> AppResult<String> {
        let executor = self.executor(page)?;
        executor
            .eval_as("document.body ? document.body.innerText : ''")
            .await
    }

    async fn list_fields(&self, page: &PageHandle) -> AppResult<Vec<FieldDescriptor>> {
        let executor = self.executor(page)?;
        executor.eval_as(LIST_FIELDS_JS).await
    }

    async fn set_field_value(
        &self,
        page: &PageHandle,
        field: &FieldDescriptor,
        input: &FieldInput,
    ) -> AppResult<()> {
        let executor = self.executor(page)?;
        let ok = match input {
            FieldInput::Clear => {
                executor
                    .call_as::<bool>(CLEAR_JS, &json!({ "selector": field.selector }))
                    .await?
            }
            FieldInput::Keys(keys) => {
                let element = executor
                    .page()
                    .find_element(field.selector.as_str())
                    .await
                    .map_err(|_| not_found(field))?;
                element.type_str(keys).await?;
                true
            }
            FieldInput::Choose(value) => {
                let kind = if field.kind == FieldKind::Radio {
                    "radio"
                } else {
                    "select"
                };
                executor
                    .call_as::<bool>(
                        CHOOSE_JS,
                        &json!({ "selector": field.selector, "value": value, "kind": kind }),
                    )
                    .await?
            }
            FieldInput::Check(checked) => {
                executor
                    .call_as::<bool>(
                        CHECK_JS,
                        &json!({ "selector": field.selector, "checked": checked }),
                    )
                    .await?
            }
            FieldInput::Attach(path) => {
                self.attach_file(&executor, field, path).await?;
                true
            }
        };
        if ok {
            Ok(())
        } else {
            Err(not_found(field))
        }
    }

    async fn detect_challenge(&self, page: &PageHandle) -> AppResult<Option<Challenge>> {
        let html = self.page_html(page).await?;
        let url = self.current_url(page).await?;
        Ok(detect_from_html(&html, &url))
    }

    async fn click_challenge_checkbox(
        &self,
        page: &PageHandle,
        challenge: &Challenge,
    ) -> AppResult<bool> {
        let executor = self.executor(page)?;
        let point: Option<ClickPoint> = executor.eval_as(CHECKBOX_BOX_JS).await?;
        if let Some(point) = point {
            executor
                .page()
                .click(Point {
                    x: point.x,
                    y: point.y,
                })
                .await?;
        }
        sleep(Duration::from_secs(2)).await;
        let after = self.detect_challenge(page).await?;
        Ok(!after.is_some_and(|c| c.same_surface(challenge)))
    }

    async fn inject_solution(
        &self,
        page: &PageHandle,
        challenge: &Challenge,
        token: &str,
    ) -> AppResult<()> {
        let executor = self.executor(page)?;
        let hit: bool = executor
            .call_as(
                INJECT_JS,
                &json!({ "kind": challenge.kind.as_str(), "token": token }),
            )
            .await?;
        if !hit {
            warn!("⚠️ 没有找到 {} 的 token 输入框", challenge.kind);
        }
        Ok(())
    }

    async fn export_session(&self, page: &PageHandle) -> AppResult<String> {
        let executor = self.executor(page)?;
        let cookies: Vec<StoredCookie> = executor
            .page()
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| StoredCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect();
        Ok(serde_json::to_string(&cookies)?)
    }

    async fn apply_session(&self, page: &PageHandle, state: &str) -> AppResult<()> {
        let executor = self.executor(page)?;
        let stored: Vec<StoredCookie> = serde_json::from_str(state)?;
        let mut params = Vec::with_capacity(stored.len());
        for cookie in stored {
            let param = CookieParam::builder()
                .name(cookie.name)
                .value(cookie.value)
                .domain(cookie.domain)
                .path(cookie.path)
                .secure(cookie.secure)
                .http_only(cookie.http_only)
                .build()
                .map_err(|e| AppError::Browser(BrowserError::ConfigurationFailed(e)))?;
            params.push(param);
        }
        executor.page().set_cookies(params).await?;
        executor.page().reload().await?;
        Ok(())
    }

    async fn submit(&self, page: &PageHandle) -> AppResult<()> {
        let executor = self.executor(page)?;
        let clicked: bool = executor.eval_as(SUBMIT_JS).await?;
        if !clicked {
            return Err(AppError::Browser(BrowserError::ElementNotFound {
                selector: "submit button".to_string(),
            }));
        }
        // 等待提交后的页面变化，单页应用没有导航事件
        if let Err(e) = executor.page().wait_for_navigation().await {
            debug!("提交后没有导航事件: {}", e);
        }
        Ok(())
    }

    async fn screenshot(&self, page: &PageHandle) -> AppResult<Vec<u8>> {
        let executor = self.executor(page)?;
        let bytes = executor
            .page()
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await?;
        Ok(bytes)
    }

    async fn close(&self, page: &PageHandle) -> AppResult<()> {
        if let Some((_, executor)) = self.pages.remove(&page.id) {
            match Arc::try_unwrap(executor) {
                Ok(executor) => executor.close().await?,
                Err(_) => warn!("页面 {} 仍被占用，跳过关闭", page.id),
            }
        }
        Ok(())
    }
}
