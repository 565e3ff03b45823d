//! 验证码检测
//!
//! 纯函数：输入页面 HTML，输出检测到的验证码。标记按顺序匹配，
//! 越具体的类型越靠前（FunCaptcha 常和其他验证码的痕迹同时出现）。

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Challenge, ChallengeKind};

/// 类型 → 页面特征（小写子串）
const MARKERS: &[(ChallengeKind, &[&str])] = &[
    (
        ChallengeKind::Funcaptcha,
        &[
            "funcaptcha",
            "arkoselabs",
            "enforcement.arkoselabs",
            "click on the point",
            "where the lines cross",
            "drag the correct image",
            "complete the corresponding image",
        ],
    ),
    (
        ChallengeKind::Hcaptcha,
        &["class=\"h-captcha\"", "hcaptcha.com/1/", "data-hcaptcha-sitekey"],
    ),
    (
        ChallengeKind::Turnstile,
        &["challenges.cloudflare.com/turnstile", "cf-turnstile"],
    ),
    (
        ChallengeKind::RecaptchaV3,
        &["grecaptcha.execute", "recaptcha/api.js?render="],
    ),
    (
        ChallengeKind::RecaptchaV2,
        &["class=\"g-recaptcha\"", "grecaptcha.render", "www.google.com/recaptcha"],
    ),
    (
        ChallengeKind::Image,
        &["pick all squares", "select all images", "select all squares"],
    ),
    (
        ChallengeKind::Text,
        &[
            "enter the characters",
            "type the characters",
            "type the text you see",
            "class=\"captcha-text\"",
        ],
    ),
    (
        ChallengeKind::CheckboxOnly,
        &[
            "confirm you are human",
            "i am not a robot",
            "i'm not a robot",
            "data-challenge=\"checkbox\"",
        ],
    ),
];

static SITE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-sitekey=["']([^"']+)["']"#).expect("valid regex"));

static UUID_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
        .expect("valid regex")
});

static FUNCAPTCHA_KEYS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)data-pkey=["']([^"']+)["']"#,
        r#"(?i)publicKey["\s:]+["']([^"']+)["']"#,
        r#"(?i)arkoselabs\.com/fc/gc/\?pk=([^&"']+)"#,
        r#"(?i)data-sitekey=["']([0-9a-f-]{36})["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// 从页面 HTML 中检测验证码，没有则返回 None
pub fn detect_from_html(html: &str, page_url: &str) -> Option<Challenge> {
    let lower = html.to_lowercase();

    let mut kind = MARKERS
        .iter()
        .find(|(_, markers)| markers.iter().any(|m| lower.contains(m)))
        .map(|(kind, _)| *kind);

    if kind.is_none() {
        if !lower.contains("captcha") {
            return None;
        }
        // 只有笼统的 captcha 字样：UUID 格式的 site key 是 FunCaptcha
        kind = Some(match site_key(html) {
            Some(key) if UUID_KEY.is_match(&key) => ChallengeKind::Funcaptcha,
            _ => ChallengeKind::Image,
        });
    }

    let mut kind = kind?;
    let key = match kind {
        ChallengeKind::Funcaptcha => FUNCAPTCHA_KEYS
            .iter()
            .find_map(|re| re.captures(html).map(|c| c[1].to_string())),
        ChallengeKind::RecaptchaV2 | ChallengeKind::RecaptchaV3 | ChallengeKind::Turnstile => {
            site_key(html)
        }
        ChallengeKind::Hcaptcha => {
            let key = site_key(html);
            if key.as_deref().is_some_and(|k| UUID_KEY.is_match(k)) {
                kind = ChallengeKind::Funcaptcha;
            }
            key
        }
        _ => None,
    };

    Some(Challenge::new(kind, key, page_url))
}

fn site_key(html: &str) -> Option<String> {
    SITE_KEY.captures(html).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://jobs.acme.com/apply/1";

    #[test]
    fn plain_page_has_no_challenge() {
        let html = "<form><input name=email></form><p>Please verify your email</p>";
        assert!(detect_from_html(html, URL).is_none());
    }

    #[test]
    fn funcaptcha_wins_over_recaptcha_traces() {
        let html = r#"<script src="https://www.google.com/recaptcha/api.js"></script>
            <div id="arkose" data-pkey="ABC-123"></div>
            <script src="https://client-api.arkoselabs.com/v2/api.js"></script>"#;
        let challenge = detect_from_html(html, URL).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Funcaptcha);
        assert_eq!(challenge.site_key.as_deref(), Some("ABC-123"));
    }

    #[test]
    fn recaptcha_v2_extracts_site_key() {
        let html = r#"<div class="g-recaptcha" data-sitekey="6LcXYZ"></div>"#;
        let challenge = detect_from_html(html, URL).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::RecaptchaV2);
        assert_eq!(challenge.site_key.as_deref(), Some("6LcXYZ"));
        assert_eq!(challenge.page_url, URL);
    }

    #[test]
    fn hcaptcha_with_uuid_key_is_funcaptcha() {
        let html = r#"<div class="h-captcha" data-sitekey="0f2b1c3d-aaaa-bbbb-cccc-1234567890ab"></div>"#;
        let challenge = detect_from_html(html, URL).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Funcaptcha);
    }

    #[test]
    fn generic_captcha_text_falls_back_to_image() {
        let html = r#"<div id="captcha-box"><img src="/captcha.png"></div>"#;
        let challenge = detect_from_html(html, URL).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::Image);
        assert!(challenge.site_key.is_none());
    }

    #[test]
    fn checkbox_only_challenge() {
        let html = r#"<label><input type="checkbox" data-challenge="checkbox"> I'm not a robot</label>"#;
        let challenge = detect_from_html(html, URL).unwrap();
        assert_eq!(challenge.kind, ChallengeKind::CheckboxOnly);
    }
}
