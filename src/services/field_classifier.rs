//! 字段分类 - 业务能力层
//!
//! 纯函数：把页面上的原始字段归入语义类型。每个类型拥有一组
//! 不区分大小写的模式，命中数最多的类型胜出；平分时按
//! `SemanticFieldType` 的声明顺序取靠前的；一个都不命中则为 None。
//! 新增类型只需要在 `PATTERNS` 里加一行。

use std::sync::LazyLock;

use regex::Regex;

use crate::models::{FieldDescriptor, FieldKind, SemanticFieldType};

use crate::models::SemanticFieldType as T;

/// 类型 → 模式
const PATTERNS: &[(SemanticFieldType, &[&str])] = &[
    (T::Resume, &[r"resume", r"résumé", r"\bcv\b", r"curriculum"]),
    (T::CoverLetter, &[r"cover.?letter", r"motivation.?letter"]),
    (
        T::FirstName,
        &[r"first.?name", r"given.?name", r"\bfname\b", r"^first$"],
    ),
    (
        T::LastName,
        &[r"last.?name", r"sur.?name", r"family.?name", r"\blname\b", r"^last$"],
    ),
    (
        T::FullName,
        &[r"full.?name", r"^name$", r"your.?name", r"applicant.?name"],
    ),
    (T::Email, &[r"email", r"e-mail", r"mail"]),
    (
        T::Phone,
        &[r"phone", r"\btel\b", r"mobile", r"\bcell\b", r"contact.?number"],
    ),
    (T::Linkedin, &[r"linkedin", r"linked.?in"]),
    (T::Github, &[r"github", r"git.?hub"]),
    (T::Behance, &[r"behance"]),
    (T::Twitter, &[r"twitter", r"\bx\.com\b"]),
    (
        T::Portfolio,
        &[r"portfolio", r"work.?samples", r"creative.?work"],
    ),
    (
        T::Website,
        &[r"website", r"personal.?site", r"\burl\b", r"web.?page"],
    ),
    (T::Address, &[r"address", r"street"]),
    (T::City, &[r"\bcity\b", r"\btown\b"]),
    (T::State, &[r"\bstate\b", r"province", r"\bregion\b"]),
    (T::Zip, &[r"\bzip\b", r"postal", r"postcode"]),
    (T::Country, &[r"\bcountry\b", r"country.?of.?residence"]),
    (
        T::WorkAuthorization,
        &[
            r"authori[sz]ed",
            r"eligible.?to.?work",
            r"legally.?work",
            r"work.?authori[sz]ation",
            r"right.?to.?work",
        ],
    ),
    (
        T::Sponsorship,
        &[r"sponsor", r"\bvisa\b", r"immigration", r"require.?sponsor"],
    ),
    (T::Citizenship, &[r"citizen", r"citizenship", r"nationality"]),
    (T::Gender, &[r"gender", r"\bsex\b"]),
    (T::Pronouns, &[r"pronoun"]),
    (T::Race, &[r"\brace\b", r"racial"]),
    (
        T::Ethnicity,
        &[r"ethnicity", r"ethnic", r"hispanic", r"latino"],
    ),
    (
        T::Veteran,
        &[r"veteran", r"military", r"armed.?forces", r"protected.?veteran"],
    ),
    (
        T::Disability,
        &[r"disability", r"disabled", r"handicap", r"impairment"],
    ),
    (
        T::Degree,
        &[r"degree", r"education.?level", r"highest.?education"],
    ),
    (
        T::Major,
        &[r"\bmajor\b", r"field.?of.?study", r"concentration", r"discipline"],
    ),
    (
        T::School,
        &[r"school", r"university", r"college", r"institution"],
    ),
    (T::GraduationYear, &[r"graduat", r"grad.?year"]),
    (T::Gpa, &[r"\bgpa\b", r"grade.?point"]),
    (
        T::YearsExperience,
        &[
            r"years?.?experience",
            r"years?.?of.?experience",
            r"experience.?years",
            r"how.?many.?years",
        ],
    ),
    (
        T::CurrentTitle,
        &[r"current.?title", r"job.?title", r"current.?position"],
    ),
    (
        T::CurrentCompany,
        &[r"current.?company", r"current.?employer", r"\bemployer\b"],
    ),
    (
        T::SalaryMin,
        &[r"minimum.?salary", r"min.?salary", r"lowest.?salary"],
    ),
    (
        T::Salary,
        &[
            r"salary",
            r"compensation",
            r"pay.?expectation",
            r"desired.?salary",
            r"expected.?salary",
        ],
    ),
    (T::HourlyRate, &[r"hourly", r"rate.?per.?hour", r"hour.?rate"]),
    (
        T::StartDate,
        &[
            r"start.?date",
            r"available.?date",
            r"when.?can.?you.?start",
            r"earliest.?start",
        ],
    ),
    (
        T::NoticePeriod,
        &[r"notice.?period", r"notice.?required", r"days?.?notice"],
    ),
    (
        T::Relocate,
        &[r"relocat", r"willing.?to.?move", r"open.?to.?relocation"],
    ),
    (
        T::EnglishLevel,
        &[r"english", r"language.?level", r"fluency"],
    ),
    (T::Languages, &[r"language", r"\bspeak\b", r"multilingual"]),
    (T::Timezone, &[r"timezone", r"time.?zone"]),
    (
        T::Over21,
        &[r"21.?years", r"over.?21", r"21.?or.?older", r"at.?least.?21"],
    ),
    (
        T::Over18,
        &[r"18.?years", r"over.?18", r"18.?or.?older", r"at.?least.?18"],
    ),
    (
        T::Referral,
        &[r"referral", r"referred.?by", r"employee.?referral"],
    ),
    (
        T::HearAbout,
        &[r"hear.?about", r"how.?did.?you.?(find|hear)", r"\breferred\b"],
    ),
    (
        T::Consent,
        &[r"\bagree", r"consent", r"acknowledge", r"\bterms\b", r"privacy"],
    ),
];

struct CompiledPatterns {
    field_type: SemanticFieldType,
    patterns: Vec<Regex>,
}

static TABLE: LazyLock<Vec<CompiledPatterns>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .map(|(field_type, patterns)| CompiledPatterns {
            field_type: *field_type,
            patterns: patterns
                .iter()
                .map(|p| Regex::new(&format!("(?i){}", p)).expect("valid field pattern"))
                .collect(),
        })
        .collect()
});

/// 命中的模式数（每个模式只要命中任一文本就计一次）
fn score(patterns: &[Regex], texts: &[String]) -> usize {
    patterns
        .iter()
        .filter(|re| texts.iter().any(|t| re.is_match(t)))
        .count()
}

fn normalized_texts(field: &FieldDescriptor) -> Vec<String> {
    field.texts().map(|t| t.replace('_', " ")).collect()
}

/// 为每个类型打分，返回得分 > 0 的类型（按声明顺序）
pub fn scores(field: &FieldDescriptor) -> Vec<(SemanticFieldType, usize)> {
    let texts = normalized_texts(field);
    let mut scored: Vec<(SemanticFieldType, usize)> = TABLE
        .iter()
        .map(|entry| (entry.field_type, score(&entry.patterns, &texts)))
        .collect();

    // HTML 类型本身也是线索
    match field.input_type.as_deref() {
        Some("email") => bump(&mut scored, T::Email),
        Some("tel") => bump(&mut scored, T::Phone),
        _ => {}
    }

    scored.retain(|(_, s)| *s > 0);
    scored.sort_by_key(|(field_type, _)| *field_type);
    scored
}

fn bump(scored: &mut [(SemanticFieldType, usize)], target: SemanticFieldType) {
    if let Some(entry) = scored.iter_mut().find(|(t, _)| *t == target) {
        entry.1 += 1;
    }
}

/// 将字段归入语义类型，无法识别时返回 None
pub fn classify(field: &FieldDescriptor) -> Option<SemanticFieldType> {
    let candidates = scores(field);

    if field.kind == FieldKind::File {
        // 上传控件只可能是附件，认不出时按简历处理
        return candidates
            .iter()
            .filter(|(t, _)| t.is_attachment())
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(t, _)| *t)
            .or(Some(T::Resume));
    }

    candidates
        .into_iter()
        .filter(|(t, _)| !t.is_attachment())
        // 同分时声明顺序靠前的胜出
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(t, _)| t)
}
