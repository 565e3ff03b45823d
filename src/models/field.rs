use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 表单控件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    TextArea,
    Select,
    Radio,
    Checkbox,
    /// 文件上传（简历 / 求职信）
    File,
}

/// 页面上的一个原始表单字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FieldDescriptor {
    /// 定位该字段的 CSS 选择器
    pub selector: String,
    pub name: Option<String>,
    pub id: Option<String>,
    pub label: Option<String>,
    pub placeholder: Option<String>,
    /// HTML input type
    pub input_type: Option<String>,
    pub kind: FieldKind,
    /// select / radio 的候选项
    pub options: Vec<String>,
    pub required: bool,
}

impl FieldDescriptor {
    /// 参与分类的文本（name / id / label / placeholder）
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        [&self.name, &self.id, &self.label, &self.placeholder]
            .into_iter()
            .filter_map(|t| t.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// 用于报告的字段名
    pub fn display_name(&self) -> String {
        self.label
            .as_deref()
            .or(self.name.as_deref())
            .or(self.id.as_deref())
            .or(self.placeholder.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.selector.as_str())
            .to_string()
    }
}

/// 语义字段类型
///
/// 声明顺序即平分时的优先顺序：更具体的类型排在前面。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticFieldType {
    Resume,
    CoverLetter,
    FirstName,
    LastName,
    FullName,
    Email,
    Phone,
    Linkedin,
    Github,
    Behance,
    Twitter,
    Portfolio,
    Website,
    Address,
    City,
    State,
    Zip,
    Country,
    WorkAuthorization,
    Sponsorship,
    Citizenship,
    Gender,
    Pronouns,
    Race,
    Ethnicity,
    Veteran,
    Disability,
    Degree,
    Major,
    School,
    GraduationYear,
    Gpa,
    YearsExperience,
    CurrentTitle,
    CurrentCompany,
    SalaryMin,
    Salary,
    HourlyRate,
    StartDate,
    NoticePeriod,
    Relocate,
    EnglishLevel,
    Languages,
    Timezone,
    Over21,
    Over18,
    Referral,
    HearAbout,
    /// 同意条款类勾选框
    Consent,
}

impl SemanticFieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticFieldType::Resume => "resume",
            SemanticFieldType::CoverLetter => "cover_letter",
            SemanticFieldType::FirstName => "first_name",
            SemanticFieldType::LastName => "last_name",
            SemanticFieldType::FullName => "full_name",
            SemanticFieldType::Email => "email",
            SemanticFieldType::Phone => "phone",
            SemanticFieldType::Linkedin => "linkedin",
            SemanticFieldType::Github => "github",
            SemanticFieldType::Behance => "behance",
            SemanticFieldType::Twitter => "twitter",
            SemanticFieldType::Portfolio => "portfolio",
            SemanticFieldType::Website => "website",
            SemanticFieldType::Address => "address",
            SemanticFieldType::City => "city",
            SemanticFieldType::State => "state",
            SemanticFieldType::Zip => "zip",
            SemanticFieldType::Country => "country",
            SemanticFieldType::WorkAuthorization => "work_authorization",
            SemanticFieldType::Sponsorship => "sponsorship",
            SemanticFieldType::Citizenship => "citizenship",
            SemanticFieldType::Gender => "gender",
            SemanticFieldType::Pronouns => "pronouns",
            SemanticFieldType::Race => "race",
            SemanticFieldType::Ethnicity => "ethnicity",
            SemanticFieldType::Veteran => "veteran",
            SemanticFieldType::Disability => "disability",
            SemanticFieldType::Degree => "degree",
            SemanticFieldType::Major => "major",
            SemanticFieldType::School => "school",
            SemanticFieldType::GraduationYear => "graduation_year",
            SemanticFieldType::Gpa => "gpa",
            SemanticFieldType::YearsExperience => "years_experience",
            SemanticFieldType::CurrentTitle => "current_title",
            SemanticFieldType::CurrentCompany => "current_company",
            SemanticFieldType::SalaryMin => "salary_min",
            SemanticFieldType::Salary => "salary",
            SemanticFieldType::HourlyRate => "hourly_rate",
            SemanticFieldType::StartDate => "start_date",
            SemanticFieldType::NoticePeriod => "notice_period",
            SemanticFieldType::Relocate => "relocate",
            SemanticFieldType::EnglishLevel => "english_level",
            SemanticFieldType::Languages => "languages",
            SemanticFieldType::Timezone => "timezone",
            SemanticFieldType::Over21 => "over_21",
            SemanticFieldType::Over18 => "over_18",
            SemanticFieldType::Referral => "referral",
            SemanticFieldType::HearAbout => "hear_about",
            SemanticFieldType::Consent => "consent",
        }
    }

    /// EEO 类问题，没有资料时可以选"不愿透露"
    pub fn is_eeo(self) -> bool {
        matches!(
            self,
            SemanticFieldType::Gender
                | SemanticFieldType::Race
                | SemanticFieldType::Ethnicity
                | SemanticFieldType::Veteran
                | SemanticFieldType::Disability
        )
    }

    /// 通过文件路径而不是键入处理的类型
    pub fn is_attachment(self) -> bool {
        matches!(self, SemanticFieldType::Resume | SemanticFieldType::CoverLetter)
    }
}

impl fmt::Display for SemanticFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 对单个字段的写入动作
#[derive(Debug, Clone, PartialEq)]
pub enum FieldInput {
    /// 清空文本框
    Clear,
    /// 追加键入（逐键调用以模拟人工节奏）
    Keys(String),
    /// 选择下拉 / 单选项
    Choose(String),
    /// 勾选或取消勾选
    Check(bool),
    /// 上传文件
    Attach(PathBuf),
}

/// 填表结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub filled_count: usize,
    pub total_count: usize,
    /// 尝试写入但失败的字段
    pub failed_field_names: Vec<String>,
    /// 可识别但资料中没有对应值的字段
    pub unfilled_field_names: Vec<String>,
    /// 无法识别、直接跳过的字段数
    pub skipped_count: usize,
}

impl FillResult {
    /// 可识别字段数
    pub fn classified_count(&self) -> usize {
        self.total_count.saturating_sub(self.skipped_count)
    }

    /// 完成率 = 已填写 / 可识别字段；表单为空时视为 1.0
    pub fn completion_ratio(&self) -> f64 {
        if self.total_count == 0 {
            return 1.0;
        }
        let classified = self.classified_count();
        if classified == 0 {
            return 0.0;
        }
        self.filled_count as f64 / classified as f64
    }
}
