use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::field::SemanticFieldType;

/// 申请人资料
///
/// 所有字段都是可选的：没有值的字段不会被填写，也不会被编造。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,

    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,

    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub behance: Option<String>,
    pub twitter: Option<String>,
    pub portfolio: Option<String>,
    pub website: Option<String>,

    pub authorized_to_work: Option<String>,
    pub require_sponsorship: Option<String>,
    pub citizen: Option<String>,

    pub gender: Option<String>,
    pub pronouns: Option<String>,
    pub race: Option<String>,
    pub ethnicity: Option<String>,
    pub veteran_status: Option<String>,
    pub disability_status: Option<String>,

    pub highest_degree: Option<String>,
    pub major: Option<String>,
    pub school: Option<String>,
    pub graduation_year: Option<String>,
    pub gpa: Option<String>,

    pub years_experience: Option<String>,
    pub current_title: Option<String>,
    pub current_company: Option<String>,

    pub salary_expectation: Option<String>,
    pub salary_min: Option<String>,
    pub hourly_rate: Option<String>,

    pub available_start: Option<String>,
    pub notice_period: Option<String>,
    pub willing_to_relocate: Option<String>,

    pub english_level: Option<String>,
    pub languages: Option<String>,
    pub timezone: Option<String>,

    pub over_18: Option<String>,
    pub over_21: Option<String>,

    pub hear_about_us: Option<String>,
    pub referred_by: Option<String>,
    /// 是否勾选同意条款类复选框
    pub accept_terms: bool,

    pub resume_path: Option<PathBuf>,
    pub cover_letter_path: Option<PathBuf>,
}

impl UserProfile {
    /// 语义类型对应的文本值（空字符串视为没有）
    pub fn value_for(&self, field_type: SemanticFieldType) -> Option<&str> {
        use SemanticFieldType::*;
        let value = match field_type {
            FirstName => &self.first_name,
            LastName => &self.last_name,
            // 没有全名时不拼接名和姓
            FullName => &self.full_name,
            Email => &self.email,
            Phone => &self.phone,
            Address => &self.address,
            City => &self.city,
            State => &self.state,
            Zip => &self.zip_code,
            Country => &self.country,
            Linkedin => &self.linkedin,
            Github => &self.github,
            Behance => &self.behance,
            Twitter => &self.twitter,
            Portfolio => &self.portfolio,
            Website => &self.website,
            WorkAuthorization => &self.authorized_to_work,
            Sponsorship => &self.require_sponsorship,
            Citizenship => &self.citizen,
            Gender => &self.gender,
            Pronouns => &self.pronouns,
            Race => &self.race,
            Ethnicity => &self.ethnicity,
            Veteran => &self.veteran_status,
            Disability => &self.disability_status,
            Degree => &self.highest_degree,
            Major => &self.major,
            School => &self.school,
            GraduationYear => &self.graduation_year,
            Gpa => &self.gpa,
            YearsExperience => &self.years_experience,
            CurrentTitle => &self.current_title,
            CurrentCompany => &self.current_company,
            SalaryMin => &self.salary_min,
            Salary => &self.salary_expectation,
            HourlyRate => &self.hourly_rate,
            StartDate => &self.available_start,
            NoticePeriod => &self.notice_period,
            Relocate => &self.willing_to_relocate,
            EnglishLevel => &self.english_level,
            Languages => &self.languages,
            Timezone => &self.timezone,
            Over21 => &self.over_21,
            Over18 => &self.over_18,
            Referral => &self.referred_by,
            HearAbout => &self.hear_about_us,
            Resume | CoverLetter | Consent => return None,
        };
        value.as_deref().filter(|v| !v.trim().is_empty())
    }

    /// 附件路径
    pub fn attachment_for(&self, field_type: SemanticFieldType) -> Option<&PathBuf> {
        match field_type {
            SemanticFieldType::Resume => self.resume_path.as_ref(),
            SemanticFieldType::CoverLetter => self.cover_letter_path.as_ref(),
            _ => None,
        }
    }

    /// 已生成的材料，失败时随记录一起保留
    pub fn materials(&self) -> Vec<PathBuf> {
        self.resume_path
            .iter()
            .chain(self.cover_letter_path.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_count_as_missing() {
        let profile = UserProfile {
            email: Some("a@b.c".into()),
            phone: Some("   ".into()),
            ..UserProfile::default()
        };
        assert_eq!(profile.value_for(SemanticFieldType::Email), Some("a@b.c"));
        assert_eq!(profile.value_for(SemanticFieldType::Phone), None);
        assert_eq!(profile.value_for(SemanticFieldType::Gpa), None);
    }

    #[test]
    fn materials_lists_present_documents() {
        let profile = UserProfile {
            resume_path: Some(PathBuf::from("resume.pdf")),
            ..UserProfile::default()
        };
        assert_eq!(profile.materials(), vec![PathBuf::from("resume.pdf")]);
    }
}
