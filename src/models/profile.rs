use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Anything that can be shown in a conversation list or message bubble.
pub trait NamedEntity: Send + Sync {
    fn display_name(&self) -> String;

    fn initial(&self) -> String {
        initial_of(&self.display_name())
    }
}

pub fn initial_of(name: &str) -> String {
    name.chars()
        .find(|c| !c.is_whitespace())
        .map(|c| c.to_uppercase().collect())
        .unwrap_or_else(|| "?".to_string())
}

/// The kind of account a user registered as, each carrying the one field
/// that names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stakeholderType", rename_all = "lowercase")]
pub enum Stakeholder {
    Individual { full_name: Option<String> },
    Ngo { ngo_name: Option<String> },
    Business { company_name: Option<String> },
    Institution { institution_name: Option<String> },
}

impl Stakeholder {
    fn name(&self) -> Option<&str> {
        let name = match self {
            Stakeholder::Individual { full_name } => full_name,
            Stakeholder::Ngo { ngo_name } => ngo_name,
            Stakeholder::Business { company_name } => company_name,
            Stakeholder::Institution { institution_name } => institution_name,
        };
        name.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: String,
    pub stakeholder_type: String,
    pub full_name: Option<String>,
    pub ngo_name: Option<String>,
    pub company_name: Option<String>,
    pub institution_name: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub stakeholder: Stakeholder,
    pub created_at: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        let stakeholder = match row.stakeholder_type.as_str() {
            "ngo" => Stakeholder::Ngo {
                ngo_name: row.ngo_name,
            },
            "business" => Stakeholder::Business {
                company_name: row.company_name,
            },
            "institution" => Stakeholder::Institution {
                institution_name: row.institution_name,
            },
            _ => Stakeholder::Individual {
                full_name: row.full_name,
            },
        };

        Self {
            id: row.id,
            stakeholder,
            created_at: row.created_at,
        }
    }
}

impl NamedEntity for UserProfile {
    fn display_name(&self) -> String {
        self.stakeholder.name().unwrap_or("User").to_string()
    }
}

/// Stand-in for a sender whose profile row no longer exists.
pub struct UnknownSender;

impl NamedEntity for UnknownSender {
    fn display_name(&self) -> String {
        "Unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str) -> UserRow {
        UserRow {
            id: "u1".to_string(),
            stakeholder_type: kind.to_string(),
            full_name: Some("asha rao".to_string()),
            ngo_name: Some("Green Earth".to_string()),
            company_name: Some("Acme".to_string()),
            institution_name: Some("IIT".to_string()),
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn resolves_name_by_stakeholder_variant() {
        assert_eq!(UserProfile::from(row("individual")).display_name(), "asha rao");
        assert_eq!(UserProfile::from(row("ngo")).display_name(), "Green Earth");
        assert_eq!(UserProfile::from(row("business")).display_name(), "Acme");
        assert_eq!(UserProfile::from(row("institution")).display_name(), "IIT");
    }

    #[test]
    fn initial_is_uppercased_first_letter() {
        assert_eq!(UserProfile::from(row("individual")).initial(), "A");
        assert_eq!(initial_of("  émile"), "É");
        assert_eq!(initial_of(""), "?");
    }

    #[test]
    fn missing_name_falls_back_to_user() {
        let mut r = row("ngo");
        r.ngo_name = Some("   ".to_string());
        assert_eq!(UserProfile::from(r).display_name(), "User");
    }
}
