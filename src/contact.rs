//! Contact record and submission types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

pub type ContactId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

impl LinkPrecedence {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkPrecedence::Primary => "primary",
            LinkPrecedence::Secondary => "secondary",
        }
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkPrecedence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(LinkPrecedence::Primary),
            "secondary" => Ok(LinkPrecedence::Secondary),
            other => Err(format!("unknown link precedence '{other}'")),
        }
    }
}

/// A stored contact row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Set iff this contact is secondary; points at the group primary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Group seniority key: creation instant, then id as a total-order tiebreak.
    pub fn seniority(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Phone numbers arrive either as JSON strings or JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PhoneInput {
    Text(String),
    Number(serde_json::Number),
}

impl PhoneInput {
    /// String form used for storage and matching.
    pub fn canonical(&self) -> String {
        match self {
            PhoneInput::Text(s) => s.clone(),
            PhoneInput::Number(n) => {
                if let Some(i) = n.as_i64() {
                    i.to_string()
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    match n.as_f64() {
                        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 => {
                            format!("{}", f as i64)
                        }
                        Some(f) => f.to_string(),
                        None => n.to_string(),
                    }
                }
            }
        }
    }
}

/// Wire shape of an identify request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<PhoneInput>,
}

/// A validated submission: at least one of `email` / `phone` is present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl Submission {
    pub fn new(email: Option<String>, phone: Option<String>) -> Result<Self, ReconcileError> {
        let email = email.filter(|e| !e.is_empty());
        let phone = phone.filter(|p| !p.is_empty());
        if email.is_none() && phone.is_none() {
            return Err(ReconcileError::Validation(
                "at least one identifier required".into(),
            ));
        }
        Ok(Self { email, phone })
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }
}

impl TryFrom<IdentifyRequest> for Submission {
    type Error = ReconcileError;

    fn try_from(req: IdentifyRequest) -> Result<Self, Self::Error> {
        Submission::new(req.email, req.phone_number.map(|p| p.canonical()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_submission_is_rejected() {
        let err = Submission::new(None, None).unwrap_err();
        assert!(err.is_client_error());
        assert!(Submission::new(Some(String::new()), Some(String::new())).is_err());
    }

    #[test]
    fn empty_strings_count_as_absent() {
        let s = Submission::new(Some(String::new()), Some("123".into())).unwrap();
        assert_eq!(s.email(), None);
        assert_eq!(s.phone(), Some("123"));
    }

    #[test]
    fn numeric_phone_is_canonicalized() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": null, "phoneNumber": 123456}"#).unwrap();
        let s = Submission::try_from(req).unwrap();
        assert_eq!(s.phone(), Some("123456"));
        assert_eq!(s.email(), None);
    }

    #[test]
    fn integral_float_phone_drops_fraction() {
        let req: IdentifyRequest = serde_json::from_str(r#"{"phoneNumber": 919191.0}"#).unwrap();
        assert_eq!(req.phone_number.unwrap().canonical(), "919191");
    }

    #[test]
    fn string_phone_is_kept_verbatim() {
        let req: IdentifyRequest =
            serde_json::from_str(r#"{"email": "a@x.com", "phoneNumber": "0123"}"#).unwrap();
        let s = Submission::try_from(req).unwrap();
        assert_eq!(s.phone(), Some("0123"));
        assert_eq!(s.email(), Some("a@x.com"));
    }

    #[test]
    fn precedence_parses_back() {
        for p in [LinkPrecedence::Primary, LinkPrecedence::Secondary] {
            assert_eq!(p.as_str().parse::<LinkPrecedence>().unwrap(), p);
        }
        assert!("tertiary".parse::<LinkPrecedence>().is_err());
    }

    #[test]
    fn seniority_breaks_timestamp_ties_by_id() {
        let at = Utc::now();
        let row = |id| Contact {
            id,
            email: None,
            phone_number: Some("1".into()),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at: at,
            updated_at: at,
        };
        let (older, newer) = (row(3), row(7));
        assert!(older.seniority() < newer.seniority());
        assert!(older.is_primary());
    }
}
