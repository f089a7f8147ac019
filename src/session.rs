use crate::peer::types::IceCandidate;
use crate::utils::random_id;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(random_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Роль в обмене offer/answer. Сервер назначает ровно одного caller на пару
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Searching,
    Negotiating(Role),
    Connected,
    Ending,
}

impl SessionState {
    pub fn is_negotiating(&self) -> bool {
        matches!(self, Self::Negotiating(_))
    }
}

/// Текущая (единственная) сессия с собеседником
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub partner_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) remote_stream: Option<String>,
    #[serde(skip)]
    pub(crate) local_candidates: Vec<IceCandidate>,
}

impl Session {
    pub fn new(partner_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: SessionId::generate(),
            partner_id: partner_id.into(),
            role,
            created_at: Utc::now(),
            remote_stream: None,
            local_candidates: Vec::new(),
        }
    }

    pub fn is_with(&self, partner_id: &str) -> bool {
        self.partner_id == partner_id
    }
}

/// Оба флага обязательны до подключения к сигнальному серверу
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsentRecord {
    pub age_confirmed: bool,
    pub terms_accepted: bool,
}

impl ConsentRecord {
    pub fn granted() -> Self {
        Self {
            age_confirmed: true,
            terms_accepted: true,
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.age_confirmed && self.terms_accepted
    }
}
