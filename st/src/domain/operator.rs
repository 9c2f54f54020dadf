//! Caller identity and role
//!
//! Identity comes from an external provider; this crate only checks it.

use serde::{Deserialize, Serialize};

/// Role of the person acting on a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Floor operator
    #[default]
    Operator,
    /// Production-floor supervisor
    Supervisor,
    Administrator,
}

impl Role {
    /// Privileged roles may close detentions
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Supervisor | Role::Administrator)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Operator => write!(f, "operator"),
            Self::Supervisor => write!(f, "supervisor"),
            Self::Administrator => write!(f, "administrator"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "operator" | "operador" => Ok(Self::Operator),
            "supervisor" => Ok(Self::Supervisor),
            "administrator" | "admin" | "administrador" => Ok(Self::Administrator),
            _ => Err(format!("Unknown role: {}. Use: operator, supervisor, or administrator", s)),
        }
    }
}

/// An authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub id: String,
    pub role: Role,
}

impl Operator {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    /// Floor operator with the given id
    pub fn floor(id: impl Into<String>) -> Self {
        Self::new(id, Role::Operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_roles() {
        assert!(!Role::Operator.is_privileged());
        assert!(Role::Supervisor.is_privileged());
        assert!(Role::Administrator.is_privileged());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Administrator);
        assert_eq!("supervisor".parse::<Role>().unwrap(), Role::Supervisor);
        assert!("boss".parse::<Role>().is_err());
    }
}
