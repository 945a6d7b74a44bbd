//! Membership gate — decides whether a user satisfies the channel
//! membership requirement by querying an external oracle.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::OracleError;

/// Role reported by the oracle for a user in the gating group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    Member,
    Administrator,
    Owner,
    Restricted,
    Left,
    Kicked,
    /// Any role string the transport does not recognize.
    Other,
}

/// Outcome of a membership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    /// The user is in the gating group.
    Member,
    /// The oracle answered and the user is not in the group.
    NotMember,
    /// The oracle call failed; access is denied the same as NotMember.
    Unknown,
}

/// External membership lookup.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// Look up the user's role in the gating group.
    async fn chat_role(&self, user_id: &str) -> Result<ChatRole, OracleError>;
}

/// Collapses oracle answers and failures into a three-way status.
pub struct MembershipGate {
    oracle: Arc<dyn MembershipOracle>,
}

impl MembershipGate {
    pub fn new(oracle: Arc<dyn MembershipOracle>) -> Self {
        Self { oracle }
    }

    /// Check the user's membership, failing closed on oracle errors.
    pub async fn check(&self, user_id: &str) -> MembershipStatus {
        match self.oracle.chat_role(user_id).await {
            Ok(role) => role_to_status(role),
            Err(e) => {
                warn!(user = user_id, "Membership check inconclusive: {e}");
                MembershipStatus::Unknown
            }
        }
    }
}

fn role_to_status(role: ChatRole) -> MembershipStatus {
    match role {
        ChatRole::Member | ChatRole::Administrator | ChatRole::Owner => MembershipStatus::Member,
        ChatRole::Restricted | ChatRole::Left | ChatRole::Kicked | ChatRole::Other => {
            MembershipStatus::NotMember
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOracle(Result<ChatRole, ()>);

    #[async_trait]
    impl MembershipOracle for FixedOracle {
        async fn chat_role(&self, _user_id: &str) -> Result<ChatRole, OracleError> {
            self.0
                .map_err(|_| OracleError::Unavailable("oracle down".to_string()))
        }
    }

    async fn check_with(result: Result<ChatRole, ()>) -> MembershipStatus {
        MembershipGate::new(Arc::new(FixedOracle(result)))
            .check("1")
            .await
    }

    #[tokio::test]
    async fn member_roles_grant_access() {
        assert_eq!(check_with(Ok(ChatRole::Member)).await, MembershipStatus::Member);
        assert_eq!(
            check_with(Ok(ChatRole::Administrator)).await,
            MembershipStatus::Member
        );
        assert_eq!(check_with(Ok(ChatRole::Owner)).await, MembershipStatus::Member);
    }

    #[tokio::test]
    async fn non_member_roles_deny_access() {
        for role in [
            ChatRole::Restricted,
            ChatRole::Left,
            ChatRole::Kicked,
            ChatRole::Other,
        ] {
            assert_eq!(check_with(Ok(role)).await, MembershipStatus::NotMember);
        }
    }

    #[tokio::test]
    async fn oracle_failure_collapses_to_unknown() {
        assert_eq!(check_with(Err(())).await, MembershipStatus::Unknown);
    }
}
