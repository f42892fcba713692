//! Reconcile an external identity with a local [`User`].

use std::sync::Arc;

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServerError};
use crate::identity::{AuthExchangeError, IdentityAssertion, IdentityProvider};
use crate::user::{NewUser, User, UserRepository};

const STATE_LENGTH: usize = 32;

/// Login started but not yet completed by the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// Anti-forgery value echoed back by the provider.
    pub state: String,
}

/// Query parameters sent by the provider to the callback.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Callback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct IdentityLinker {
    users: UserRepository,
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityLinker {
    /// Create a new [`IdentityLinker`].
    pub fn new(users: UserRepository, provider: Arc<dyn IdentityProvider>) -> Self {
        Self { users, provider }
    }

    /// Start a login: pick a fresh `state` and build the provider URL.
    pub async fn begin(&self, redirect_uri: &str) -> Result<(PendingLogin, Url)> {
        let pending = PendingLogin {
            state: Alphanumeric.sample_string(&mut OsRng, STATE_LENGTH),
        };
        let url = self
            .provider
            .authorization_url(redirect_uri, &pending.state)
            .await?;

        Ok((pending, url))
    }

    /// Finish a login started with [`IdentityLinker::begin`].
    pub async fn complete(
        &self,
        callback: Callback,
        pending: Option<&PendingLogin>,
        redirect_uri: &str,
    ) -> Result<User> {
        if let Some(error) = callback.error {
            return Err(AuthExchangeError::Denied(error).into());
        }

        match (pending, callback.state.as_deref()) {
            (Some(pending), Some(state)) if pending.state == state => (),
            _ => return Err(AuthExchangeError::StateMismatch.into()),
        }

        let code = callback
            .code
            .filter(|code| !code.is_empty())
            .ok_or(AuthExchangeError::MissingCode)?;

        let assertion = self.provider.exchange(&code, redirect_uri).await?;
        self.link(&assertion).await
    }

    /// Return the user owning this identity, creating it on first sight.
    ///
    /// An `external_id` match wins over an `email` match. Existing rows are
    /// never modified.
    pub async fn link(&self, assertion: &IdentityAssertion) -> Result<User> {
        if let Some(user) = self.find(assertion).await? {
            tracing::debug!(user_id = user.id, "identity linked to existing user");
            return Ok(user);
        }

        self.create(assertion).await
    }

    /// Create the user, or read the row a concurrent login created first.
    async fn create(&self, assertion: &IdentityAssertion) -> Result<User> {
        let new_user = NewUser {
            username: assertion.username(),
            email: assertion.email.clone(),
            external_id: assertion.subject.clone(),
        };

        match self.users.create(&new_user).await {
            Ok(user) => {
                metrics::counter!("users_created_total").increment(1);
                tracing::info!(user_id = user.id, "user created on first login");
                Ok(user)
            },
            // Another login for the same identity won the race.
            Err(ServerError::Conflict) => {
                self.find(assertion).await?.ok_or_else(|| ServerError::Internal {
                    details: "user vanished after uniqueness conflict".into(),
                    source: None,
                })
            },
            Err(err) => Err(err),
        }
    }

    async fn find(&self, assertion: &IdentityAssertion) -> Result<Option<User>> {
        self.users
            .find_by_external_id_or_email(&assertion.subject, &assertion.email)
            .await
    }
}

#[cfg(test)]
mod tests {
    use sqlx::SqlitePool;

    use super::*;
    use crate::identity::fake::FakeProvider;

    const REDIRECT_URI: &str = "http://localhost:5000/api/auth/callback";

    fn linker(pool: SqlitePool) -> (IdentityLinker, Arc<FakeProvider>) {
        let provider = FakeProvider::new();
        let linker = IdentityLinker::new(UserRepository::new(pool), provider.clone());
        (linker, provider)
    }

    fn assertion(subject: &str, email: &str) -> IdentityAssertion {
        IdentityAssertion {
            subject: subject.into(),
            email: email.into(),
            name: None,
        }
    }

    async fn count_users(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_link_is_idempotent(pool: SqlitePool) {
        let (linker, _) = linker(pool.clone());

        let first = linker.link(&assertion("sub-1", "ada@example.com")).await.unwrap();
        let second = linker.link(&assertion("sub-1", "ada@example.com")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.username, "ada");
        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_concurrent_first_logins(pool: SqlitePool) {
        let (linker, _) = linker(pool.clone());

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let linker = linker.clone();
            tasks.spawn(async move {
                linker.link(&assertion("sub-race", "race@example.com")).await
            });
        }

        let mut ids = Vec::new();
        while let Some(result) = tasks.join_next().await {
            ids.push(result.unwrap().unwrap().id);
        }

        assert_eq!(ids.len(), 8);
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_create_conflict_rereads_winner(pool: SqlitePool) {
        let (linker, _) = linker(pool.clone());

        // another login saved the user between lookup and insert.
        let winner = UserRepository::new(pool.clone())
            .create(&NewUser {
                username: "race".into(),
                email: "race@example.com".into(),
                external_id: "sub-race".into(),
            })
            .await
            .unwrap();

        let user = linker
            .create(&assertion("sub-race", "race@example.com"))
            .await
            .unwrap();
        assert_eq!(user, winner);
        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_email_match_reuses_user(pool: SqlitePool) {
        let (linker, _) = linker(pool.clone());

        let original = linker.link(&assertion("sub-1", "ada@example.com")).await.unwrap();
        let relinked = linker.link(&assertion("sub-2", "ADA@example.com")).await.unwrap();

        assert_eq!(relinked, original);
        assert_eq!(relinked.external_id, "sub-1");
        assert_eq!(count_users(&pool).await, 1);
    }

    #[sqlx::test]
    async fn test_external_id_takes_precedence(pool: SqlitePool) {
        let (linker, _) = linker(pool.clone());

        let ada = linker.link(&assertion("sub-1", "ada@example.com")).await.unwrap();
        let bob = linker.link(&assertion("sub-2", "bob@example.com")).await.unwrap();

        // bob's subject with ada's email resolves to bob.
        let user = linker.link(&assertion("sub-2", "ada@example.com")).await.unwrap();
        assert_eq!(user, bob);

        // ada's subject with a changed email resolves to ada, unchanged.
        let user = linker.link(&assertion("sub-1", "ada@new.example")).await.unwrap();
        assert_eq!(user, ada);
        assert_eq!(count_users(&pool).await, 2);
    }

    #[sqlx::test]
    async fn test_complete(pool: SqlitePool) {
        let (linker, provider) = linker(pool);
        provider.will_assert("sub-1", "ada@example.com", Some("Ada"));

        let (pending, url) = linker.begin(REDIRECT_URI).await.unwrap();
        assert_eq!(pending.state.len(), STATE_LENGTH);
        assert!(url.query_pairs().any(|(k, v)| k == "state" && v == pending.state));

        let callback = Callback {
            code: Some("code".into()),
            state: Some(pending.state.clone()),
            error: None,
        };
        let user = linker
            .complete(callback, Some(&pending), REDIRECT_URI)
            .await
            .unwrap();
        assert_eq!(user.username, "Ada");
        assert_eq!(user.external_id, "sub-1");
    }

    #[sqlx::test]
    async fn test_complete_failures(pool: SqlitePool) {
        let (linker, provider) = linker(pool.clone());
        let pending = PendingLogin { state: "abc".into() };

        // forged state.
        let callback = Callback {
            code: Some("code".into()),
            state: Some("xyz".into()),
            error: None,
        };
        let result = linker.complete(callback, Some(&pending), REDIRECT_URI).await;
        assert!(matches!(
            result,
            Err(ServerError::AuthExchange(AuthExchangeError::StateMismatch))
        ));

        // no pending login at all.
        let callback = Callback {
            code: Some("code".into()),
            state: Some("abc".into()),
            error: None,
        };
        let result = linker.complete(callback, None, REDIRECT_URI).await;
        assert!(matches!(
            result,
            Err(ServerError::AuthExchange(AuthExchangeError::StateMismatch))
        ));

        // user refused consent.
        let callback = Callback {
            error: Some("access_denied".into()),
            ..Default::default()
        };
        let result = linker.complete(callback, Some(&pending), REDIRECT_URI).await;
        assert!(matches!(
            result,
            Err(ServerError::AuthExchange(AuthExchangeError::Denied(_)))
        ));

        // provider rejects the code.
        let callback = Callback {
            code: Some("code".into()),
            state: Some("abc".into()),
            error: None,
        };
        let result = linker.complete(callback, Some(&pending), REDIRECT_URI).await;
        assert!(matches!(result, Err(ServerError::AuthExchange(_))));

        // missing code.
        provider.will_assert("sub-1", "ada@example.com", None);
        let callback = Callback {
            state: Some("abc".into()),
            ..Default::default()
        };
        let result = linker.complete(callback, Some(&pending), REDIRECT_URI).await;
        assert!(matches!(
            result,
            Err(ServerError::AuthExchange(AuthExchangeError::MissingCode))
        ));

        assert_eq!(count_users(&pool).await, 0);
    }
}
